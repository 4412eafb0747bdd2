//! Write dispatch: config resolution, lane classification, per-class
//! concurrency budgets, adaptive concurrency and tail rescue.

pub mod adaptive;
pub mod budget;
pub mod classify;
pub mod config;
pub mod keys;
pub mod patterns;
pub mod tail_rescue;

pub use adaptive::{
    initial_concurrency, AdaptiveConcurrencyController, ChangeReason, ConcurrencyChange, ConcurrencyLimits,
    OnConcurrencyChange, StallAttribution, WriteSignals,
};
pub use budget::{work_class_budgets, WorkClassBudgets, WorkClassCounts, WorkClassOverrides};
pub use classify::{mem_tokens_for, LaneSplit, WorkClass, WriteEntry, WriteLane, WriteTokens};
pub use config::{AdaptiveWriteConfig, StallThreshold, TailRescueConfig, WriteDispatchConfig, WriteFsStrategy};
pub use patterns::{PatternMode, WritePatterns};
pub use tail_rescue::{
    compare_tail_candidates, select_tail_candidate, TailCandidate, TailRescuePolicy, TailRescueTracker, TokenBoost,
};
