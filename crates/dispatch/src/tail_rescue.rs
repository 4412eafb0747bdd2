//! Tail rescue: extra scheduler tokens for the last few stalled writes.
//!
//! Rescue engages only when the write queue is nearly drained *and* a write
//! has been stalled long enough; a healthy burst never qualifies.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{debug, info};

use flowgate_core::{emit_line, LogSink};

use crate::classify::{WriteLane, WriteTokens};
use crate::config::{TailRescueConfig, WriteDispatchConfig};

/// Extra tokens granted while rescue is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBoost {
    pub io_tokens: u64,
    pub mem_tokens: u64,
}

impl TokenBoost {
    pub fn apply(&self, tokens: WriteTokens) -> WriteTokens {
        WriteTokens {
            io: tokens.io + self.io_tokens,
            mem: tokens.mem + self.mem_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRescuePolicy {
    config: TailRescueConfig,
}

impl TailRescuePolicy {
    pub fn new(config: TailRescueConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TailRescueConfig {
        &self.config
    }

    /// Boost to apply for `remaining` queued plus active writes, if rescue should engage.
    pub fn evaluate(&self, remaining: u64, longest_stall_secs: f64) -> Option<TokenBoost> {
        let engaged = self.config.enabled
            && remaining > 0
            && remaining <= self.config.max_pending
            && longest_stall_secs >= self.config.stall_seconds as f64;
        engaged.then_some(TokenBoost {
            io_tokens: self.config.boost_io_tokens,
            mem_tokens: self.config.boost_mem_tokens,
        })
    }
}

impl WriteDispatchConfig {
    pub fn tail_rescue_policy(&self) -> TailRescuePolicy {
        TailRescuePolicy::new(self.tail_rescue.clone())
    }
}

/// Rescue state tracked across dispatch cycles, logging each transition once.
#[derive(Clone)]
pub struct TailRescueTracker {
    policy: TailRescuePolicy,
    active: bool,
    log: Option<LogSink>,
}

impl std::fmt::Debug for TailRescueTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailRescueTracker")
            .field("policy", &self.policy)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl TailRescueTracker {
    pub fn new(policy: TailRescuePolicy, log: Option<LogSink>) -> Self {
        Self {
            policy,
            active: false,
            log,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Re-evaluate for this cycle and return the boost in effect.
    pub fn observe(&mut self, remaining: u64, longest_stall_secs: f64) -> Option<TokenBoost> {
        let boost = self.policy.evaluate(remaining, longest_stall_secs);
        let active = boost.is_some();
        if active != self.active {
            self.active = active;
            match boost {
                Some(b) => {
                    info!(remaining, stall_secs = longest_stall_secs, "write tail rescue engaged");
                    emit_line(
                        self.log.as_ref(),
                        &format!(
                            "[perf] write tail rescue active: remaining={remaining}, stall={longest_stall_secs}s, boost=+{}io/+{}mem",
                            b.io_tokens, b.mem_tokens
                        ),
                    );
                }
                None => {
                    debug!("write tail rescue cleared");
                    emit_line(self.log.as_ref(), "[perf] write tail rescue cleared");
                }
            }
        }
        boost
    }
}

/// A queued write eligible for the tail worker.
#[derive(Debug, Clone, PartialEq)]
pub struct TailCandidate<'a> {
    pub lane: WriteLane,
    pub label: &'a str,
    pub estimated_bytes: Option<u64>,
    pub priority: f64,
    pub seq: Option<u64>,
}

fn lane_rank(lane: WriteLane) -> u8 {
    match lane {
        WriteLane::Massive => 0,
        WriteLane::Heavy => 1,
        WriteLane::Light => 2,
        WriteLane::UltraLight => 3,
    }
}

/// Tail-worker ordering: known size (largest first), then priority (highest
/// first), then lane (massive, heavy, light, ultra-light), then sequence, then label.
pub fn compare_tail_candidates(left: &TailCandidate<'_>, right: &TailCandidate<'_>) -> Ordering {
    let size = match (left.estimated_bytes, right.estimated_bytes) {
        (Some(l), Some(r)) => r.cmp(&l),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    size.then_with(|| right.priority.total_cmp(&left.priority))
        .then_with(|| lane_rank(left.lane).cmp(&lane_rank(right.lane)))
        .then_with(|| left.seq.unwrap_or(u64::MAX).cmp(&right.seq.unwrap_or(u64::MAX)))
        .then_with(|| left.label.cmp(right.label))
}

/// Index of the candidate the tail worker should take next.
pub fn select_tail_candidate(candidates: &[TailCandidate<'_>]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by(|(_, l), (_, r)| compare_tail_candidates(l, r))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn policy() -> TailRescuePolicy {
        TailRescuePolicy::new(TailRescueConfig::default())
    }

    fn candidate(lane: WriteLane, label: &str, bytes: Option<u64>) -> TailCandidate<'_> {
        TailCandidate {
            lane,
            label,
            estimated_bytes: bytes,
            priority: 0.0,
            seq: None,
        }
    }

    #[test]
    fn engages_only_on_short_stalled_tail() {
        let p = policy();
        assert_eq!(
            p.evaluate(2, 20.0),
            Some(TokenBoost {
                io_tokens: 1,
                mem_tokens: 1
            })
        );
        assert_eq!(p.evaluate(0, 20.0), None);
        assert_eq!(p.evaluate(4, 20.0), None);
        assert_eq!(p.evaluate(3, 14.9), None);

        let disabled = TailRescuePolicy::new(TailRescueConfig {
            enabled: false,
            ..TailRescueConfig::default()
        });
        assert_eq!(disabled.evaluate(1, 100.0), None);
    }

    #[test]
    fn boost_adds_tokens() {
        let boost = TokenBoost {
            io_tokens: 1,
            mem_tokens: 2,
        };
        assert_eq!(boost.apply(WriteTokens { io: 2, mem: 0 }), WriteTokens { io: 3, mem: 2 });
    }

    #[test]
    fn tracker_logs_transitions_once() {
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = lines.clone();
        let mut tracker = TailRescueTracker::new(
            policy(),
            Some(Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_string()))),
        );

        assert!(tracker.observe(10, 30.0).is_none());
        assert!(tracker.observe(2, 16.0).is_some());
        assert!(tracker.observe(1, 18.0).is_some());
        assert!(tracker.is_active());
        assert!(tracker.observe(0, 0.0).is_none());

        assert_eq!(
            lines.lock().unwrap().as_slice(),
            [
                "[perf] write tail rescue active: remaining=2, stall=16s, boost=+1io/+1mem",
                "[perf] write tail rescue cleared",
            ]
        );
    }

    #[test]
    fn tail_candidates_prefer_largest_known_size() {
        let candidates = [
            candidate(WriteLane::Light, "b", None),
            candidate(WriteLane::Heavy, "a", Some(10)),
            candidate(WriteLane::Massive, "c", Some(500)),
        ];
        assert_eq!(select_tail_candidate(&candidates), Some(2));
        assert_eq!(select_tail_candidate(&[]), None);
    }

    #[test]
    fn tail_candidate_tie_breaks() {
        let mut high = candidate(WriteLane::Light, "z", Some(5));
        high.priority = 3.0;
        let heavy = candidate(WriteLane::Heavy, "y", Some(5));
        assert_eq!(compare_tail_candidates(&high, &heavy), Ordering::Less);

        let light = candidate(WriteLane::Light, "a", Some(5));
        assert_eq!(compare_tail_candidates(&heavy, &light), Ordering::Less);

        let mut first = candidate(WriteLane::Light, "b", Some(5));
        first.seq = Some(1);
        assert_eq!(compare_tail_candidates(&first, &light), Ordering::Less);
        assert_eq!(
            compare_tail_candidates(&candidate(WriteLane::Light, "a", None), &candidate(WriteLane::Light, "b", None)),
            Ordering::Less
        );
    }
}
