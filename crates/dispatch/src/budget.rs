//! Splitting a total write concurrency across work classes.
//!
//! Large (massive) writes get a small dedicated reserve so they cannot
//! monopolize the writer; small writes keep a reserve so they never queue
//! behind a long heavy tail. Explicit per-class overrides replace the seeded
//! values, then the result is fitted to the total: overflow is taken from
//! small → medium → large, spare slots go to large → medium → small.

use serde::Serialize;

use crate::config::WriteDispatchConfig;

/// Number of queued writes per work class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkClassCounts {
    pub small: u64,
    pub medium: u64,
    pub large: u64,
}

/// Explicit per-class concurrency overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkClassOverrides {
    pub small: Option<u64>,
    pub medium: Option<u64>,
    pub large: Option<u64>,
}

/// Concurrency assigned to each work class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkClassBudgets {
    pub small_concurrency: u64,
    pub medium_concurrency: u64,
    pub large_concurrency: u64,
}

impl WorkClassBudgets {
    pub fn total(&self) -> u64 {
        self.small_concurrency + self.medium_concurrency + self.large_concurrency
    }
}

fn ceil_fraction(total: u64, fraction: f64) -> u64 {
    (total as f64 * fraction).ceil() as u64
}

/// Heavy/light split of `write_concurrency`. Returns `(heavy, light)`.
fn heavy_light_split(
    write_concurrency: u64,
    light: u64,
    heavy: u64,
    heavy_override: Option<u64>,
    host_concurrency: u64,
) -> (u64, u64) {
    let total = write_concurrency.max(1);
    let heavy_target = match heavy_override.filter(|v| *v > 0) {
        Some(v) => v,
        None if heavy >= 8 && host_concurrency >= 8 => ceil_fraction(total, 0.66).max(1),
        None => total.div_ceil(2).max(1),
    };

    match (heavy > 0, light > 0) {
        (false, false) => return (0, 0),
        (false, true) => return (0, total.min(light)),
        (true, false) => return (total.min(heavy), 0),
        (true, true) => {}
    }

    let heavy_skewed = heavy >= (light * 2).max(4);
    let (reserve_ratio, reserve_floor) = if heavy_skewed { (0.2, 2) } else { (0.33, 1) };
    let reserve_cap = total.saturating_sub(1);
    let light_reserve = if reserve_cap > 0 {
        reserve_cap
            .min(reserve_floor)
            .max(light.min(reserve_cap).min(ceil_fraction(total, reserve_ratio)))
    } else {
        0
    };

    let max_heavy_budget = total.saturating_sub(light_reserve).max(1);
    let mut heavy_concurrency = heavy.min(heavy_target).min(max_heavy_budget).max(1);
    let mut light_budget = total.saturating_sub(heavy_concurrency);
    let minimum_light = light.min(light_reserve);
    if light_budget < minimum_light && heavy_concurrency > 1 {
        let shift = (minimum_light - light_budget).min(heavy_concurrency - 1);
        heavy_concurrency -= shift;
        light_budget += shift;
    }
    (heavy_concurrency, light.min(light_budget))
}

/// Seed budgets with a bounded massive reserve ahead of the heavy/light split.
fn seeded_budgets(total: u64, counts: WorkClassCounts, host_concurrency: u64) -> WorkClassBudgets {
    let regular = counts.small + counts.medium;
    if regular == 0 {
        return WorkClassBudgets {
            large_concurrency: total.min(counts.large),
            ..WorkClassBudgets::default()
        };
    }

    let mut large = 0;
    if counts.large > 0 {
        let reserve_target = ceil_fraction(total, 0.33).clamp(1, 2);
        large = counts.large.min(reserve_target).min(total.saturating_sub(1)).max(1);
    }

    let remaining = total.saturating_sub(large);
    if remaining == 0 {
        return WorkClassBudgets {
            large_concurrency: large,
            ..WorkClassBudgets::default()
        };
    }
    let (medium, small) = heavy_light_split(remaining, counts.small, counts.medium, None, host_concurrency);
    WorkClassBudgets {
        small_concurrency: small,
        medium_concurrency: medium,
        large_concurrency: large,
    }
}

/// Resolve per-class concurrency for `write_concurrency` total slots.
pub fn work_class_budgets(
    write_concurrency: u64,
    counts: WorkClassCounts,
    overrides: WorkClassOverrides,
    host_concurrency: u64,
) -> WorkClassBudgets {
    let total = write_concurrency.max(1);
    if counts.small == 0 && counts.medium == 0 && counts.large == 0 {
        return WorkClassBudgets::default();
    }

    let seeded = seeded_budgets(total, counts, host_concurrency.max(1));
    let pick = |over: Option<u64>, seeded: u64, count: u64| over.filter(|v| *v > 0).unwrap_or(seeded).min(count);
    let mut budgets = WorkClassBudgets {
        small_concurrency: pick(overrides.small, seeded.small_concurrency, counts.small),
        medium_concurrency: pick(overrides.medium, seeded.medium_concurrency, counts.medium),
        large_concurrency: pick(overrides.large, seeded.large_concurrency, counts.large),
    };

    if budgets.total() > total {
        let mut overflow = budgets.total() - total;
        for slot in [
            &mut budgets.small_concurrency,
            &mut budgets.medium_concurrency,
            &mut budgets.large_concurrency,
        ] {
            let shift = overflow.min(*slot);
            *slot -= shift;
            overflow -= shift;
        }
    }

    if budgets.total() < total {
        let mut spare = total - budgets.total();
        for (slot, count) in [
            (&mut budgets.large_concurrency, counts.large),
            (&mut budgets.medium_concurrency, counts.medium),
            (&mut budgets.small_concurrency, counts.small),
        ] {
            let grow = spare.min(count.saturating_sub(*slot));
            *slot += grow;
            spare -= grow;
        }
    }

    budgets
}

impl WriteDispatchConfig {
    /// Per-class budgets using this config's work-class overrides.
    pub fn work_class_budgets(
        &self,
        write_concurrency: u64,
        counts: WorkClassCounts,
        host_concurrency: u64,
    ) -> WorkClassBudgets {
        let overrides = WorkClassOverrides {
            small: self.work_class_small_concurrency_override,
            medium: self.work_class_medium_concurrency_override,
            large: self.work_class_large_concurrency_override,
        };
        work_class_budgets(write_concurrency, counts, overrides, host_concurrency)
    }
}
