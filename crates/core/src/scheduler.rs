use chrono::{DateTime, Utc};
use rand::Rng;

use crate::catalog::Catalog;
use crate::model::{DEFAULT_DIFFICULTY, FactKey, FactRecord, FactRecordSet};

//
// ─── POLICY ────────────────────────────────────────────────────────────────────
//

/// Tunables for weighted fact selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    /// Average answer time, in seconds, above which a fact counts as slow.
    pub slow_threshold_secs: f64,
    /// Lower bound on any fact's weight so nothing is ever excluded.
    pub min_weight: f64,
}

impl SelectionPolicy {
    pub const DEFAULT_SLOW_THRESHOLD_SECS: f64 = 5.0;
    pub const DEFAULT_MIN_WEIGHT: f64 = 0.1;

    /// Selection weight of a fact.
    ///
    /// `(1 - accuracy) + slowness`, scaled by the difficulty rating relative
    /// to its starting value, and floored at `min_weight`. An unseen fact
    /// weighs exactly `1.0`.
    #[must_use]
    pub fn weight_for(&self, record: Option<&FactRecord>) -> f64 {
        let Some(record) = record else {
            return 1.0_f64.max(self.min_weight);
        };
        let time_bonus = ((record.avg_time_secs - self.slow_threshold_secs) / 10.0).max(0.0);
        let base = (1.0 - record.accuracy()) + time_bonus;
        let difficulty_scale = record.difficulty_rating / DEFAULT_DIFFICULTY;
        (base * difficulty_scale).max(self.min_weight)
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            slow_threshold_secs: Self::DEFAULT_SLOW_THRESHOLD_SECS,
            min_weight: Self::DEFAULT_MIN_WEIGHT,
        }
    }
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// Picks the next fact to present.
///
/// Only due facts are candidates unless none are due, in which case the
/// whole catalog is. Mastered facts are never excluded, only down-weighted.
///
/// # Examples
///
/// ```
/// # use facts_core::{Catalog, SchedulingEngine};
/// # use facts_core::model::FactRecordSet;
/// # use rand::SeedableRng;
/// let engine = SchedulingEngine::new(Catalog::standard());
/// let now = chrono::Utc::now();
/// let records = FactRecordSet::defaults_for(engine.catalog(), now);
/// let mut rng = rand::rngs::StdRng::seed_from_u64(7);
///
/// let first = engine.select_next(&records, None, now, &mut rng);
/// let second = engine.select_next(&records, Some(first), now, &mut rng);
/// assert_ne!(first, second);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchedulingEngine {
    catalog: Catalog,
    policy: SelectionPolicy,
}

impl SchedulingEngine {
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            policy: SelectionPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Catalog facts with no record or whose due date has passed.
    #[must_use]
    pub fn due_items(&self, records: &FactRecordSet, now: DateTime<Utc>) -> Vec<FactKey> {
        self.catalog
            .all_items()
            .filter(|fact| records.get(*fact).is_none_or(|r| r.is_due(now)))
            .collect()
    }

    /// Chooses the next fact using cumulative-weight sampling from `rng`.
    pub fn select_next<R: Rng + ?Sized>(
        &self,
        records: &FactRecordSet,
        previous: Option<FactKey>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> FactKey {
        let mut candidates = self.due_items(records, now);
        if candidates.is_empty() {
            candidates = self.catalog.all_items().collect();
        }
        if let Some(previous) = previous {
            if candidates.len() > 1 {
                candidates.retain(|fact| *fact != previous);
            }
        }

        let weighted: Vec<(FactKey, f64)> = candidates
            .into_iter()
            .map(|fact| (fact, self.policy.weight_for(records.get(fact))))
            .collect();

        pick_weighted(&weighted, rng)
    }
}

/// Cumulative-weight draw. `weighted` must be non-empty.
fn pick_weighted<R: Rng + ?Sized>(weighted: &[(FactKey, f64)], rng: &mut R) -> FactKey {
    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    let mut target = rng.random::<f64>() * total;
    for (fact, weight) in weighted {
        if target < *weight {
            return *fact;
        }
        target -= weight;
    }
    // Floating point drift can leave a sliver past the last bucket.
    weighted[weighted.len() - 1].0
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
