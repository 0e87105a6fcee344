use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::RecordError;
use crate::model::ids::FactKey;

/// Review interval, in days, for boxes 1 through 5.
pub const BOX_INTERVAL_DAYS: [i64; 5] = [0, 1, 2, 4, 7];

/// Correct answers in a row needed before a fact moves up a box.
pub const PROMOTION_STREAK: u32 = 3;

pub const DEFAULT_DIFFICULTY: f64 = 5.0;
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;
const CORRECT_DIFFICULTY_DELTA: f64 = -0.2;
const WRONG_DIFFICULTY_DELTA: f64 = 0.5;

//
// ─── LEITNER BOX ───────────────────────────────────────────────────────────────
//

/// Spaced-repetition stage of a fact, `1` (review often) to `5` (review rarely).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct LeitnerBox(u8);

impl LeitnerBox {
    pub const FIRST: Self = Self(1);
    pub const LAST: Self = Self(5);

    /// # Errors
    ///
    /// Returns `RecordError::InvalidBox` if `value` is outside `1..=5`.
    pub fn new(value: u8) -> Result<Self, RecordError> {
        if (Self::FIRST.0..=Self::LAST.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RecordError::InvalidBox(value))
        }
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Next box up, saturating at the last box.
    #[must_use]
    pub fn promote(self) -> Self {
        Self((self.0 + 1).min(Self::LAST.0))
    }

    /// Time until a fact in this box is due again.
    #[must_use]
    pub fn interval(self) -> Duration {
        Duration::days(BOX_INTERVAL_DAYS[usize::from(self.0 - 1)])
    }
}

impl Default for LeitnerBox {
    fn default() -> Self {
        Self::FIRST
    }
}

impl TryFrom<u8> for LeitnerBox {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LeitnerBox> for u8 {
    fn from(value: LeitnerBox) -> Self {
        value.0
    }
}

//
// ─── RESPONSE OUTCOME ──────────────────────────────────────────────────────────
//

/// What happened when a fact was presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Correct,
    Wrong,
    /// No answer within the response window. Scored like a wrong answer.
    TimedOut,
}

impl ResponseOutcome {
    #[must_use]
    pub fn from_correct(is_correct: bool) -> Self {
        if is_correct { Self::Correct } else { Self::Wrong }
    }

    #[must_use]
    pub fn is_correct(self) -> bool {
        matches!(self, Self::Correct)
    }

    #[must_use]
    pub fn timed_out(self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

//
// ─── FACT RECORD ───────────────────────────────────────────────────────────────
//

/// Mastery state of a single fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub fact: FactKey,
    pub attempts: u32,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub streak: u32,
    /// Running mean response latency, in seconds.
    pub avg_time_secs: f64,
    pub leitner_box: LeitnerBox,
    pub difficulty_rating: f64,
    pub last_practiced: Option<DateTime<Utc>>,
    pub next_practice_due: DateTime<Utc>,
}

/// Copy of the mastery fields of a record at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterySnapshot {
    pub attempts: u32,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub streak: u32,
    pub avg_time_secs: f64,
    pub leitner_box: LeitnerBox,
    pub difficulty_rating: f64,
    pub last_practiced: Option<DateTime<Utc>>,
    pub next_practice_due: DateTime<Utc>,
}

impl FactRecord {
    /// A never-practised fact: box 1, default difficulty, due at `now`.
    #[must_use]
    pub fn new(fact: FactKey, now: DateTime<Utc>) -> Self {
        Self {
            fact,
            attempts: 0,
            correct_count: 0,
            wrong_count: 0,
            streak: 0,
            avg_time_secs: 0.0,
            leitner_box: LeitnerBox::FIRST,
            difficulty_rating: DEFAULT_DIFFICULTY,
            last_practiced: None,
            next_practice_due: now,
        }
    }

    /// Rehydrate a record from storage, checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if counts, box, difficulty, streak or average
    /// time are inconsistent.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        fact: FactKey,
        attempts: u32,
        correct_count: u32,
        wrong_count: u32,
        streak: u32,
        avg_time_secs: f64,
        leitner_box: u8,
        difficulty_rating: f64,
        last_practiced: Option<DateTime<Utc>>,
        next_practice_due: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        if correct_count.checked_add(wrong_count) != Some(attempts) {
            return Err(RecordError::CountMismatch {
                attempts,
                correct: correct_count,
                wrong: wrong_count,
            });
        }
        if streak > correct_count {
            return Err(RecordError::StreakOverflow {
                streak,
                correct: correct_count,
            });
        }
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty_rating) {
            return Err(RecordError::InvalidDifficulty(difficulty_rating));
        }
        if !avg_time_secs.is_finite() || avg_time_secs < 0.0 {
            return Err(RecordError::InvalidAverageTime(avg_time_secs));
        }

        Ok(Self {
            fact,
            attempts,
            correct_count,
            wrong_count,
            streak,
            avg_time_secs,
            leitner_box: LeitnerBox::new(leitner_box)?,
            difficulty_rating,
            last_practiced,
            next_practice_due,
        })
    }

    /// Share of attempts answered correctly; `0.0` for an unseen fact.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.correct_count) / f64::from(self.attempts)
        }
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_practice_due <= now
    }

    #[must_use]
    pub fn snapshot(&self) -> MasterySnapshot {
        MasterySnapshot {
            attempts: self.attempts,
            correct_count: self.correct_count,
            wrong_count: self.wrong_count,
            streak: self.streak,
            avg_time_secs: self.avg_time_secs,
            leitner_box: self.leitner_box,
            difficulty_rating: self.difficulty_rating,
            last_practiced: self.last_practiced,
            next_practice_due: self.next_practice_due,
        }
    }

    /// Applies one response to this record.
    ///
    /// A wrong or timed-out answer drops the fact back to box 1. A correct
    /// answer only promotes once the streak has reached
    /// [`PROMOTION_STREAK`]. The due date always follows the resulting box.
    pub fn apply_response(
        &mut self,
        outcome: ResponseOutcome,
        response_time_ms: u64,
        at: DateTime<Utc>,
    ) {
        self.attempts = self.attempts.saturating_add(1);
        self.avg_time_secs =
            running_mean(self.avg_time_secs, self.attempts, ms_to_secs(response_time_ms));

        if outcome.is_correct() {
            self.correct_count = self.correct_count.saturating_add(1);
            self.streak = self.streak.saturating_add(1);
            self.difficulty_rating =
                clamp_difficulty(self.difficulty_rating + CORRECT_DIFFICULTY_DELTA);
            if self.streak >= PROMOTION_STREAK {
                self.leitner_box = self.leitner_box.promote();
            }
        } else {
            self.wrong_count = self.wrong_count.saturating_add(1);
            self.streak = 0;
            self.difficulty_rating =
                clamp_difficulty(self.difficulty_rating + WRONG_DIFFICULTY_DELTA);
            self.leitner_box = LeitnerBox::FIRST;
        }

        self.last_practiced = Some(at);
        self.next_practice_due = at + self.leitner_box.interval();
    }
}

#[allow(clippy::cast_precision_loss)]
fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Mean of `count` samples given the mean of the first `count - 1` and the newest.
fn running_mean(previous: f64, count: u32, sample: f64) -> f64 {
    if count <= 1 {
        return sample;
    }
    previous + (sample - previous) / f64::from(count)
}

fn clamp_difficulty(value: f64) -> f64 {
    value.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

//
// ─── RECORD SET ────────────────────────────────────────────────────────────────
//

/// The full set of mastery records, keyed and ordered by fact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactRecordSet {
    records: BTreeMap<FactKey, FactRecord>,
}

impl FactRecordSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One default record per catalog fact.
    #[must_use]
    pub fn defaults_for(catalog: &Catalog, now: DateTime<Utc>) -> Self {
        let mut set = Self::new();
        set.fill_missing(catalog, now);
        set
    }

    /// Creates default records for catalog facts that have none.
    ///
    /// Returns how many records were created.
    pub fn fill_missing(&mut self, catalog: &Catalog, now: DateTime<Utc>) -> usize {
        let mut created = 0;
        for fact in catalog.all_items() {
            self.records.entry(fact).or_insert_with(|| {
                created += 1;
                FactRecord::new(fact, now)
            });
        }
        created
    }

    /// Inserts or replaces the record for its fact.
    pub fn insert(&mut self, record: FactRecord) {
        self.records.insert(record.fact, record);
    }

    #[must_use]
    pub fn get(&self, fact: FactKey) -> Option<&FactRecord> {
        self.records.get(&fact)
    }

    pub fn get_mut(&mut self, fact: FactKey) -> Option<&mut FactRecord> {
        self.records.get_mut(&fact)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FactRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<FactRecord> for FactRecordSet {
    fn from_iter<I: IntoIterator<Item = FactRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().map(|r| (r.fact, r)).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FactRecordSet {
    type Item = &'a FactRecord;
    type IntoIter = std::collections::btree_map::Values<'a, FactKey, FactRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.values()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn assert_invariants(record: &FactRecord) {
        assert!((1..=5).contains(&record.leitner_box.value()));
        assert!((MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&record.difficulty_rating));
        assert_eq!(record.attempts, record.correct_count + record.wrong_count);
    }

    #[test]
    fn new_record_uses_defaults() {
        let now = fixed_now();
        let record = FactRecord::new(FactKey::new(2, 3), now);
        assert_eq!(record.leitner_box, LeitnerBox::FIRST);
        assert_eq!(record.difficulty_rating, 5.0);
        assert_eq!(record.next_practice_due, now);
        assert!(record.is_due(now));
        assert_eq!(record.accuracy(), 0.0);
    }

    #[test]
    fn three_correct_in_a_row_promotes_once() {
        let now = fixed_now();
        let mut record = FactRecord::new(FactKey::new(2, 2), now);

        record.apply_response(ResponseOutcome::Correct, 2_000, now);
        record.apply_response(ResponseOutcome::Correct, 2_000, now);
        assert_eq!(record.leitner_box.value(), 1);
        assert_eq!(record.next_practice_due, now);

        record.apply_response(ResponseOutcome::Correct, 2_000, now);
        assert_eq!(record.leitner_box.value(), 2);
        assert_eq!(record.streak, 3);
        assert_eq!(record.next_practice_due, now + Duration::days(1));
        assert_invariants(&record);
    }

    #[test]
    fn wrong_answer_resets_box_and_streak() {
        let now = fixed_now();
        let mut record = FactRecord::from_persisted(
            FactKey::new(3, 3),
            4,
            4,
            0,
            4,
            3.0,
            3,
            4.2,
            Some(now),
            now,
        )
        .unwrap();

        record.apply_response(ResponseOutcome::Wrong, 4_000, now);

        assert_eq!(record.leitner_box, LeitnerBox::FIRST);
        assert_eq!(record.streak, 0);
        assert!((record.difficulty_rating - 4.7).abs() < 1e-9);
        assert_eq!(record.next_practice_due, now);
        assert_invariants(&record);
    }

    #[test]
    fn timeout_counts_as_wrong() {
        let now = fixed_now();
        let mut record = FactRecord::new(FactKey::new(6, 7), now);
        record.apply_response(ResponseOutcome::Correct, 1_000, now);
        record.apply_response(ResponseOutcome::TimedOut, 30_000, now);
        assert_eq!(record.wrong_count, 1);
        assert_eq!(record.streak, 0);
        assert_eq!(record.difficulty_rating, 5.0 - 0.2 + 0.5);
    }

    #[test]
    fn box_caps_at_five() {
        let now = fixed_now();
        let mut record = FactRecord::new(FactKey::new(9, 9), now);
        for _ in 0..20 {
            record.apply_response(ResponseOutcome::Correct, 800, now);
            assert_invariants(&record);
        }
        assert_eq!(record.leitner_box, LeitnerBox::LAST);
        assert_eq!(record.next_practice_due, now + Duration::days(7));
    }

    #[test]
    fn difficulty_stays_clamped() {
        let now = fixed_now();
        let mut record = FactRecord::new(FactKey::new(4, 8), now);
        for _ in 0..30 {
            record.apply_response(ResponseOutcome::Wrong, 5_000, now);
        }
        assert_eq!(record.difficulty_rating, MAX_DIFFICULTY);
        for _ in 0..60 {
            record.apply_response(ResponseOutcome::Correct, 1_000, now);
        }
        assert_eq!(record.difficulty_rating, MIN_DIFFICULTY);
        assert_invariants(&record);
    }

    #[test]
    fn average_time_is_running_mean() {
        let now = fixed_now();
        let mut record = FactRecord::new(FactKey::new(5, 5), now);
        record.apply_response(ResponseOutcome::Correct, 2_000, now);
        record.apply_response(ResponseOutcome::Correct, 4_000, now);
        record.apply_response(ResponseOutcome::Wrong, 6_000, now);
        assert!((record.avg_time_secs - 4.0).abs() < 1e-9);
    }

    #[test]
    fn persisted_record_rejects_broken_invariants() {
        let now = fixed_now();
        let key = FactKey::new(1, 1);
        assert!(matches!(
            FactRecord::from_persisted(key, 3, 1, 1, 0, 0.0, 1, 5.0, None, now),
            Err(RecordError::CountMismatch { .. })
        ));
        assert!(matches!(
            FactRecord::from_persisted(key, 0, 0, 0, 0, 0.0, 6, 5.0, None, now),
            Err(RecordError::InvalidBox(6))
        ));
        assert!(matches!(
            FactRecord::from_persisted(key, 0, 0, 0, 0, 0.0, 1, 11.0, None, now),
            Err(RecordError::InvalidDifficulty(_))
        ));
        assert!(matches!(
            FactRecord::from_persisted(key, 1, 1, 0, 2, 0.0, 1, 5.0, None, now),
            Err(RecordError::StreakOverflow { .. })
        ));
    }

    #[test]
    fn fill_missing_only_creates_absent_records() {
        let now = fixed_now();
        let catalog = Catalog::standard();
        let mut set = FactRecordSet::new();
        let mut practised = FactRecord::new(FactKey::new(2, 2), now);
        practised.apply_response(ResponseOutcome::Correct, 1_000, now);
        set.insert(practised.clone());

        let created = set.fill_missing(&catalog, now);

        assert_eq!(created, 99);
        assert_eq!(set.len(), 100);
        assert_eq!(set.get(FactKey::new(2, 2)), Some(&practised));
    }

    #[test]
    fn leitner_box_serde_rejects_out_of_range() {
        assert!(LeitnerBox::try_from(0).is_err());
        assert_eq!(LeitnerBox::try_from(4).unwrap().interval(), Duration::days(4));
    }
}
