mod fact;
mod ids;
mod run;

pub use ids::{FactKey, ParseIdError, RunId};

pub use fact::{
    BOX_INTERVAL_DAYS, DEFAULT_DIFFICULTY, FactRecord, FactRecordSet, LeitnerBox,
    MAX_DIFFICULTY, MIN_DIFFICULTY, MasterySnapshot, PROMOTION_STREAK, ResponseOutcome,
};
pub use run::{FactResponse, RunError, RunStatus, RunSummary, TrainingRun};
