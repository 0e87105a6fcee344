use thiserror::Error;

/// Errors raised while building a catalog of practice facts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("operand range {lo}..={hi} is empty")]
    EmptyRange { lo: u8, hi: u8 },

    #[error("operands must start at 1, got {lo}")]
    ZeroOperand { lo: u8 },
}

/// Errors raised when a persisted mastery record violates its invariants.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum RecordError {
    #[error("box must be within 1..=5, got {0}")]
    InvalidBox(u8),

    #[error("difficulty rating must be within 1..=10, got {0}")]
    InvalidDifficulty(f64),

    #[error("attempts ({attempts}) does not match correct + wrong ({correct} + {wrong})")]
    CountMismatch {
        attempts: u32,
        correct: u32,
        wrong: u32,
    },

    #[error("streak ({streak}) exceeds correct count ({correct})")]
    StreakOverflow { streak: u32, correct: u32 },

    #[error("average response time must be finite and non-negative, got {0}")]
    InvalidAverageTime(f64),
}
