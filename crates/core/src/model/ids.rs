use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for deriving stable remote identities of facts.
const FACT_NAMESPACE: Uuid = Uuid::from_u128(0x6d1c_2f4e_8a3b_4c55_9e71_0b2d_7f3a_11c4);

/// Identity of one practice fact: an ordered pair of operands.
///
/// Ordering is by multiplicand first, then multiplier, which is the order
/// the catalog enumerates facts in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactKey {
    multiplicand: u8,
    multiplier: u8,
}

impl FactKey {
    #[must_use]
    pub fn new(multiplicand: u8, multiplier: u8) -> Self {
        Self {
            multiplicand,
            multiplier,
        }
    }

    #[must_use]
    pub fn multiplicand(&self) -> u8 {
        self.multiplicand
    }

    #[must_use]
    pub fn multiplier(&self) -> u8 {
        self.multiplier
    }

    /// The expected answer.
    #[must_use]
    pub fn product(&self) -> u16 {
        u16::from(self.multiplicand) * u16::from(self.multiplier)
    }

    /// Stable identity of this fact in the remote store.
    ///
    /// Derived from the operands alone, so resolving it never needs a
    /// round trip.
    #[must_use]
    pub fn remote_id(&self) -> Uuid {
        Uuid::new_v5(&FACT_NAMESPACE, self.to_string().as_bytes())
    }
}

/// Unique identifier for a training run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh random run id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactKey({}x{})", self.multiplicand, self.multiplier)
    }
}

impl fmt::Debug for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunId({})", self.0)
    }
}

// ─── Display Implementations ───────────────────────────────────────────────────

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.multiplicand, self.multiplier)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── FromStr Implementations ───────────────────────────────────────────────────

/// Error type for parsing an id from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
    raw: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from {:?}", self.kind, self.raw)
    }
}

impl std::error::Error for ParseIdError {}

impl FromStr for FactKey {
    type Err = ParseIdError;

    /// Parses `"3x4"` (an `×` or `*` separator is also accepted).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            kind: "FactKey",
            raw: s.to_owned(),
        };
        let (a, b) = s
            .trim()
            .split_once(['x', 'X', '×', '*'])
            .ok_or_else(err)?;
        let a = a.trim().parse::<u8>().map_err(|_| err())?;
        let b = b.trim().parse::<u8>().map_err(|_| err())?;
        Ok(FactKey::new(a, b))
    }
}

impl FromStr for RunId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RunId).map_err(|_| ParseIdError {
            kind: "RunId",
            raw: s.to_owned(),
        })
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
