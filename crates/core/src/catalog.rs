use crate::error::CatalogError;
use crate::model::FactKey;

/// Highest operand of the standard catalog.
pub const STANDARD_MAX_OPERAND: u8 = 10;

/// The fixed set of facts a learner practises: every ordered operand pair
/// in `lo..=hi` on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    lo: u8,
    hi: u8,
}

impl Catalog {
    /// Operands `1..=10`, i.e. 100 facts.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            lo: 1,
            hi: STANDARD_MAX_OPERAND,
        }
    }

    /// # Errors
    ///
    /// Returns `CatalogError` if the range is empty or starts at zero.
    pub fn with_range(lo: u8, hi: u8) -> Result<Self, CatalogError> {
        if lo == 0 {
            return Err(CatalogError::ZeroOperand { lo });
        }
        if hi < lo {
            return Err(CatalogError::EmptyRange { lo, hi });
        }
        Ok(Self { lo, hi })
    }

    /// Every fact, ordered by multiplicand then multiplier.
    pub fn all_items(&self) -> impl Iterator<Item = FactKey> + '_ {
        let (lo, hi) = (self.lo, self.hi);
        (lo..=hi).flat_map(move |a| (lo..=hi).map(move |b| FactKey::new(a, b)))
    }

    #[must_use]
    pub fn contains(&self, fact: FactKey) -> bool {
        let range = self.lo..=self.hi;
        range.contains(&fact.multiplicand()) && range.contains(&fact.multiplier())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let side = usize::from(self.hi - self.lo) + 1;
        side * side
    }

    /// Always false: construction rejects empty ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}
