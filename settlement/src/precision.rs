//! Cent-precision arithmetic
//!
//! Every amount that enters an algorithm is converted to integer cents
//! exactly once. Each conversion that drops a sub-cent remainder is
//! recorded, so the loss can be reported instead of silently vanishing.

use crate::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Minimum currency unit (0.01)
pub const CENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Round to the minimum currency unit, half away from zero
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether a value carries a fractional cent
pub fn has_sub_cent(value: Decimal) -> bool {
    round_cents(value) != value
}

/// Convert to integer cents (rounding half away from zero)
pub fn to_cents(value: Decimal) -> Result<i64> {
    (round_cents(value) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| Error::InvalidInput(format!("Amount {} out of range", value)))
}

/// Convert integer cents back to a decimal amount
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// One rounding step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingOperation {
    /// What was rounded (e.g. "position:alice")
    pub subject: String,
    /// Value before rounding
    pub original: Decimal,
    /// Value after rounding
    pub rounded: Decimal,
    /// original - rounded
    pub loss: Decimal,
}

/// Collects rounding operations
#[derive(Debug, Default, Clone)]
pub struct PrecisionTracker {
    operations: Vec<RoundingOperation>,
}

impl PrecisionTracker {
    /// Create empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert to cents, recording the operation
    pub fn to_cents(&mut self, subject: impl Into<String>, value: Decimal) -> Result<i64> {
        let rounded = round_cents(value);
        self.operations.push(RoundingOperation {
            subject: subject.into(),
            original: value,
            rounded,
            loss: value - rounded,
        });
        to_cents(rounded)
    }

    /// Operations recorded so far
    pub fn operations(&self) -> &[RoundingOperation] {
        &self.operations
    }

    /// Operations that actually lost something
    pub fn lossy(&self) -> impl Iterator<Item = &RoundingOperation> {
        self.operations.iter().filter(|op| !op.loss.is_zero())
    }

    /// Net loss over all operations
    pub fn cumulative_loss(&self) -> Decimal {
        self.operations.iter().map(|op| op.loss).sum()
    }

    /// Consume into the recorded operations
    pub fn into_operations(self) -> Vec<RoundingOperation> {
        self.operations
    }
}

/// Split `total` cents across `weights` with the largest-remainder method.
///
/// The parts always sum to exactly `total`. Zero total weight splits
/// evenly. Remainder ties go to the lower index.
pub fn allocate_proportionally(total: i64, weights: &[i64]) -> Vec<i64> {
    if weights.is_empty() {
        return Vec::new();
    }

    let weights: Vec<i128> = if weights.iter().all(|w| *w <= 0) {
        vec![1; weights.len()]
    } else {
        weights.iter().map(|w| (*w).max(0) as i128).collect()
    };
    let weight_sum: i128 = weights.iter().sum();
    let total_wide = total as i128;

    let mut parts: Vec<i128> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(i128, usize)> = Vec::with_capacity(weights.len());
    for (index, weight) in weights.iter().enumerate() {
        let product = total_wide * weight;
        parts.push(product.div_euclid(weight_sum));
        remainders.push((product.rem_euclid(weight_sum), index));
    }

    let mut leftover = total_wide - parts.iter().sum::<i128>();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, index) in remainders {
        if leftover == 0 {
            break;
        }
        parts[index] += 1;
        leftover -= 1;
    }

    parts.into_iter().map(|p| p as i64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(Decimal::new(12345, 3)), Decimal::new(1235, 2)); // 12.345 -> 12.35
        assert_eq!(round_cents(Decimal::new(-12345, 3)), Decimal::new(-1235, 2));
        assert!(has_sub_cent(Decimal::new(1001, 3)));
        assert!(!has_sub_cent(Decimal::new(1050, 3))); // 1.050 == 1.05
    }

    #[test]
    fn test_cents_conversion() {
        assert_eq!(to_cents(Decimal::new(5000, 2)).unwrap(), 5000);
        assert_eq!(to_cents(Decimal::new(-15, 2)).unwrap(), -15);
        assert_eq!(from_cents(15), Decimal::new(15, 2));
        assert_eq!(CENT, Decimal::new(1, 2));
    }

    #[test]
    fn test_tracker_records_loss() {
        let mut tracker = PrecisionTracker::new();
        let cents = tracker.to_cents("position:alice", Decimal::new(33333, 3)).unwrap();
        assert_eq!(cents, 3333);
        tracker.to_cents("position:bob", Decimal::from(10)).unwrap();

        assert_eq!(tracker.operations().len(), 2);
        assert_eq!(tracker.lossy().count(), 1);
        assert_eq!(tracker.cumulative_loss(), Decimal::new(3, 3));
    }

    #[test]
    fn test_allocate_sums_exactly() {
        let parts = allocate_proportionally(100, &[1, 1, 1]);
        assert_eq!(parts, vec![34, 33, 33]);

        let parts = allocate_proportionally(15, &[300, 100]);
        assert_eq!(parts.iter().sum::<i64>(), 15);
        assert_eq!(parts, vec![11, 4]);
    }

    #[test]
    fn test_allocate_zero_weights_even_split() {
        let parts = allocate_proportionally(10, &[0, 0, 0, 0]);
        assert_eq!(parts, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_allocate_negative_total() {
        let parts = allocate_proportionally(-15, &[1, 1]);
        assert_eq!(parts.iter().sum::<i64>(), -15);
    }
}
