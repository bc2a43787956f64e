//! Direct settlement (baseline)
//!
//! Each debtor, in id order, splits its debt across the creditors in
//! proportion to the credit they still have open. Every debtor/creditor
//! pair with a non-zero share gets its own payment.

use super::{split_sides, Balance, Transfer};
use crate::precision::allocate_proportionally;

/// Compute the direct plan
pub fn plan(balances: &[Balance]) -> Vec<Transfer> {
    let (debtors, creditors) = split_sides(balances);
    let mut remaining: Vec<i64> = creditors.iter().map(|(_, cents)| *cents).collect();
    let mut transfers = Vec::new();

    for (debtor, owed) in debtors {
        let pool: i64 = remaining.iter().sum();
        let owed = owed.min(pool);
        if owed == 0 {
            continue;
        }

        // Shares never exceed the remaining credit while owed <= pool
        let shares = allocate_proportionally(owed, &remaining);
        for (index, share) in shares.into_iter().enumerate() {
            if share <= 0 {
                continue;
            }
            transfers.push(Transfer {
                from: debtor.clone(),
                to: creditors[index].0.clone(),
                cents: share,
            });
            remaining[index] -= share;
        }
    }

    transfers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::tests::{assert_settles, balances};

    #[test]
    fn test_every_pair_pays() {
        let input = balances(&[("alice", 8000), ("bob", 5000), ("carol", -8000), ("dave", -5000)]);
        let transfers = plan(&input);

        assert_eq!(transfers.len(), 4);
        assert_settles(&input, &transfers);

        // carol: 8000 * 8000/13000 = 4923.07, 8000 * 5000/13000 = 3076.92
        assert_eq!(transfers[0].cents, 4923);
        assert_eq!(transfers[1].cents, 3077);
    }

    #[test]
    fn test_single_creditor() {
        let input = balances(&[("alice", 9000), ("bob", -3000), ("carol", -6000)]);
        let transfers = plan(&input);

        assert_eq!(transfers.len(), 2);
        assert!(transfers.iter().all(|t| t.to.as_str() == "alice"));
        assert_settles(&input, &transfers);
    }

    #[test]
    fn test_residual_cent_left_with_debtor() {
        // One cent more debt than credit
        let input = balances(&[("alice", 1000), ("bob", -1001)]);
        let transfers = plan(&input);

        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].cents, 1000);
    }

    #[test]
    fn test_no_debtors() {
        assert!(plan(&balances(&[("alice", 0), ("bob", 0)])).is_empty());
    }
}
