//! Balanced-flow settlement
//!
//! Like greedy matching, but each step pairs the debtor and the creditor
//! that have taken part in the fewest payments so far. No single player
//! ends up handling most of the transfers.

use super::{split_sides, Balance, Deadline, Transfer};
use crate::{types::PlayerId, Result};
use std::cmp::Reverse;

struct Side {
    player_id: PlayerId,
    remaining: i64,
    payments: usize,
}

/// Fewest payments, then largest remaining amount, then lowest id
fn pick(sides: &[Side]) -> Option<usize> {
    sides
        .iter()
        .enumerate()
        .filter(|(_, s)| s.remaining > 0)
        .min_by_key(|(_, s)| (s.payments, Reverse(s.remaining), s.player_id.clone()))
        .map(|(index, _)| index)
}

fn sides(entries: Vec<(PlayerId, i64)>) -> Vec<Side> {
    entries
        .into_iter()
        .map(|(player_id, remaining)| Side {
            player_id,
            remaining,
            payments: 0,
        })
        .collect()
}

/// Compute the balanced-flow plan
pub fn plan(balances: &[Balance], deadline: &Deadline) -> Result<Vec<Transfer>> {
    let (debtors, creditors) = split_sides(balances);
    let mut debtors = sides(debtors);
    let mut creditors = sides(creditors);
    let mut transfers = Vec::new();

    while let (Some(d), Some(c)) = (pick(&debtors), pick(&creditors)) {
        deadline.check("balanced-flow optimization")?;

        let amount = debtors[d].remaining.min(creditors[c].remaining);
        transfers.push(Transfer {
            from: debtors[d].player_id.clone(),
            to: creditors[c].player_id.clone(),
            cents: amount,
        });

        debtors[d].remaining -= amount;
        debtors[d].payments += 1;
        creditors[c].remaining -= amount;
        creditors[c].payments += 1;
    }

    Ok(transfers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::tests::{assert_settles, balances};
    use std::collections::HashMap;

    #[test]
    fn test_spreads_payments() {
        // Greedy would have "hub" receive from all three debtors
        let input = balances(&[
            ("hub", 9000),
            ("small", 3000),
            ("x", -4000),
            ("y", -4000),
            ("z", -4000),
        ]);
        let transfers = plan(&input, &Deadline::unbounded()).unwrap();
        assert_settles(&input, &transfers);
        assert!(transfers.len() <= 4);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for t in &transfers {
            *counts.entry(t.from.as_str()).or_default() += 1;
            *counts.entry(t.to.as_str()).or_default() += 1;
        }
        assert!(counts.values().all(|c| *c <= 3), "counts: {:?}", counts);
    }

    #[test]
    fn test_two_players() {
        let input = balances(&[("alice", 2500), ("bob", -2500)]);
        let transfers = plan(&input, &Deadline::unbounded()).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_settles(&input, &transfers);
    }
}
