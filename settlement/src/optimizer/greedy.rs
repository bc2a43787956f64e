//! Greedy matching
//!
//! Repeatedly settles the largest open debt against the largest open
//! credit. Every step closes at least one side, so a session of n
//! non-zero players needs at most n - 1 payments.

use super::{split_sides, Balance, Deadline, Transfer};
use crate::{types::PlayerId, Result};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Compute the greedy plan
pub fn plan(balances: &[Balance], deadline: &Deadline) -> Result<Vec<Transfer>> {
    let (debtors, creditors) = split_sides(balances);

    // Max-heaps keyed on amount; equal amounts pop the lowest id first
    let mut debtors: BinaryHeap<(i64, Reverse<PlayerId>)> = debtors
        .into_iter()
        .map(|(id, cents)| (cents, Reverse(id)))
        .collect();
    let mut creditors: BinaryHeap<(i64, Reverse<PlayerId>)> = creditors
        .into_iter()
        .map(|(id, cents)| (cents, Reverse(id)))
        .collect();

    let mut transfers = Vec::new();

    while let (Some((owed, Reverse(debtor))), Some((due, Reverse(creditor)))) =
        (debtors.pop(), creditors.pop())
    {
        deadline.check("greedy optimization")?;

        let amount = owed.min(due);
        transfers.push(Transfer {
            from: debtor.clone(),
            to: creditor.clone(),
            cents: amount,
        });

        if owed > amount {
            debtors.push((owed - amount, Reverse(debtor)));
        }
        if due > amount {
            creditors.push((due - amount, Reverse(creditor)));
        }
    }

    Ok(transfers)
}
