//! Hub-based settlement
//!
//! The largest creditor acts as hub: every debtor pays the hub in full and
//! the hub pays out every other creditor. Gross volume exceeds the net
//! value moved because the hub forwards money.

use super::{split_sides, Balance, Deadline, Transfer};
use crate::Result;

/// Compute the hub plan
pub fn plan(balances: &[Balance], deadline: &Deadline) -> Result<Vec<Transfer>> {
    let (debtors, creditors) = split_sides(balances);
    if debtors.is_empty() || creditors.is_empty() {
        return Ok(Vec::new());
    }

    // Largest credit; lowest id on ties (creditors are id ordered)
    let hub = creditors
        .iter()
        .fold(&creditors[0], |best, c| if c.1 > best.1 { c } else { best })
        .0
        .clone();

    let mut transfers = Vec::with_capacity(debtors.len() + creditors.len());

    for (debtor, owed) in debtors {
        deadline.check("hub optimization")?;
        transfers.push(Transfer {
            from: debtor,
            to: hub.clone(),
            cents: owed,
        });
    }

    for (creditor, due) in creditors {
        deadline.check("hub optimization")?;
        if creditor == hub {
            continue;
        }
        transfers.push(Transfer {
            from: hub.clone(),
            to: creditor,
            cents: due,
        });
    }

    Ok(transfers)
}
