//! Minimum transfer count
//!
//! A plan over n non-zero players needs at least n - k payments, where k
//! is the largest number of disjoint zero-sum groups the players can be
//! partitioned into. k is found with a dynamic program over subsets:
//!
//! ```text
//! best[mask] = max over i in mask of best[mask without i]
//!              + 1 if sum[mask] == 0
//! ```
//!
//! Each group is then settled with greedy matching (|group| - 1 payments).
//! The search is exponential, so sessions above the configured player
//! limit are settled greedily instead.

use super::{greedy, Algorithm, Balance, Deadline, Plan};
use crate::Result;

/// Hard ceiling on the exhaustive search regardless of configuration
pub const MAX_EXHAUSTIVE_PLAYERS: usize = 20;

/// Masks evaluated between deadline checks
const CHECK_EVERY: usize = 1 << 10;

/// Compute the minimum-count plan
pub fn plan(balances: &[Balance], deadline: &Deadline, player_limit: usize) -> Result<Plan> {
    let active: Vec<&Balance> = balances.iter().filter(|b| b.cents != 0).collect();
    let limit = player_limit.min(MAX_EXHAUSTIVE_PLAYERS);

    if active.len() > limit {
        return delegate(
            balances,
            deadline,
            format!("{} players exceed the exhaustive search limit of {}", active.len(), limit),
        );
    }
    if active.iter().map(|b| b.cents).sum::<i64>() != 0 {
        return delegate(
            balances,
            deadline,
            "positions carry a rounding residual".to_string(),
        );
    }

    let groups = zero_sum_groups(&active, deadline)?;

    let mut transfers = Vec::new();
    for group in groups {
        let members: Vec<Balance> = group.into_iter().map(|i| active[i].clone()).collect();
        transfers.extend(greedy::plan(&members, deadline)?);
    }

    Ok(Plan {
        transfers,
        fallback: None,
    })
}

fn delegate(balances: &[Balance], deadline: &Deadline, reason: String) -> Result<Plan> {
    Ok(Plan {
        transfers: greedy::plan(balances, deadline)?,
        fallback: Some((Algorithm::Greedy, reason)),
    })
}

/// Partition into the largest number of zero-sum groups
fn zero_sum_groups(active: &[&Balance], deadline: &Deadline) -> Result<Vec<Vec<usize>>> {
    let n = active.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let full = (1usize << n) - 1;
    let mut sums = vec![0i64; full + 1];
    let mut best = vec![0u8; full + 1];

    for mask in 1..=full {
        if mask % CHECK_EVERY == 0 {
            deadline.check("minimal-transactions optimization")?;
        }

        let lowest = mask.trailing_zeros() as usize;
        sums[mask] = sums[mask & (mask - 1)] + active[lowest].cents;

        let mut bits = mask;
        let mut value = 0u8;
        while bits != 0 {
            let bit = bits & bits.wrapping_neg();
            value = value.max(best[mask ^ bit]);
            bits ^= bit;
        }
        best[mask] = value + u8::from(sums[mask] == 0);
    }

    // Walk back down, closing a group at every zero-sum mask
    let mut groups = Vec::with_capacity(best[full] as usize);
    let mut current = Vec::new();
    let mut mask = full;
    while mask != 0 {
        let target = best[mask] - u8::from(sums[mask] == 0);
        let mut bits = mask;
        let mut removed = None;
        while bits != 0 {
            let bit = bits & bits.wrapping_neg();
            if best[mask ^ bit] == target {
                removed = Some(bit);
                break;
            }
            bits ^= bit;
        }

        // Some bit always reaches the target: best[mask] was built from one
        let bit = removed.unwrap_or(mask & mask.wrapping_neg());
        current.push(bit.trailing_zeros() as usize);
        mask ^= bit;
        if sums[mask] == 0 {
            groups.push(std::mem::take(&mut current));
        }
    }

    Ok(groups)
}
