//! Reversible auto-corrections
//!
//! A small manual adjustment is offset by spreading its discrepancy across
//! the other active players in proportion to their chip stacks. The shares
//! sum exactly to the discrepancy and every entry has a matching rollback.

use crate::{
    precision::{allocate_proportionally, from_cents, to_cents},
    types::PlayerId,
    Error, Result,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use session_ledger::Player;
use uuid::Uuid;

/// One player's share of a correction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    /// Player
    pub player_id: PlayerId,
    /// Signed chip change
    pub chip_change: Decimal,
}

/// Proposed correction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCorrection {
    /// Correction id
    pub correction_id: Uuid,
    /// Adjustment being offset (signed)
    pub discrepancy: Decimal,
    /// Share each player absorbs; Σ shares == discrepancy
    pub shares: Vec<CorrectionEntry>,
    /// Chip changes that apply the correction
    pub apply: Vec<CorrectionEntry>,
    /// Chip changes that undo it
    pub rollback: Vec<CorrectionEntry>,
    /// How to apply
    pub instructions: Vec<String>,
    /// How to undo
    pub rollback_instructions: Vec<String>,
    /// Applying needs approval
    pub requires_approval: bool,
}

impl AutoCorrection {
    /// Σ shares
    pub fn total(&self) -> Decimal {
        self.shares.iter().map(|e| e.chip_change).sum()
    }
}

/// Propose a correction for `delta` applied to `adjusted`.
///
/// Other active players carry the correction weighted by chip stack, or
/// equally when all stacks are empty. With nobody else at the table the
/// adjusted player carries it, which amounts to a reversal.
pub fn propose(adjusted: &PlayerId, delta: Decimal, players: &[Player]) -> Result<AutoCorrection> {
    let cents = to_cents(delta)?;
    if cents == 0 {
        return Err(Error::InvalidInput("Nothing to correct".to_string()));
    }

    let mut carriers: Vec<&Player> = players
        .iter()
        .filter(|p| p.is_active && &p.player_id != adjusted)
        .collect();
    if carriers.is_empty() {
        carriers = players.iter().filter(|p| &p.player_id == adjusted).collect();
    }
    if carriers.is_empty() {
        return Err(Error::InvalidInput(format!("No player can carry a correction for {}", adjusted)));
    }
    carriers.sort_by(|a, b| a.player_id.cmp(&b.player_id));

    let weights = carriers
        .iter()
        .map(|p| to_cents(p.current_chips))
        .collect::<Result<Vec<i64>>>()?;
    let parts = allocate_proportionally(cents, &weights);

    let mut shares = Vec::new();
    let mut apply = Vec::new();
    let mut rollback = Vec::new();
    let mut instructions = Vec::new();
    let mut rollback_instructions = Vec::new();

    for (player, part) in carriers.iter().zip(parts) {
        if part == 0 {
            continue;
        }
        let share = from_cents(part);
        shares.push(CorrectionEntry {
            player_id: player.player_id.clone(),
            chip_change: share,
        });
        apply.push(CorrectionEntry {
            player_id: player.player_id.clone(),
            chip_change: -share,
        });
        rollback.push(CorrectionEntry {
            player_id: player.player_id.clone(),
            chip_change: share,
        });

        let (verb, undo) = if share > Decimal::ZERO { ("Remove", "Return") } else { ("Add", "Remove") };
        instructions.push(format!("{} {} chips {} {}", verb, share.abs(), if share > Decimal::ZERO { "from" } else { "to" }, player.name));
        rollback_instructions.push(format!("{} {} chips {} {}", undo, share.abs(), if share > Decimal::ZERO { "to" } else { "from" }, player.name));
    }

    Ok(AutoCorrection {
        correction_id: Uuid::new_v4(),
        discrepancy: from_cents(cents),
        shares,
        apply,
        rollback,
        instructions,
        rollback_instructions,
        requires_approval: true,
    })
}
