//! Proof exports
//!
//! Four renders of one proof:
//!
//! - **Structured**: JSON with embedded assertions a reader can re-check
//! - **Narrative**: long-form explanation
//! - **Compact**: message-sized, bounded line width
//! - **Tabular**: sectioned plain-text tables

use super::{BalanceVerification, CalculationStep, MathematicalProof};
use crate::{config::ProofConfig, optimizer::Algorithm, types::*, Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use uuid::Uuid;

/// Structured export layout version
pub const STRUCTURED_FORMAT_VERSION: u32 = 1;

/// Export representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// JSON with re-verification assertions
    Structured,
    /// Long-form text
    Narrative,
    /// Message-sized text
    Compact,
    /// Sectioned tables
    Tabular,
}

impl ExportFormat {
    /// Every format
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Structured,
        ExportFormat::Narrative,
        ExportFormat::Compact,
        ExportFormat::Tabular,
    ];

    fn name(&self) -> &'static str {
        match self {
            ExportFormat::Structured => "structured",
            ExportFormat::Narrative => "narrative",
            ExportFormat::Compact => "compact",
            ExportFormat::Tabular => "tabular",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ExportFormat::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown export format '{}'", s)))
    }
}

/// Render a proof
pub fn render(proof: &MathematicalProof, format: ExportFormat, config: &ProofConfig) -> Result<String> {
    match format {
        ExportFormat::Structured => Ok(serde_json::to_string_pretty(&StructuredExport::from_proof(proof))?),
        ExportFormat::Narrative => Ok(narrative(proof)),
        ExportFormat::Compact => Ok(compact(proof, config.compact_line_width, config.compact_max_items)),
        ExportFormat::Tabular => Ok(tabular(proof)),
    }
}

/// Claim a reader can re-check from the exported data alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Assertion name
    pub name: String,
    /// What is asserted
    pub expression: String,
    /// Value computed at export time
    pub expected: String,
    /// Whether it held at export time
    pub holds: bool,
}

/// Outcome of re-checking a parsed export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverifyReport {
    /// Every assertion reproduced and held
    pub passed: bool,
    /// Assertions checked
    pub checked: usize,
    /// What did not reproduce
    pub failures: Vec<String>,
}

/// Machine-readable proof export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredExport {
    /// Layout version
    pub format_version: u32,
    /// Proof id
    pub proof_id: Uuid,
    /// Settlement id
    pub settlement_id: Uuid,
    /// Session
    pub session_id: SessionId,
    /// Proof generation time
    pub generated_at: DateTime<Utc>,
    /// Proof checksum
    pub checksum: String,
    /// Proof outcome
    pub is_valid: bool,
    /// Algorithm behind the payments
    pub algorithm: Algorithm,
    /// Positions
    pub positions: Vec<PlayerPosition>,
    /// Payments in priority order
    pub payments: Vec<Payment>,
    /// Payments in the direct baseline
    pub direct_payment_count: usize,
    /// Balance totals
    pub balance: BalanceVerification,
    /// Calculation steps
    pub calculation_steps: Vec<CalculationStep>,
    /// Re-checkable claims
    pub assertions: Vec<Assertion>,
}

impl StructuredExport {
    /// Build from a proof
    pub fn from_proof(proof: &MathematicalProof) -> Self {
        let settlement = &proof.settlement;
        Self {
            format_version: STRUCTURED_FORMAT_VERSION,
            proof_id: proof.proof_id,
            settlement_id: proof.settlement_id,
            session_id: proof.session_id.clone(),
            generated_at: proof.generated_at,
            checksum: proof.checksum.clone(),
            is_valid: proof.is_valid,
            algorithm: settlement.algorithm,
            positions: settlement.positions.clone(),
            payments: settlement.payments.clone(),
            direct_payment_count: settlement.direct_payment_count,
            balance: proof.balance_verification.clone(),
            calculation_steps: proof.calculation_steps.clone(),
            assertions: assertions(
                &settlement.positions,
                &settlement.payments,
                settlement.direct_payment_count,
                proof.balance_verification.tolerance,
            ),
        }
    }

    /// Parse a structured export
    pub fn parse(json: &str) -> Result<Self> {
        let export: StructuredExport = serde_json::from_str(json)?;
        if export.format_version != STRUCTURED_FORMAT_VERSION {
            return Err(Error::InvalidInput(format!(
                "Unsupported structured export version {}",
                export.format_version
            )));
        }
        Ok(export)
    }

    /// Net value the payments move
    pub fn settled_total(&self) -> Decimal {
        settled_total(&self.payments)
    }

    /// Recompute every assertion from the exported positions and payments
    pub fn reverify(&self) -> ReverifyReport {
        let tolerance = self.balance.tolerance;
        let recomputed = assertions(&self.positions, &self.payments, self.direct_payment_count, tolerance);
        let mut failures = Vec::new();

        for assertion in &self.assertions {
            match recomputed.iter().find(|a| a.name == assertion.name) {
                None => failures.push(format!("Unknown assertion '{}'", assertion.name)),
                Some(actual) if actual != assertion => failures.push(format!(
                    "'{}' recomputes to {} (holds={}), export says {} (holds={})",
                    assertion.name, actual.expected, actual.holds, assertion.expected, assertion.holds
                )),
                Some(actual) if self.is_valid && !actual.holds => {
                    failures.push(format!("'{}' does not hold", assertion.name))
                }
                Some(_) => {}
            }
        }
        if self.assertions.len() != recomputed.len() {
            failures.push(format!(
                "Export carries {} assertions, expected {}",
                self.assertions.len(),
                recomputed.len()
            ));
        }

        let (debits, credits) = super::debit_credit_totals(&self.positions);
        if debits != self.balance.total_debits || credits != self.balance.total_credits {
            failures.push(format!(
                "Balance totals recompute to {} / {}, export says {} / {}",
                debits, credits, self.balance.total_debits, self.balance.total_credits
            ));
        }

        ReverifyReport {
            passed: failures.is_empty(),
            checked: self.assertions.len(),
            failures,
        }
    }
}

fn assertions(
    positions: &[PlayerPosition],
    payments: &[Payment],
    direct_payment_count: usize,
    tolerance: Decimal,
) -> Vec<Assertion> {
    let sum: Decimal = positions.iter().map(|p| p.net_position).sum();
    let (debits, credits) = super::debit_credit_totals(positions);
    let max_residual = super::max_residual(positions, payments);

    vec![
        Assertion {
            name: "zero_sum".to_string(),
            expression: format!("|Σ positions[].net_position| <= {}", tolerance),
            expected: sum.to_string(),
            holds: sum.abs() <= tolerance,
        },
        Assertion {
            name: "credits_equal_debits".to_string(),
            expression: format!("|ΣCredits − ΣDebits| <= {}", tolerance),
            expected: (credits - debits).to_string(),
            holds: (credits - debits).abs() <= tolerance,
        },
        Assertion {
            name: "payments_positive".to_string(),
            expression: "payments[].amount > 0".to_string(),
            expected: payments.len().to_string(),
            holds: payments.iter().all(|p| p.amount > Decimal::ZERO),
        },
        Assertion {
            name: "players_settled".to_string(),
            expression: format!("max |net_position − (received − paid)| <= {}", tolerance),
            expected: max_residual.to_string(),
            holds: max_residual <= tolerance,
        },
        Assertion {
            name: "settled_total".to_string(),
            expression: "Σ positive net flows == ΣCredits".to_string(),
            expected: settled_total(payments).to_string(),
            holds: (settled_total(payments) - credits).abs() <= tolerance,
        },
        Assertion {
            name: "payment_count_bounded".to_string(),
            expression: format!("len(payments) <= {}", direct_payment_count),
            expected: payments.len().to_string(),
            holds: payments.len() <= direct_payment_count,
        },
    ]
}

fn narrative(proof: &MathematicalProof) -> String {
    let settlement = &proof.settlement;
    let balance = &proof.balance_verification;
    let mut out = String::new();

    let _ = writeln!(out, "Settlement proof for session {}", proof.session_id);
    let _ = writeln!(out, "Generated {} (proof {})", proof.generated_at.to_rfc3339(), proof.proof_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", proof.human_readable_summary);
    let _ = writeln!(out);

    let _ = writeln!(out, "Where everyone stands.");
    for p in &settlement.positions {
        let stance = if p.is_creditor() {
            format!("is owed {}", p.net_position)
        } else if p.is_debtor() {
            format!("owes {}", -p.net_position)
        } else {
            "is even".to_string()
        };
        let _ = writeln!(
            out,
            "  {} bought in for {}, cashed out {} and holds {} chips, so {}.",
            p.name, p.buy_ins, p.cash_outs, p.current_chips, stance
        );
    }
    let _ = writeln!(out);

    if settlement.payments.is_empty() {
        let _ = writeln!(out, "Nobody needs to pay anybody.");
    } else {
        let _ = writeln!(out, "Who pays whom, largest first.");
        for payment in &settlement.payments {
            let _ = writeln!(
                out,
                "  {}. {} pays {} {}.",
                payment.priority,
                settlement.player_name(&payment.from_player),
                settlement.player_name(&payment.to_player),
                payment.amount
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Why this is correct.");
    for step in &proof.calculation_steps {
        let _ = writeln!(
            out,
            "  Step {} ({}): {}. Using {}, the result is {}, which {}.",
            step.step,
            step.name,
            step.description,
            step.formula,
            step.result,
            if step.verified { "checks out" } else { "does NOT check out" }
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Credits total {} and debits total {}, a net balance of {}; no player is left more than {} off.",
        balance.total_credits, balance.total_debits, balance.net_balance, balance.max_residual
    );
    for v in &proof.algorithm_verifications {
        let _ = writeln!(
            out,
            "  Re-running {} gives {} payment(s) moving {} ({}).",
            v.algorithm,
            v.payment_count,
            v.total_settled,
            if v.consensus && v.discrepancy <= balance.tolerance { "agrees" } else { "DISAGREES" }
        );
    }
    let issues = proof.precision_report.fractional_cent_issues.len();
    if issues > 0 {
        let _ = writeln!(
            out,
            "  {} amount(s) were rounded to the cent, losing {} in total.",
            issues, proof.precision_report.cumulative_loss
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Checksum {} signed by {}.", proof.checksum, proof.signature.public_key);

    out
}

/// Cut a line to `width` characters
fn fit(line: &str, width: usize) -> String {
    if line.chars().count() <= width {
        return line.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut cut: String = line.chars().take(width - 1).collect();
    cut.push('…');
    cut
}

fn compact(proof: &MathematicalProof, width: usize, max_items: usize) -> String {
    let settlement = &proof.settlement;
    let mut lines = Vec::new();

    let mark = if proof.is_valid { "✓" } else { "✗" };
    lines.push(format!("Settlement {} {}", proof.session_id, mark));

    let count = settlement.payments.len();
    let direct = settlement.direct_payment_count;
    if direct > 0 && count < direct {
        let reduction = (direct - count) * 100 / direct;
        lines.push(format!("{} payments (was {}, -{}%)", count, direct, reduction));
    } else {
        lines.push(format!("{} payments", count));
    }

    for payment in settlement.payments.iter().take(max_items) {
        lines.push(format!(
            "{} → {} {}",
            settlement.player_name(&payment.from_player),
            settlement.player_name(&payment.to_player),
            payment.amount
        ));
    }
    if count > max_items {
        lines.push(format!("+{} more", count - max_items));
    }

    let balance = &proof.balance_verification;
    lines.push(format!(
        "Σ {} {}",
        balance.total_credits,
        if balance.is_balanced { "balanced" } else { "UNBALANCED" }
    ));
    lines.push(format!("#{}", &proof.checksum[..proof.checksum.len().min(12)]));

    lines
        .iter()
        .map(|line| fit(line, width))
        .collect::<Vec<_>>()
        .join("\n")
}

fn rule(out: &mut String, title: &str) {
    let _ = writeln!(out, "== {} ==", title);
}

fn tabular(proof: &MathematicalProof) -> String {
    let settlement = &proof.settlement;
    let mut out = String::new();

    rule(&mut out, "POSITIONS");
    let _ = writeln!(out, "{:<16} {:>12} {:>12} {:>12} {:>12}", "PLAYER", "BUY-INS", "CASH-OUTS", "CHIPS", "NET");
    for p in &settlement.positions {
        let _ = writeln!(
            out,
            "{:<16} {:>12} {:>12} {:>12} {:>12}",
            fit(&p.name, 16),
            p.buy_ins.to_string(),
            p.cash_outs.to_string(),
            p.current_chips.to_string(),
            p.net_position.to_string()
        );
    }
    let _ = writeln!(out);

    rule(&mut out, "SETTLEMENTS");
    let _ = writeln!(out, "{:>3} {:<16} {:<16} {:>12}", "#", "FROM", "TO", "AMOUNT");
    for payment in &settlement.payments {
        let _ = writeln!(
            out,
            "{:>3} {:<16} {:<16} {:>12}",
            payment.priority,
            fit(settlement.player_name(&payment.from_player), 16),
            fit(settlement.player_name(&payment.to_player), 16),
            payment.amount.to_string()
        );
    }
    let _ = writeln!(out);

    rule(&mut out, "STEPS");
    let _ = writeln!(out, "{:>3} {:<24} {:<32} {:>3}", "#", "STEP", "RESULT", "OK");
    for step in &proof.calculation_steps {
        let _ = writeln!(
            out,
            "{:>3} {:<24} {:<32} {:>3}",
            step.step,
            fit(&step.name, 24),
            fit(&step.result, 32),
            if step.verified { "yes" } else { "NO" }
        );
    }
    let _ = writeln!(out);

    let balance = &proof.balance_verification;
    rule(&mut out, "SUMMARY");
    let rows = [
        ("Total credits", balance.total_credits.to_string()),
        ("Total debits", balance.total_debits.to_string()),
        ("Net balance", balance.net_balance.to_string()),
        ("Max residual", balance.max_residual.to_string()),
        ("Payments", settlement.payments.len().to_string()),
        ("Direct payments", settlement.direct_payment_count.to_string()),
        ("Algorithm", settlement.algorithm.to_string()),
        ("Valid", proof.is_valid.to_string()),
    ];
    for (key, value) in rows {
        let _ = writeln!(out, "{:<16} {}", key, value);
    }
    let _ = writeln!(out);

    rule(&mut out, "AUDIT TRAIL");
    let _ = writeln!(out, "{:<16} {}", "Proof", proof.proof_id);
    let _ = writeln!(out, "{:<16} {}", "Settlement", proof.settlement_id);
    let _ = writeln!(out, "{:<16} {}", "Generated", proof.generated_at.to_rfc3339());
    let _ = writeln!(out, "{:<16} {}", "Checksum", proof.checksum);
    let _ = writeln!(out, "{:<16} {} ({})", "Signed", proof.signature.signed_at.to_rfc3339(), proof.signature.outcome);
    let _ = writeln!(out, "{:<16} {}", "Public key", proof.signature.public_key);
    for record in &proof.export_history {
        let _ = writeln!(
            out,
            "{:<16} {} {} bytes at {}",
            "Export",
            record.format,
            record.size_bytes,
            record.generated_at.to_rfc3339()
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::tests::proven;

    #[test]
    fn test_structured_round_trip() {
        let (_, proof) = proven(&[("alice", "Alice", 50), ("bob", "Bob", -50)]);
        let parsed = StructuredExport::parse(&proof.export_formats.structured).unwrap();

        assert_eq!(parsed.payments, proof.settlement.payments);
        assert_eq!(parsed.balance, proof.balance_verification);
        assert_eq!(parsed.checksum, proof.checksum);

        let report = parsed.reverify();
        assert!(report.passed, "failures: {:?}", report.failures);
        assert_eq!(report.checked, 6);
    }

    #[test]
    fn test_reverify_catches_edits() {
        let (_, proof) = proven(&[("alice", "Alice", 50), ("bob", "Bob", -50)]);
        let mut parsed = StructuredExport::parse(&proof.export_formats.structured).unwrap();
        parsed.payments[0].amount = Decimal::from(40);

        let report = parsed.reverify();
        assert!(!report.passed);
        assert!(report.failures.iter().any(|f| f.contains("players_settled")));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let (_, proof) = proven(&[("alice", "Alice", 50), ("bob", "Bob", -50)]);
        let mut parsed = StructuredExport::parse(&proof.export_formats.structured).unwrap();
        parsed.format_version = 99;
        let json = serde_json::to_string(&parsed).unwrap();
        assert!(StructuredExport::parse(&json).is_err());
    }

    #[test]
    fn test_compact_truncates() {
        let entries: Vec<(String, String, i64)> = (0..8)
            .flat_map(|i| {
                [
                    (format!("c{}", i), format!("Creditor With A Very Long Name {}", i), 10 + i),
                    (format!("d{}", i), format!("Debtor {}", i), -(10 + i)),
                ]
            })
            .collect();
        let borrowed: Vec<(&str, &str, i64)> =
            entries.iter().map(|(id, name, n)| (id.as_str(), name.as_str(), *n)).collect();
        let (_, proof) = proven(&borrowed);

        let config = ProofConfig::default();
        let text = compact(&proof, config.compact_line_width, config.compact_max_items);

        assert!(text.lines().all(|l| l.chars().count() <= config.compact_line_width));
        assert!(text.contains("+3 more"));
    }

    #[test]
    fn test_fit_never_exceeds_width() {
        assert_eq!(fit("settlement", 0), "");
        assert_eq!(fit("settlement", 1), "…");
        assert_eq!(fit("settlement", 4), "set…");
        assert_eq!(fit("bob", 3), "bob");
        for width in 0..4 {
            assert!(fit("settlement", width).chars().count() <= width);
        }

        let (_, proof) = proven(&[("alice", "Alice", 50), ("bob", "Bob", -50)]);
        assert!(compact(&proof, 0, 5).lines().all(str::is_empty));
    }

    #[test]
    fn test_tabular_sections() {
        let (_, proof) = proven(&[("alice", "Alice", 50), ("bob", "Bob", -50)]);
        let table = &proof.export_formats.tabular;
        for section in ["POSITIONS", "SETTLEMENTS", "STEPS", "SUMMARY", "AUDIT TRAIL"] {
            assert!(table.contains(&format!("== {} ==", section)), "missing {}", section);
        }
    }

    #[test]
    fn test_narrative_mentions_payments() {
        let (_, proof) = proven(&[("alice", "Alice", 50), ("bob", "Bob", -50)]);
        assert!(proof.export_formats.narrative_text.contains("Bob pays Alice 50"));
    }

    #[test]
    fn test_format_names() {
        for format in ExportFormat::ALL {
            assert_eq!(format.to_string().parse::<ExportFormat>().unwrap(), format);
        }
    }
}
