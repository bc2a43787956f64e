//! Mathematical settlement proofs
//!
//! A proof restates a settlement as six checked calculation steps,
//! re-derives the plan with independent algorithms, reports every rounding
//! operation, and seals the result with a SHA-256 checksum and an Ed25519
//! signature. Proofs are immutable once generated: only their exports are
//! re-rendered, and a proof that fails verification is reported, never
//! repaired.
//!
//! # Calculation steps
//!
//! ```text
//! 1. NetPosition = (CurrentChips + CashOuts) − BuyIns
//! 2. Σ NetPosition = 0
//! 3. ΣDebits = Σ |NetPosition < 0|,  ΣCredits = Σ NetPosition > 0
//! 4. Residual = NetPosition − (Received − Paid)
//! 5. NetBalance = ΣCredits − ΣDebits
//! 6. Reduction = (Direct − Optimized) / Direct × 100
//! ```

mod export;

pub use export::{Assertion, ExportFormat, ReverifyReport, StructuredExport};

use crate::{
    config::ProofConfig,
    crypto::{self, KeyPair},
    metrics::Metrics,
    optimizer::{self, Algorithm, PlanContext},
    precision::{has_sub_cent, RoundingOperation, CENT},
    types::*,
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Algorithms re-run to cross-check a plan
pub const VERIFICATION_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::Direct, Algorithm::Greedy, Algorithm::BalancedFlow];

/// One calculation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationStep {
    /// 1-based step number
    pub step: u8,
    /// Step name
    pub name: String,
    /// What the step establishes
    pub description: String,
    /// Values fed into the formula
    pub inputs: BTreeMap<String, String>,
    /// Formula applied
    pub formula: String,
    /// Numeric result
    pub result: String,
    /// Whether the result holds
    pub verified: bool,
}

/// Balance check over a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceVerification {
    /// Σ owed by net debtors
    pub total_debits: Decimal,
    /// Σ due to net creditors
    pub total_credits: Decimal,
    /// total_credits - total_debits
    pub net_balance: Decimal,
    /// Largest |residual| any player is left with
    pub max_residual: Decimal,
    /// Tolerance applied
    pub tolerance: Decimal,
    /// Net balance and residuals within tolerance
    pub is_balanced: bool,
}

/// A rounding that dropped a fractional cent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FractionalCentIssue {
    /// What was rounded
    pub subject: String,
    /// Value before rounding
    pub original: Decimal,
    /// Amount dropped
    pub loss: Decimal,
    /// Loss above tolerance
    pub exceeds_tolerance: bool,
}

/// Every rounding behind a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionReport {
    /// All conversions to cents
    pub rounding_operations: Vec<RoundingOperation>,
    /// Conversions that dropped something, plus sub-cent payments
    pub fractional_cent_issues: Vec<FractionalCentIssue>,
    /// Σ loss
    pub cumulative_loss: Decimal,
    /// Precision the plan is exact to
    pub precision: Decimal,
}

/// Independent re-run of one algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmVerification {
    /// Algorithm re-run
    pub algorithm: Algorithm,
    /// Payments it produced
    pub payment_count: usize,
    /// Net value it moves
    pub total_settled: Decimal,
    /// Largest |residual| it leaves
    pub max_residual: Decimal,
    /// Settles every position within tolerance
    pub consensus: bool,
    /// |total_settled - settled total of the proven plan|
    pub discrepancy: Decimal,
}

/// Plan the proof is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSnapshot {
    /// Positions the plan was built from
    pub positions: Vec<PlayerPosition>,
    /// The proven payments
    pub payments: Vec<Payment>,
    /// Payments in the direct baseline
    pub direct_payment_count: usize,
    /// Algorithm that produced the payments
    pub algorithm: Algorithm,
}

impl SettlementSnapshot {
    /// Display name of a player
    pub fn player_name<'a>(&'a self, player_id: &'a PlayerId) -> &'a str {
        self.positions
            .iter()
            .find(|p| &p.player_id == player_id)
            .map(|p| p.name.as_str())
            .unwrap_or_else(|| player_id.as_str())
    }
}

/// Signed outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofOutcome {
    /// Every check held
    Valid,
    /// At least one check failed
    Invalid,
}

impl fmt::Display for ProofOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofOutcome::Valid => write!(f, "valid"),
            ProofOutcome::Invalid => write!(f, "invalid"),
        }
    }
}

/// Signature block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSignature {
    /// Settlement signed
    pub settlement_id: Uuid,
    /// Signing time
    pub signed_at: DateTime<Utc>,
    /// Outcome signed
    pub outcome: ProofOutcome,
    /// Checksum signed
    pub checksum: String,
    /// Hex Ed25519 public key
    pub public_key: String,
    /// Hex Ed25519 signature
    pub signature: String,
}

impl ProofSignature {
    /// Bytes covered by the signature
    pub fn message(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}",
            self.settlement_id,
            self.signed_at.to_rfc3339(),
            self.outcome,
            self.checksum
        )
        .into_bytes()
    }
}

/// The four rendered representations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFormats {
    /// Structured JSON with assertions
    pub structured: String,
    /// Long-form narrative
    pub narrative_text: String,
    /// Message-sized text
    pub compact_text: String,
    /// Sectioned table
    pub tabular: String,
}

/// Metadata of one render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Format rendered
    pub format: ExportFormat,
    /// Payload size
    pub size_bytes: usize,
    /// SHA-256 of the payload
    pub checksum: String,
    /// Render time
    pub generated_at: DateTime<Utc>,
}

/// Mathematical proof of a settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MathematicalProof {
    /// Proof id
    pub proof_id: Uuid,
    /// Settlement id
    pub settlement_id: Uuid,
    /// Session settled
    pub session_id: SessionId,
    /// Generation time
    pub generated_at: DateTime<Utc>,
    /// Plan proven
    pub settlement: SettlementSnapshot,
    /// Steps 1-6
    pub calculation_steps: Vec<CalculationStep>,
    /// Balance check
    pub balance_verification: BalanceVerification,
    /// Rounding report
    pub precision_report: PrecisionReport,
    /// Cross-checks
    pub algorithm_verifications: Vec<AlgorithmVerification>,
    /// One-paragraph summary
    pub human_readable_summary: String,
    /// Technical notes
    pub technical_details: Vec<String>,
    /// Every check held
    pub is_valid: bool,
    /// SHA-256 over the proof content
    pub checksum: String,
    /// Signature block
    pub signature: ProofSignature,
    /// Renders made at generation
    pub export_formats: ExportFormats,
    /// Recent renders, oldest first
    pub export_history: Vec<ExportRecord>,
}

/// Content covered by the checksum
#[derive(Serialize)]
struct ProofContent<'a> {
    proof_id: &'a Uuid,
    settlement_id: &'a Uuid,
    session_id: &'a SessionId,
    generated_at: &'a DateTime<Utc>,
    settlement: &'a SettlementSnapshot,
    calculation_steps: &'a [CalculationStep],
    balance_verification: &'a BalanceVerification,
    precision_report: &'a PrecisionReport,
    algorithm_verifications: &'a [AlgorithmVerification],
    human_readable_summary: &'a str,
    technical_details: &'a [String],
    is_valid: bool,
}

impl MathematicalProof {
    /// Recompute the content checksum
    pub fn compute_checksum(&self) -> Result<String> {
        crypto::fingerprint(&ProofContent {
            proof_id: &self.proof_id,
            settlement_id: &self.settlement_id,
            session_id: &self.session_id,
            generated_at: &self.generated_at,
            settlement: &self.settlement,
            calculation_steps: &self.calculation_steps,
            balance_verification: &self.balance_verification,
            precision_report: &self.precision_report,
            algorithm_verifications: &self.algorithm_verifications,
            human_readable_summary: &self.human_readable_summary,
            technical_details: &self.technical_details,
            is_valid: self.is_valid,
        })
    }

    /// Whether every cross-check agreed
    pub fn algorithms_agree(&self) -> bool {
        algorithms_agree(&self.algorithm_verifications, self.balance_verification.tolerance)
    }
}

/// Outcome of verifying a proof
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofVerification {
    /// Proof checked
    pub proof_id: Uuid,
    /// Stored checksum matches the content
    pub checksum_valid: bool,
    /// Signature matches the signature block
    pub signature_valid: bool,
    /// Balance re-check holds and matches the stored one
    pub balance_valid: bool,
    /// Algorithm re-runs agree
    pub algorithms_valid: bool,
    /// Older than the retention window
    pub is_stale: bool,
    /// Age at verification
    pub age_hours: i64,
    /// Every check passed
    pub is_valid: bool,
    /// What failed
    pub issues: Vec<String>,
    /// Verification time
    pub verified_at: DateTime<Utc>,
}

/// Proof generator
pub struct ProofGenerator {
    keypair: KeyPair,
    metrics: Option<Arc<Metrics>>,
}

impl fmt::Debug for ProofGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofGenerator")
            .field("keypair", &self.keypair)
            .finish()
    }
}

impl ProofGenerator {
    /// Create generator, signing with the configured seed or a random key
    pub fn new(config: &ProofConfig) -> Result<Self> {
        let keypair = match &config.signing_seed {
            Some(seed) => KeyPair::from_hex_seed(seed)?,
            None => KeyPair::generate(),
        };
        Ok(Self {
            keypair,
            metrics: None,
        })
    }

    /// Record metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Hex public key proofs are signed with
    pub fn public_key(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Generate the proof of an optimization result
    pub fn generate(&self, config: &ProofConfig, result: &OptimizationResult) -> Result<MathematicalProof> {
        let tolerance = config.tolerance;
        let settlement = SettlementSnapshot {
            positions: result.positions.clone(),
            payments: result.optimized_payments.clone(),
            direct_payment_count: result.direct_payments.len(),
            algorithm: result.algorithm_used(),
        };

        let calculation_steps = calculation_steps(&settlement, tolerance);
        let balance_verification = verify_balance(&settlement, tolerance);
        let precision_report = precision_report(&settlement, tolerance)?;
        let algorithm_verifications = verify_algorithms(&settlement, tolerance)?;

        let is_valid = calculation_steps.iter().all(|s| s.verified)
            && balance_verification.is_balanced
            && algorithms_agree(&algorithm_verifications, tolerance)
            && !precision_report.fractional_cent_issues.iter().any(|i| i.exceeds_tolerance);

        let settlement_id = Uuid::now_v7();
        let generated_at = Utc::now();
        let human_readable_summary = summary(&result.session_id, &settlement, &balance_verification, is_valid);
        let technical_details = technical_details(result, &precision_report, &self.keypair);

        let mut proof = MathematicalProof {
            proof_id: Uuid::new_v4(),
            settlement_id,
            session_id: result.session_id.clone(),
            generated_at,
            settlement,
            calculation_steps,
            balance_verification,
            precision_report,
            algorithm_verifications,
            human_readable_summary,
            technical_details,
            is_valid,
            checksum: String::new(),
            signature: ProofSignature {
                settlement_id,
                signed_at: generated_at,
                outcome: if is_valid { ProofOutcome::Valid } else { ProofOutcome::Invalid },
                checksum: String::new(),
                public_key: self.keypair.public_key_hex(),
                signature: String::new(),
            },
            export_formats: ExportFormats {
                structured: String::new(),
                narrative_text: String::new(),
                compact_text: String::new(),
                tabular: String::new(),
            },
            export_history: Vec::new(),
        };

        proof.checksum = proof.compute_checksum()?;
        proof.signature.checksum = proof.checksum.clone();
        proof.signature.signature = self.keypair.sign_hex(&proof.signature.message());

        let structured = self.export(config, &mut proof, ExportFormat::Structured)?;
        let narrative_text = self.export(config, &mut proof, ExportFormat::Narrative)?;
        let compact_text = self.export(config, &mut proof, ExportFormat::Compact)?;
        let tabular = self.export(config, &mut proof, ExportFormat::Tabular)?;
        proof.export_formats = ExportFormats {
            structured,
            narrative_text,
            compact_text,
            tabular,
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_proof();
        }
        if proof.is_valid {
            tracing::info!(
                "Generated proof {} for session {} (checksum {})",
                proof.proof_id,
                proof.session_id,
                &proof.checksum[..12]
            );
        } else {
            tracing::warn!(
                "Generated proof {} for session {} records a failed settlement",
                proof.proof_id,
                proof.session_id
            );
        }

        Ok(proof)
    }

    /// Verify a proof: checksum, signature, balance, algorithms, age
    pub fn verify(&self, config: &ProofConfig, proof: &MathematicalProof) -> Result<ProofVerification> {
        let tolerance = proof.balance_verification.tolerance;
        let mut issues = Vec::new();

        let checksum_valid = proof.compute_checksum()? == proof.checksum;
        if !checksum_valid {
            issues.push("Checksum does not match proof content".to_string());
        }

        let block = &proof.signature;
        let key_trusted = self.trusts(config, &block.public_key);
        if !key_trusted {
            issues.push(format!("Proof signed by untrusted key {}", block.public_key));
        }
        let signature_valid = key_trusted
            && block.checksum == proof.checksum
            && block.settlement_id == proof.settlement_id
            && crypto::verify_signature(&block.message(), &block.signature, &block.public_key);
        if key_trusted && !signature_valid {
            issues.push("Signature block does not verify".to_string());
        }

        let balance = verify_balance(&proof.settlement, tolerance);
        let steps = calculation_steps(&proof.settlement, tolerance);
        let balance_valid = balance.is_balanced
            && balance == proof.balance_verification
            && steps.iter().all(|s| s.verified);
        if !balance_valid {
            issues.push(format!(
                "Balance re-check failed (net {}, max residual {})",
                balance.net_balance, balance.max_residual
            ));
        }

        let algorithms = verify_algorithms(&proof.settlement, tolerance)?;
        let algorithms_valid = algorithms_agree(&algorithms, tolerance);
        if !algorithms_valid {
            issues.push("Independent algorithms disagree".to_string());
        }

        let verified_at = Utc::now();
        let age = verified_at - proof.generated_at;
        let is_stale = age > Duration::days(config.retention_days);
        if is_stale {
            issues.push(format!(
                "Proof is {} days old, retention is {} days",
                age.num_days(),
                config.retention_days
            ));
        }

        let verification = ProofVerification {
            proof_id: proof.proof_id,
            checksum_valid,
            signature_valid,
            balance_valid,
            algorithms_valid,
            is_stale,
            age_hours: age.num_hours(),
            is_valid: issues.is_empty() && proof.is_valid,
            issues,
            verified_at,
        };

        if !verification.is_valid {
            if let Some(metrics) = &self.metrics {
                metrics.record_proof_verification_failure();
            }
            tracing::warn!(
                "Proof {} failed verification: {}",
                proof.proof_id,
                verification.issues.join("; ")
            );
        }

        Ok(verification)
    }

    /// Own key or one listed in `trusted_public_keys`
    fn trusts(&self, config: &ProofConfig, public_key: &str) -> bool {
        let own = self.keypair.public_key_hex();
        public_key.eq_ignore_ascii_case(&own)
            || config
                .trusted_public_keys
                .iter()
                .any(|k| k.eq_ignore_ascii_case(public_key))
    }

    /// Verify, turning any failure into an integrity error
    pub fn ensure_valid(&self, config: &ProofConfig, proof: &MathematicalProof) -> Result<ProofVerification> {
        let verification = self.verify(config, proof)?;
        if verification.is_valid {
            return Ok(verification);
        }

        let reason = if verification.issues.is_empty() {
            "proof records a failed settlement".to_string()
        } else {
            verification.issues.join("; ")
        };
        Err(Error::Integrity(format!("Proof {}: {}", proof.proof_id, reason)))
    }

    /// Render an export and record it in the proof's export history
    pub fn export(
        &self,
        config: &ProofConfig,
        proof: &mut MathematicalProof,
        format: ExportFormat,
    ) -> Result<String> {
        let payload = export::render(proof, format, config)?;

        proof.export_history.push(ExportRecord {
            format,
            size_bytes: payload.len(),
            checksum: hex::encode(crypto::hash_bytes(payload.as_bytes())),
            generated_at: Utc::now(),
        });
        let overflow = proof
            .export_history
            .len()
            .saturating_sub(config.export_history_limit);
        proof.export_history.drain(..overflow);

        tracing::debug!("Rendered {} export of proof {} ({} bytes)", format, proof.proof_id, payload.len());
        Ok(payload)
    }
}

fn algorithms_agree(verifications: &[AlgorithmVerification], tolerance: Decimal) -> bool {
    !verifications.is_empty()
        && verifications
            .iter()
            .all(|v| v.consensus && v.discrepancy <= tolerance)
}

fn debit_credit_totals(positions: &[PlayerPosition]) -> (Decimal, Decimal) {
    let debits = positions.iter().filter(|p| p.is_debtor()).map(|p| -p.net_position).sum();
    let credits = positions.iter().filter(|p| p.is_creditor()).map(|p| p.net_position).sum();
    (debits, credits)
}

fn max_residual(positions: &[PlayerPosition], payments: &[Payment]) -> Decimal {
    residuals(positions, payments)
        .values()
        .map(|r| r.abs())
        .max()
        .unwrap_or(Decimal::ZERO)
}

fn verify_balance(settlement: &SettlementSnapshot, tolerance: Decimal) -> BalanceVerification {
    let (total_debits, total_credits) = debit_credit_totals(&settlement.positions);
    let net_balance = total_credits - total_debits;
    let max_residual = max_residual(&settlement.positions, &settlement.payments);

    BalanceVerification {
        total_debits,
        total_credits,
        net_balance,
        max_residual,
        tolerance,
        is_balanced: net_balance.abs() <= tolerance && max_residual <= tolerance,
    }
}

fn calculation_steps(settlement: &SettlementSnapshot, tolerance: Decimal) -> Vec<CalculationStep> {
    let positions = &settlement.positions;
    let payments = &settlement.payments;
    let (debits, credits) = debit_credit_totals(positions);

    // 1. Net positions
    let mut inputs = BTreeMap::new();
    let mut consistent = true;
    for p in positions {
        consistent &= p.recomputed_net() == p.net_position;
        inputs.insert(
            p.player_id.to_string(),
            format!("({} + {}) − {} = {}", p.current_chips, p.cash_outs, p.buy_ins, p.net_position),
        );
    }
    let net_positions = CalculationStep {
        step: 1,
        name: "Net Positions".to_string(),
        description: "Each player's net position follows from chips, cash-outs and buy-ins".to_string(),
        inputs,
        formula: "NetPosition = (CurrentChips + CashOuts) − BuyIns".to_string(),
        result: format!("{} positions", positions.len()),
        verified: consistent,
    };

    // 2. Zero sum
    let sum: Decimal = positions.iter().map(|p| p.net_position).sum();
    let zero_sum = CalculationStep {
        step: 2,
        name: "Zero-Sum".to_string(),
        description: "Money is neither created nor destroyed at the table".to_string(),
        inputs: BTreeMap::from([
            ("players".to_string(), positions.len().to_string()),
            ("tolerance".to_string(), tolerance.to_string()),
        ]),
        formula: "Σ NetPosition = 0".to_string(),
        result: sum.to_string(),
        verified: sum.abs() <= tolerance,
    };

    // 3. Debtor and creditor totals
    let totals = CalculationStep {
        step: 3,
        name: "Debtor/Creditor Totals".to_string(),
        description: "What debtors owe equals what creditors are due".to_string(),
        inputs: BTreeMap::from([
            (
                "debtors".to_string(),
                positions.iter().filter(|p| p.is_debtor()).count().to_string(),
            ),
            (
                "creditors".to_string(),
                positions.iter().filter(|p| p.is_creditor()).count().to_string(),
            ),
        ]),
        formula: "ΣDebits = Σ |NetPosition < 0|,  ΣCredits = Σ NetPosition > 0".to_string(),
        result: format!("ΣDebits = {}, ΣCredits = {}", debits, credits),
        verified: (credits - debits).abs() <= tolerance,
    };

    // 4. Settlement coverage
    let residuals = residuals(positions, payments);
    let worst = residuals.values().map(|r| r.abs()).max().unwrap_or(Decimal::ZERO);
    let coverage = CalculationStep {
        step: 4,
        name: "Settlement Coverage".to_string(),
        description: "Every player is brought to zero by the payments".to_string(),
        inputs: residuals
            .iter()
            .map(|(id, r)| (id.to_string(), r.to_string()))
            .collect(),
        formula: "Residual = NetPosition − (Received − Paid)".to_string(),
        result: format!("max |Residual| = {}", worst),
        verified: worst <= tolerance && payments.iter().all(|p| p.amount > Decimal::ZERO),
    };

    // 5. Net balance
    let net_balance = credits - debits;
    let balance = CalculationStep {
        step: 5,
        name: "Net Balance".to_string(),
        description: "Credits and debits cancel".to_string(),
        inputs: BTreeMap::from([
            ("total_credits".to_string(), credits.to_string()),
            ("total_debits".to_string(), debits.to_string()),
        ]),
        formula: "NetBalance = ΣCredits − ΣDebits".to_string(),
        result: net_balance.to_string(),
        verified: net_balance.abs() <= tolerance,
    };

    // 6. Transaction reduction
    let direct = settlement.direct_payment_count;
    let optimized = payments.len();
    let reduction = if direct == 0 {
        0.0
    } else {
        (direct as f64 - optimized as f64) / direct as f64 * 100.0
    };
    let reduction_step = CalculationStep {
        step: 6,
        name: "Transaction Reduction".to_string(),
        description: "The plan needs no more payments than direct settlement".to_string(),
        inputs: BTreeMap::from([
            ("direct".to_string(), direct.to_string()),
            ("optimized".to_string(), optimized.to_string()),
            ("algorithm".to_string(), settlement.algorithm.to_string()),
        ]),
        formula: "Reduction = (Direct − Optimized) / Direct × 100".to_string(),
        result: format!("{:.1}%", reduction),
        verified: optimized <= direct,
    };

    vec![net_positions, zero_sum, totals, coverage, balance, reduction_step]
}

fn precision_report(settlement: &SettlementSnapshot, tolerance: Decimal) -> Result<PrecisionReport> {
    let (_, tracker) = optimizer::to_balances(&settlement.positions)?;

    let mut fractional_cent_issues: Vec<FractionalCentIssue> = tracker
        .lossy()
        .map(|op| FractionalCentIssue {
            subject: op.subject.clone(),
            original: op.original,
            loss: op.loss,
            exceeds_tolerance: op.loss.abs() > tolerance,
        })
        .collect();

    for payment in settlement.payments.iter().filter(|p| has_sub_cent(p.amount)) {
        fractional_cent_issues.push(FractionalCentIssue {
            subject: format!("payment:{}->{}", payment.from_player, payment.to_player),
            original: payment.amount,
            loss: payment.amount - crate::precision::round_cents(payment.amount),
            exceeds_tolerance: true,
        });
    }

    Ok(PrecisionReport {
        cumulative_loss: tracker.cumulative_loss(),
        rounding_operations: tracker.into_operations(),
        fractional_cent_issues,
        precision: CENT,
    })
}

fn verify_algorithms(settlement: &SettlementSnapshot, tolerance: Decimal) -> Result<Vec<AlgorithmVerification>> {
    let (balances, _) = optimizer::to_balances(&settlement.positions)?;
    let proven_total = settled_total(&settlement.payments);
    let ctx = PlanContext::unbounded(0);

    VERIFICATION_ALGORITHMS
        .into_iter()
        .map(|algorithm| {
            let plan = algorithm.compute_plan(&balances, &ctx)?;
            let payments = optimizer::to_payments(plan.transfers);
            let total_settled = settled_total(&payments);
            let max_residual = max_residual(&settlement.positions, &payments);

            Ok(AlgorithmVerification {
                algorithm,
                payment_count: payments.len(),
                total_settled,
                max_residual,
                consensus: max_residual <= tolerance,
                discrepancy: (total_settled - proven_total).abs(),
            })
        })
        .collect()
}

fn summary(
    session_id: &SessionId,
    settlement: &SettlementSnapshot,
    balance: &BalanceVerification,
    is_valid: bool,
) -> String {
    let count = settlement.payments.len();
    let direct = settlement.direct_payment_count;
    let verdict = if is_valid {
        "The settlement is mathematically exact to the cent"
    } else {
        "The settlement could NOT be proven exact"
    };

    format!(
        "Session {} settles {} players with {} payment{} instead of {}. \
         Credits {} and debits {} net to {}. \
         Cross-checked with {} independent algorithms. {}.",
        session_id,
        settlement.positions.len(),
        count,
        if count == 1 { "" } else { "s" },
        direct,
        balance.total_credits,
        balance.total_debits,
        balance.net_balance,
        VERIFICATION_ALGORITHMS.len(),
        verdict
    )
}

fn technical_details(result: &OptimizationResult, precision: &PrecisionReport, keypair: &KeyPair) -> Vec<String> {
    let mut details = vec![
        format!("Algorithm requested: {}", result.algorithm),
        format!("Algorithm used: {}", result.algorithm_used()),
        format!("Precision: {} (integer cents)", CENT),
        format!("Rounding operations: {}", precision.rounding_operations.len()),
        format!("Cumulative rounding loss: {}", precision.cumulative_loss),
        format!("Data fingerprint: {}", result.data_fingerprint),
        format!("Configuration version: {}", result.config_version),
        format!("Signed with Ed25519 key {}", keypair.public_key_hex()),
    ];
    if let Some(fallback) = &result.fallback {
        details.push(format!("Fallback: {} → {} ({})", fallback.requested, fallback.used, fallback.reason));
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::optimizer::DebtOptimizer;

    pub(super) fn proven(entries: &[(&str, &str, i64)]) -> (ProofGenerator, MathematicalProof) {
        let positions: Vec<PlayerPosition> = entries
            .iter()
            .map(|(id, name, units)| PlayerPosition::from_net(*id, *name, Decimal::from(*units)))
            .collect();
        let result = DebtOptimizer::new()
            .optimize(&OptimizerConfig::default(), &SessionId::new("s1"), &positions, None)
            .unwrap();
        let generator = ProofGenerator::new(&ProofConfig::default()).unwrap();
        let proof = generator.generate(&ProofConfig::default(), &result).unwrap();
        (generator, proof)
    }

    fn four_players() -> (ProofGenerator, MathematicalProof) {
        proven(&[
            ("alice", "Alice", 80),
            ("bob", "Bob", 50),
            ("charlie", "Charlie", -80),
            ("diana", "Diana", -50),
        ])
    }

    #[test]
    fn test_valid_proof_all_steps_verified() {
        let (_, proof) = four_players();

        assert!(proof.is_valid);
        assert_eq!(proof.calculation_steps.len(), 6);
        assert!(proof.calculation_steps.iter().all(|s| s.verified));
        assert!(proof.balance_verification.is_balanced);
        assert_eq!(proof.balance_verification.net_balance, Decimal::ZERO);
        assert_eq!(proof.algorithm_verifications.len(), 3);
        assert!(proof.algorithms_agree());
        assert_eq!(proof.signature.outcome, ProofOutcome::Valid);
        assert_eq!(proof.export_history.len(), 4);
    }

    #[test]
    fn test_verify_fresh_proof() {
        let (generator, proof) = four_players();
        let verification = generator.verify(&ProofConfig::default(), &proof).unwrap();

        assert!(verification.is_valid, "issues: {:?}", verification.issues);
        assert!(verification.checksum_valid);
        assert!(verification.signature_valid);
        assert!(!verification.is_stale);
    }

    #[test]
    fn test_tampered_payment_detected() {
        let (generator, mut proof) = four_players();
        proof.settlement.payments[0].amount += Decimal::ONE;

        let verification = generator.verify(&ProofConfig::default(), &proof).unwrap();
        assert!(!verification.checksum_valid);
        assert!(!verification.balance_valid);
        assert!(matches!(
            generator.ensure_valid(&ProofConfig::default(), &proof),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn test_forged_signature_detected() {
        let (generator, mut proof) = four_players();
        let other = KeyPair::generate();
        proof.signature.signature = other.sign_hex(&proof.signature.message());

        let verification = generator.verify(&ProofConfig::default(), &proof).unwrap();
        assert!(verification.checksum_valid);
        assert!(!verification.signature_valid);
    }

    #[test]
    fn test_resealed_with_foreign_key_rejected() {
        let (generator, mut proof) = four_players();
        let forger = KeyPair::generate();

        // Inflate every amount, keep the proof internally consistent
        let factor = Decimal::from(10);
        for position in &mut proof.settlement.positions {
            position.buy_ins *= factor;
            position.cash_outs *= factor;
            position.current_chips *= factor;
            position.net_position *= factor;
        }
        for payment in &mut proof.settlement.payments {
            payment.amount *= factor;
        }
        proof.balance_verification = verify_balance(&proof.settlement, proof.balance_verification.tolerance);
        proof.checksum = proof.compute_checksum().unwrap();
        proof.signature.checksum = proof.checksum.clone();
        proof.signature.public_key = forger.public_key_hex();
        proof.signature.signature = forger.sign_hex(&proof.signature.message());

        let config = ProofConfig::default();
        let verification = generator.verify(&config, &proof).unwrap();
        assert!(verification.checksum_valid);
        assert!(verification.balance_valid);
        assert!(!verification.signature_valid);
        assert!(!verification.is_valid);
        assert!(verification.issues.iter().any(|i| i.contains("untrusted key")));
        assert!(matches!(generator.ensure_valid(&config, &proof), Err(Error::Integrity(_))));

        // Same proof verifies once the key is explicitly trusted
        let trusting = ProofConfig {
            trusted_public_keys: vec![forger.public_key_hex()],
            ..ProofConfig::default()
        };
        assert!(generator.verify(&trusting, &proof).unwrap().signature_valid);
    }

    #[test]
    fn test_seeded_generators_verify_each_other() {
        let config = ProofConfig {
            signing_seed: Some("11".repeat(32)),
            ..ProofConfig::default()
        };
        let signer = ProofGenerator::new(&config).unwrap();
        let (_, proof) = four_players();
        let mut resigned = proof.clone();
        resigned.signature.public_key = signer.public_key();
        resigned.signature.signature = signer.keypair.sign_hex(&resigned.signature.message());

        let verifier = ProofGenerator::new(&config).unwrap();
        assert_eq!(verifier.public_key(), signer.public_key());
        assert!(verifier.verify(&config, &resigned).unwrap().signature_valid);
    }

    #[test]
    fn test_stale_proof_flagged() {
        let (generator, mut proof) = four_players();
        // Re-seal an old proof so only its age is wrong
        proof.generated_at -= Duration::days(8);
        proof.checksum = proof.compute_checksum().unwrap();
        proof.signature.checksum = proof.checksum.clone();
        proof.signature.signature = generator.keypair.sign_hex(&proof.signature.message());

        let verification = generator.verify(&ProofConfig::default(), &proof).unwrap();
        assert!(verification.checksum_valid);
        assert!(verification.is_stale);
        assert!(!verification.is_valid);
    }

    #[test]
    fn test_export_history_bounded() {
        let (generator, mut proof) = four_players();
        let config = ProofConfig {
            export_history_limit: 5,
            ..ProofConfig::default()
        };
        for _ in 0..4 {
            generator.export(&config, &mut proof, ExportFormat::Compact).unwrap();
        }

        assert_eq!(proof.export_history.len(), 5);
        assert_eq!(proof.export_history[4].format, ExportFormat::Compact);
        // Exports never change the sealed content
        assert_eq!(proof.compute_checksum().unwrap(), proof.checksum);
    }

    #[test]
    fn test_deterministic_content() {
        let (_, a) = four_players();
        let (_, b) = four_players();

        assert_eq!(a.calculation_steps, b.calculation_steps);
        assert_eq!(a.settlement, b.settlement);
        assert_eq!(a.algorithm_verifications, b.algorithm_verifications);
        // proof id and timestamps differ, so checksums do too
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn test_configured_seed_signs_reproducibly() {
        let config = ProofConfig {
            signing_seed: Some("11".repeat(32)),
            ..ProofConfig::default()
        };
        let a = ProofGenerator::new(&config).unwrap();
        let b = ProofGenerator::new(&config).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }
}
