//! Property-based tests for position invariants
//!
//! These tests use proptest to verify:
//! - Conservation: chips moved between players keep Σ net positions at zero
//! - Voided transactions never contribute
//! - Deterministic ordering regardless of input order

use proptest::prelude::*;
use rust_decimal::Decimal;
use session_ledger::{bank_balance, compute_positions, net_sum, Player, SessionId, Transaction};

/// Strategy for generating buy-ins in cents
fn buy_ins_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(100i64..100_000i64, 1..10)
}

/// Players who bought in, then passed chips around the table
fn table(buy_ins: &[i64], transfers: &[(usize, usize, i64)]) -> (Vec<Player>, Vec<Transaction>) {
    let mut chips: Vec<i64> = buy_ins.to_vec();
    for (from, to, cents) in transfers {
        let (from, to) = (from % chips.len(), to % chips.len());
        let moved = (*cents).min(chips[from]);
        chips[from] -= moved;
        chips[to] += moved;
    }

    let players = chips
        .iter()
        .enumerate()
        .map(|(i, c)| Player::new(format!("p{:02}", i), format!("Player {}", i), Decimal::new(*c, 2)))
        .collect();
    let transactions = buy_ins
        .iter()
        .enumerate()
        .map(|(i, c)| Transaction::buy_in(format!("p{:02}", i), Decimal::new(*c, 2)))
        .collect();
    (players, transactions)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: moving chips between players keeps the table zero-sum
    #[test]
    fn prop_conserved_chips_sum_to_zero(
        buy_ins in buy_ins_strategy(),
        transfers in prop::collection::vec((0usize..10, 0usize..10, 0i64..50_000), 0..30),
    ) {
        let (players, transactions) = table(&buy_ins, &transfers);
        let positions = compute_positions(&players, &transactions).unwrap();

        prop_assert_eq!(net_sum(&positions), Decimal::ZERO);
        let balance = bank_balance(&SessionId::new("prop"), &positions, Decimal::new(1, 2));
        prop_assert!(balance.is_balanced);
    }

    /// Property: a voided transaction changes nothing
    #[test]
    fn prop_voided_ignored(buy_ins in buy_ins_strategy(), extra in 1i64..100_000) {
        let (players, mut transactions) = table(&buy_ins, &[]);
        let before = compute_positions(&players, &transactions).unwrap();

        let mut voided = Transaction::cash_out("p00", Decimal::new(extra, 2));
        voided.is_voided = true;
        transactions.push(voided);

        prop_assert_eq!(compute_positions(&players, &transactions).unwrap(), before);
    }

    /// Property: positions come out sorted by player id
    #[test]
    fn prop_ordering_deterministic(buy_ins in buy_ins_strategy()) {
        let (mut players, transactions) = table(&buy_ins, &[]);
        let forward = compute_positions(&players, &transactions).unwrap();

        players.reverse();
        prop_assert_eq!(compute_positions(&players, &transactions).unwrap(), forward);
    }
}
