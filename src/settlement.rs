use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::balance::round_to_cents;
use crate::schemas::{Expense, MemberId, SettlementPayment};

#[derive(Clone, Debug, PartialEq)]
pub enum SettlementError {
    InvalidAmount,
    AmountExceedsOwed { requested: f64, outstanding: f64 },
}

impl fmt::Display for SettlementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementError::InvalidAmount => {
                write!(f, "the settlement amount must be a positive number")
            }
            SettlementError::AmountExceedsOwed {
                requested,
                outstanding,
            } => write!(
                f,
                "a settlement of {:.2} exceeds the outstanding {:.2} owed",
                requested, outstanding
            ),
        }
    }
}

impl Error for SettlementError {}

/// Pairwise debt ledger folded from per-split debts and settlement payments.
/// Keys hold the two member ids in lexical order; the value is the net amount
/// the second member owes the first, negative when the debt runs the other
/// way.
pub fn pairwise_ledger(
    expenses: &[Expense],
    settlements: &[SettlementPayment],
) -> HashMap<(MemberId, MemberId), f64> {
    let mut ledger = HashMap::new();
    for expense in expenses {
        for split in &expense.splits {
            if split.member_id == expense.paid_by {
                continue;
            }
            add_debt(&mut ledger, &split.member_id, &expense.paid_by, split.amount);
        }
    }
    for payment in settlements {
        add_debt(&mut ledger, &payment.payer, &payment.payee, -payment.amount);
    }
    ledger
}

// Lexical ordering keeps both directions of a pair in one entry.
fn add_debt(
    ledger: &mut HashMap<(MemberId, MemberId), f64>,
    debtor: &str,
    creditor: &str,
    amount: f64,
) {
    if debtor == creditor {
        return;
    }
    let (key, signed) = if creditor < debtor {
        ((creditor.to_string(), debtor.to_string()), amount)
    } else {
        ((debtor.to_string(), creditor.to_string()), -amount)
    };
    *ledger.entry(key).or_insert(0.0) += signed;
}

/// What `payer` currently owes `payee`, negative when it is `payee` who owes.
pub fn outstanding_owed(
    expenses: &[Expense],
    settlements: &[SettlementPayment],
    payer: &str,
    payee: &str,
) -> f64 {
    let ledger = pairwise_ledger(expenses, settlements);
    if payee < payer {
        ledger
            .get(&(payee.to_string(), payer.to_string()))
            .copied()
            .unwrap_or(0.0)
    } else {
        -ledger
            .get(&(payer.to_string(), payee.to_string()))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Precondition check for recording a settlement. Amounts are compared at
/// cent precision so float noise in the outstanding balance cannot block an
/// exact payoff, while one cent over is still rejected.
pub fn validate_settlement(amount: f64, outstanding: f64) -> Result<(), SettlementError> {
    if !(amount > 0.0) {
        return Err(SettlementError::InvalidAmount);
    }
    if round_to_cents(amount) > round_to_cents(outstanding) {
        return Err(SettlementError::AmountExceedsOwed {
            requested: amount,
            outstanding: outstanding.max(0.0),
        });
    }
    Ok(())
}

/// One async mutex per (group, member pair). The check-then-insert for a
/// settlement runs entirely under its pair's lock, so two concurrent payments
/// between the same members cannot both pass the outstanding-balance check
/// and jointly overpay.
#[derive(Default)]
pub struct SettlementLocks {
    locks: std::sync::Mutex<HashMap<(String, MemberId, MemberId), Arc<Mutex<()>>>>,
}

impl SettlementLocks {
    pub fn acquire(&self, group_id: &str, member_a: &str, member_b: &str) -> Arc<Mutex<()>> {
        let (first, second) = if member_a < member_b {
            (member_a, member_b)
        } else {
            (member_b, member_a)
        };
        let key = (group_id.to_string(), first.to_string(), second.to_string());
        let mut locks = self.locks.lock().unwrap();
        // An entry whose only strong reference is the map itself has no
        // holder and no waiter, so the map stays bounded by the pairs
        // currently settling.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }
}
