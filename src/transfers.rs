use serde::Serialize;

use crate::balance::{compute_balances, round_to_cents, Balance};
use crate::schemas::{Group, MemberId, SettlementPayment};
use crate::settlement::pairwise_ledger;

/// A suggested payment. Informational only; nothing is recorded until the
/// payer submits an actual settlement.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transfer {
    pub payer: MemberId,
    pub receiver: MemberId,
    pub amount: f64,
}

// The payments that would be made with no netting across pairs: one transfer
// per indebted pair.
fn per_pair_plan(group: &Group, settlements: &[SettlementPayment]) -> Vec<Transfer> {
    let mut transfers = Vec::new();
    for ((first, second), net) in pairwise_ledger(&group.expenses, settlements) {
        let amount = round_to_cents(net.abs());
        if amount < 0.01 {
            continue;
        }
        // A positive net means the second member owes the first.
        let (payer, receiver) = if net > 0.0 {
            (second, first)
        } else {
            (first, second)
        };
        transfers.push(Transfer {
            payer,
            receiver,
            amount,
        });
    }
    transfers
}

// Greedy netting: repeatedly match the largest debtor with the largest
// creditor until both sides are exhausted.
fn greedy_plan(balances: &Balance) -> Vec<Transfer> {
    let mut debtors: Vec<(MemberId, f64)> = Vec::new();
    let mut creditors: Vec<(MemberId, f64)> = Vec::new();
    for (member, net) in balances {
        let rounded = round_to_cents(*net);
        if rounded <= -0.01 {
            debtors.push((member.clone(), -rounded));
        } else if rounded >= 0.01 {
            creditors.push((member.clone(), rounded));
        }
    }
    debtors.sort_by(|a, b| a.1.total_cmp(&b.1));
    creditors.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut transfers = Vec::new();
    while let (Some((debtor, owed)), Some((creditor, due))) = (debtors.pop(), creditors.pop()) {
        let amount = owed.min(due);
        transfers.push(Transfer {
            payer: debtor.clone(),
            receiver: creditor.clone(),
            amount: round_to_cents(amount),
        });
        let owed_rest = round_to_cents(owed - amount);
        let due_rest = round_to_cents(due - amount);
        if owed_rest >= 0.01 {
            debtors.push((debtor, owed_rest));
        }
        if due_rest >= 0.01 {
            creditors.push((creditor, due_rest));
        }
    }
    transfers
}

/// Suggested payments that would clear the group's current net balances,
/// using whichever plan needs fewer transfers.
pub fn suggest_transfers(group: &Group, settlements: &[SettlementPayment]) -> Vec<Transfer> {
    let balances = compute_balances(group, settlements);
    let simplified = greedy_plan(&balances);
    let per_pair = per_pair_plan(group, settlements);
    if simplified.len() < per_pair.len() {
        simplified
    } else {
        per_pair
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{Expense, Member, Split, SplitPolicy};
    use chrono::Utc;

    fn member(id: &str) -> Member {
        Member {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{}@example.com", id),
        }
    }

    fn equal_expense(payer: &str, amount: f64, participants: &[&str]) -> Expense {
        let share = amount / participants.len() as f64;
        Expense {
            amount,
            description: "test expense".to_string(),
            category: "Food".to_string(),
            currency: "PKR".to_string(),
            paid_by: payer.to_string(),
            split_type: SplitPolicy::Equal,
            splits: participants
                .iter()
                .map(|participant| Split {
                    member_id: participant.to_string(),
                    amount: share,
                })
                .collect(),
            notes: None,
            created_at: Utc::now(),
        }
    }

    fn group(members: &[&str], expenses: Vec<Expense>) -> Group {
        Group {
            id: "g1".to_string(),
            name: "Trip".to_string(),
            description: String::new(),
            members: members.iter().map(|id| member(id)).collect(),
            expenses,
        }
    }

    fn as_settlement(transfer: &Transfer) -> SettlementPayment {
        SettlementPayment {
            group_id: "g1".to_string(),
            payer: transfer.payer.clone(),
            payee: transfer.receiver.clone(),
            amount: transfer.amount,
            method: None,
            note: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn the_suggested_transfers_clear_the_balances() {
        let trip = group(
            &["ana", "bob", "cid"],
            vec![equal_expense("ana", 90.0, &["ana", "bob", "cid"])],
        );
        let plan = suggest_transfers(&trip, &[]);
        assert_eq!(plan.len(), 2);

        let settlements: Vec<SettlementPayment> = plan.iter().map(as_settlement).collect();
        for net in compute_balances(&trip, &settlements).values() {
            assert!(net.abs() < 0.01);
        }
    }

    #[test]
    fn a_settled_group_needs_no_transfers() {
        let trip = group(
            &["ana", "bob"],
            vec![equal_expense("ana", 100.0, &["ana", "bob"])],
        );
        let settlements = vec![as_settlement(&Transfer {
            payer: "bob".to_string(),
            receiver: "ana".to_string(),
            amount: 50.0,
        })];
        assert!(suggest_transfers(&trip, &settlements).is_empty());
    }

    #[test]
    fn netting_across_a_debt_chain_takes_the_smaller_plan() {
        // bob owes ana 30 and cid owes bob 30, which nets to a single payment
        let trip = group(
            &["ana", "bob", "cid"],
            vec![
                equal_expense("ana", 30.0, &["bob"]),
                equal_expense("bob", 30.0, &["cid"]),
            ],
        );
        let plan = suggest_transfers(&trip, &[]);
        assert_eq!(
            plan,
            vec![Transfer {
                payer: "cid".to_string(),
                receiver: "ana".to_string(),
                amount: 30.0,
            }]
        );
    }
}
