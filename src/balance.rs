use std::collections::HashMap;

use serde::Serialize;

use crate::schemas::{Expense, Group, MemberId, SettlementPayment};

pub type Balance = HashMap<MemberId, f64>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub name: String,
    pub amount: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct GroupSummary {
    pub total_spent: f64,
    pub average_expense: f64,
    pub top_category: CategoryTotal,
    pub per_member_balance: Balance,
    pub viewer_balance: f64,
}

pub fn round_to_cents(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

/// Net balance per member: positive means the member is owed money.
///
/// For every expense the payer gains the amount minus their own split share
/// and every other participant loses their split share, so each expense
/// contributes zero in total. A settlement payment then moves its amount from
/// the payee's balance to the payer's.
pub fn compute_balances(group: &Group, settlements: &[SettlementPayment]) -> Balance {
    let mut balance: Balance = group
        .members
        .iter()
        .map(|member| (member.id.clone(), 0.0))
        .collect();
    for expense in &group.expenses {
        let own_share = expense
            .splits
            .iter()
            .find(|split| split.member_id == expense.paid_by)
            .map(|split| split.amount)
            .unwrap_or(0.0);
        *balance.entry(expense.paid_by.clone()).or_insert(0.0) += expense.amount - own_share;
        for split in &expense.splits {
            if split.member_id == expense.paid_by {
                continue;
            }
            *balance.entry(split.member_id.clone()).or_insert(0.0) -= split.amount;
        }
    }
    for payment in settlements {
        *balance.entry(payment.payer.clone()).or_insert(0.0) += payment.amount;
        *balance.entry(payment.payee.clone()).or_insert(0.0) -= payment.amount;
    }
    balance
}

fn category_totals(expenses: &[Expense]) -> Vec<CategoryTotal> {
    let mut totals: Vec<CategoryTotal> = Vec::new();
    for expense in expenses {
        match totals.iter_mut().find(|total| total.name == expense.category) {
            Some(total) => total.amount += expense.amount,
            None => totals.push(CategoryTotal {
                name: expense.category.clone(),
                amount: expense.amount,
            }),
        }
    }
    totals
}

/// The category with the greatest spend. Only a strict improvement replaces
/// the running best, so a tie keeps the category seen first.
pub fn top_category(expenses: &[Expense]) -> CategoryTotal {
    let mut top = CategoryTotal {
        name: "N/A".to_string(),
        amount: 0.0,
    };
    for candidate in category_totals(expenses) {
        if candidate.amount > top.amount {
            top = candidate;
        }
    }
    top
}

pub fn compute_group_summary(
    group: &Group,
    settlements: &[SettlementPayment],
    viewer: &str,
) -> GroupSummary {
    let total_spent: f64 = group.expenses.iter().map(|expense| expense.amount).sum();
    let average_expense = if group.expenses.is_empty() {
        0.0
    } else {
        total_spent / group.expenses.len() as f64
    };
    let per_member_balance = compute_balances(group, settlements);
    let viewer_balance = per_member_balance.get(viewer).copied().unwrap_or(0.0);
    GroupSummary {
        total_spent,
        average_expense,
        top_category: top_category(&group.expenses),
        per_member_balance,
        viewer_balance,
    }
}
