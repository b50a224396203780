use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schemas::{Expense, MemberId, SettlementPayment};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Expense,
    Payment,
}

/// One entry of a group's activity feed, emitted for every accepted expense
/// and settlement.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub group_id: String,
    pub member_id: MemberId,
    pub amount: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn for_expense(group_id: &str, expense: &Expense) -> Self {
        Activity {
            kind: ActivityKind::Expense,
            group_id: group_id.to_string(),
            member_id: expense.paid_by.clone(),
            amount: expense.amount,
            description: expense.description.clone(),
            created_at: expense.created_at,
        }
    }

    pub fn for_settlement(payment: &SettlementPayment) -> Self {
        let description = match &payment.note {
            Some(note) => note.clone(),
            None => format!("Settled up with {}", payment.payee),
        };
        Activity {
            kind: ActivityKind::Payment,
            group_id: payment.group_id.clone(),
            member_id: payment.payer.clone(),
            amount: payment.amount,
            description,
            created_at: payment.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_settlement_note_becomes_the_description() {
        let payment = SettlementPayment {
            group_id: "g1".to_string(),
            payer: "bob".to_string(),
            payee: "ana".to_string(),
            amount: 30.0,
            method: Some("cash".to_string()),
            note: Some("dinner payback".to_string()),
            created_at: Utc::now(),
        };
        let activity = Activity::for_settlement(&payment);
        assert_eq!(activity.kind, ActivityKind::Payment);
        assert_eq!(activity.member_id, "bob");
        assert_eq!(activity.description, "dinner payback");
        assert_eq!(activity.created_at, payment.created_at);
    }

    #[test]
    fn a_missing_note_falls_back_to_the_payee() {
        let payment = SettlementPayment {
            group_id: "g1".to_string(),
            payer: "bob".to_string(),
            payee: "ana".to_string(),
            amount: 30.0,
            method: None,
            note: None,
            created_at: Utc::now(),
        };
        assert_eq!(
            Activity::for_settlement(&payment).description,
            "Settled up with ana"
        );
    }
}
