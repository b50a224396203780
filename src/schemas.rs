use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MemberId = String;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub members: Vec<Member>,
    pub expenses: Vec<Expense>,
}

impl Group {
    pub fn has_member(&self, member_id: &str) -> bool {
        self.members.iter().any(|member| member.id == member_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitPolicy {
    Equal,
    Custom,
}

/// One participant's owed share of an expense. A member appears at most once
/// per expense.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Split {
    pub member_id: MemberId,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub amount: f64,
    pub description: String,
    pub category: String,
    /// Display tag only ("PKR", "USD", ...). Amounts are never converted, so
    /// mixed tags within a group are summed as if numerically equal.
    pub currency: String,
    pub paid_by: MemberId,
    pub split_type: SplitPolicy,
    pub splits: Vec<Split>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A recorded payment between two members. Append-only: once committed it is
/// never edited or retracted.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SettlementPayment {
    pub group_id: String,
    pub payer: MemberId,
    pub payee: MemberId,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
