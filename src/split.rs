use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;

use crate::schemas::{MemberId, Split, SplitPolicy};

/// Tolerance used when reconciling caller-supplied amounts with an expense
/// total.
pub const EPSILON: f64 = 0.01;

#[derive(Clone, Debug, PartialEq)]
pub enum SplitError {
    InvalidParticipants,
    SplitMismatch { expected: f64, got: f64 },
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitError::InvalidParticipants => {
                write!(f, "an expense needs at least one participant, each listed once")
            }
            SplitError::SplitMismatch { expected, got } => write!(
                f,
                "the custom split amounts sum to {:.2} but the expense is {:.2}",
                got, expected
            ),
        }
    }
}

impl Error for SplitError {}

/// Computes each participant's owed share of an expense.
///
/// Equal splits divide in floating point, so a three-way split of 100.00
/// leaves each share at 33.333...; the sub-cent remainder is accepted rather
/// than rounded away. Custom splits take the caller's amounts verbatim and
/// only check that they reconcile with the total within [`EPSILON`].
pub fn compute_splits(
    amount: f64,
    participants: &[MemberId],
    policy: SplitPolicy,
    custom_amounts: Option<&HashMap<MemberId, f64>>,
) -> Result<Vec<Split>, SplitError> {
    if participants.is_empty() {
        return Err(SplitError::InvalidParticipants);
    }
    let mut seen = HashSet::new();
    if !participants.iter().all(|participant| seen.insert(participant)) {
        return Err(SplitError::InvalidParticipants);
    }

    match policy {
        SplitPolicy::Equal => {
            let share = amount / participants.len() as f64;
            Ok(participants
                .iter()
                .map(|participant| Split {
                    member_id: participant.clone(),
                    amount: share,
                })
                .collect())
        }
        SplitPolicy::Custom => {
            let splits: Vec<Split> = participants
                .iter()
                .map(|participant| Split {
                    member_id: participant.clone(),
                    amount: custom_amounts
                        .and_then(|amounts| amounts.get(participant))
                        .copied()
                        .unwrap_or(0.0),
                })
                .collect();
            let total: f64 = splits.iter().map(|split| split.amount).sum();
            if (total - amount).abs() > EPSILON {
                return Err(SplitError::SplitMismatch {
                    expected: amount,
                    got: total,
                });
            }
            Ok(splits)
        }
    }
}
