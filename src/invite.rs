use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// How long an invite code stays usable.
pub const INVITE_TTL_DAYS: i64 = 7;

const CODE_LENGTH: usize = 8;

/// A join code for a group. Codes stay reusable until they expire; accepting
/// one adds the accepting member to the group.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Invite {
    pub code: String,
    pub group_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invite {
    pub fn new(group_id: &str) -> Self {
        let created_at = Utc::now();
        Invite {
            code: generate_code(),
            group_id: group_id.to_string(),
            created_at,
            expires_at: created_at + Duration::days(INVITE_TTL_DAYS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_invite_is_not_expired() {
        let invite = Invite::new("g1");
        assert!(!invite.is_expired(Utc::now()));
    }

    #[test]
    fn an_invite_expires_after_the_ttl() {
        let invite = Invite::new("g1");
        assert!(!invite.is_expired(invite.created_at + Duration::days(INVITE_TTL_DAYS - 1)));
        assert!(invite.is_expired(invite.created_at + Duration::days(INVITE_TTL_DAYS)));
    }

    #[test]
    fn codes_are_short_uppercase_alphanumerics() {
        let invite = Invite::new("g1");
        assert_eq!(invite.code.len(), CODE_LENGTH);
        assert!(invite
            .code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
