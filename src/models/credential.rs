//! Linked Fitbit account credentials.

use serde::{Deserialize, Serialize};

/// OAuth credentials for one linked account.
///
/// Stored in Firestore keyed by `external_user_id`, which is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Local user this account is linked to
    pub local_user_id: u64,
    /// Fitbit encoded user id (e.g. "22BWRX")
    pub external_user_id: String,
    pub access_token: String,
    pub access_secret: String,
}

impl Credential {
    /// Credential supplied inline by a task after the stored row is gone.
    pub fn detached(external_user_id: &str, access_token: &str, access_secret: &str) -> Self {
        Self {
            local_user_id: 0,
            external_user_id: external_user_id.to_string(),
            access_token: access_token.to_string(),
            access_secret: access_secret.to_string(),
        }
    }
}
