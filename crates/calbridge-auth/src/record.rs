//! The credential record persisted per profile.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::oauth::TokenGrant;

/// Safety margin subtracted from the advertised expiry.
///
/// A token within this margin of expiring is treated as already expired so a
/// request never leaves the server with a token about to die in flight.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// A stored OAuth credential for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// The access token for API requests.
    pub access_token: String,

    /// The refresh token for obtaining new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When the access token expires. `None` means it does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// The OAuth scopes that were granted.
    pub scopes: Vec<String>,

    /// When the tokens were last obtained or refreshed.
    pub obtained_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Creates a record from a token endpoint grant.
    pub fn from_grant(grant: TokenGrant, scopes: Vec<String>) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_in.map(expires_at_from_now),
            scopes,
            obtained_at: Utc::now(),
        }
    }

    /// Returns true if the access token is expired or inside the expiry margin.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= expires_at,
            // No expiry recorded: assume the token stays valid.
            None => false,
        }
    }

    /// Applies the result of a refresh grant.
    ///
    /// When the provider rotates the refresh token the new one replaces the
    /// stored one; when the refresh response omits it, the stored refresh
    /// token is kept.
    pub fn apply_refresh(&mut self, grant: TokenGrant) {
        self.access_token = grant.access_token;
        if grant.refresh_token.is_some() {
            self.refresh_token = grant.refresh_token;
        }
        self.expires_at = grant.expires_in.map(expires_at_from_now);
        self.obtained_at = Utc::now();
    }

    /// Returns true if the granted scopes include every scope in `required`.
    ///
    /// A credential granted with fewer scopes than the tools need cannot be
    /// widened by a refresh; the caller has to run the consent flow again.
    pub fn covers(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }

    /// Returns the time until expiry, if an expiry is recorded.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|expires_at| expires_at - Utc::now())
    }
}

fn expires_at_from_now(expires_in_secs: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(access: &str, refresh: Option<&str>, expires_in: Option<i64>) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in,
        }
    }

    #[test]
    fn from_grant_sets_expiry() {
        let record = CredentialRecord::from_grant(
            grant("at", Some("rt"), Some(3600)),
            vec!["scope".to_string()],
        );
        assert_eq!(record.access_token, "at");
        assert_eq!(record.refresh_token.as_deref(), Some("rt"));
        assert!(record.expires_at.is_some());
        assert!(!record.is_expired());
    }

    #[test]
    fn expired_inside_margin() {
        let mut record = CredentialRecord::from_grant(grant("at", None, Some(3600)), vec![]);
        // 30s left is inside the 60s margin
        record.expires_at = Some(Utc::now() + Duration::seconds(30));
        assert!(record.is_expired());
    }

    #[test]
    fn no_expiry_never_expires() {
        let record = CredentialRecord::from_grant(grant("at", None, None), vec![]);
        assert!(!record.is_expired());
    }

    #[test]
    fn refresh_rotates_refresh_token() {
        let mut record =
            CredentialRecord::from_grant(grant("old-at", Some("old-rt"), Some(3600)), vec![]);
        record.apply_refresh(grant("new-at", Some("new-rt"), Some(3600)));
        assert_eq!(record.access_token, "new-at");
        assert_eq!(record.refresh_token.as_deref(), Some("new-rt"));
    }

    #[test]
    fn refresh_without_rotation_keeps_old_refresh_token() {
        let mut record =
            CredentialRecord::from_grant(grant("old-at", Some("old-rt"), Some(3600)), vec![]);
        record.apply_refresh(grant("new-at", None, Some(3600)));
        assert_eq!(record.access_token, "new-at");
        assert_eq!(record.refresh_token.as_deref(), Some("old-rt"));
    }

    #[test]
    fn covers_requires_every_scope() {
        let events = "https://www.googleapis.com/auth/calendar.events".to_string();
        let readonly = "https://www.googleapis.com/auth/calendar.readonly".to_string();
        let record =
            CredentialRecord::from_grant(grant("at", None, Some(3600)), vec![events.clone()]);

        assert!(record.covers(&[events.clone()]));
        assert!(record.covers(&[]));
        assert!(!record.covers(&[readonly.clone()]));
        assert!(!record.covers(&[events, readonly]));
    }

    #[test]
    fn empty_grant_covers_nothing() {
        let record = CredentialRecord::from_grant(grant("at", None, Some(3600)), vec![]);
        assert!(!record.covers(&["https://www.googleapis.com/auth/calendar.events".to_string()]));
    }

    #[test]
    fn serde_roundtrip() {
        let record = CredentialRecord::from_grant(
            grant("at", Some("rt"), Some(3600)),
            vec!["https://www.googleapis.com/auth/calendar.events".to_string()],
        );
        let json = serde_json::to_string(&record).unwrap();
        let parsed: CredentialRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
