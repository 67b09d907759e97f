//! Session model - one record per login, revocable independently.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;

/// An active session. The session id doubles as the refresh-token family
/// id: every refresh token descending from one login carries it, and reuse
/// detection revokes the whole lineage at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Sliding expiry, capped by `absolute_expires_at`.
    pub expires_at: DateTime<Utc>,
    pub absolute_expires_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    /// SHA-256 hash of the latest refresh token in this family.
    pub refresh_token_hash: String,
}

impl Session {
    pub fn new(
        user_id: Uuid,
        ip_address: String,
        user_agent: String,
        refresh_token_hash: String,
        config: &SessionConfig,
    ) -> Self {
        let now = Utc::now();
        let absolute_expires_at = now + Duration::hours(config.absolute_lifetime_hours);
        let expires_at = sliding_expiry(now, absolute_expires_at, config);
        Self {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            last_activity_at: now,
            expires_at,
            absolute_expires_at,
            ip_address,
            user_agent,
            refresh_token_hash,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Record activity, sliding the expiry forward up to the absolute cap.
    pub fn touch(&mut self, config: &SessionConfig) {
        let now = Utc::now();
        self.last_activity_at = now;
        self.expires_at = sliding_expiry(now, self.absolute_expires_at, config);
    }
}

fn sliding_expiry(
    now: DateTime<Utc>,
    absolute: DateTime<Utc>,
    config: &SessionConfig,
) -> DateTime<Utc> {
    let slid = now + Duration::minutes(config.idle_timeout_minutes);
    slid.min(absolute)
}

/// Session info for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.id,
            created_at: s.created_at,
            last_activity_at: s.last_activity_at,
            expires_at: s.expires_at,
            ip_address: s.ip_address.clone(),
            user_agent: s.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            idle_timeout_minutes: 60,
            absolute_lifetime_hours: 720,
        }
    }

    #[test]
    fn test_new_session_not_expired() {
        let s = Session::new(
            Uuid::new_v4(),
            "127.0.0.1".into(),
            "test-agent".into(),
            "hash".into(),
            &config(),
        );
        assert!(!s.is_expired());
        assert!(s.expires_at <= s.absolute_expires_at);
    }

    #[test]
    fn test_sliding_expiry_capped_by_absolute() {
        let tight = SessionConfig {
            idle_timeout_minutes: 60,
            absolute_lifetime_hours: 0,
        };
        let mut s = Session::new(
            Uuid::new_v4(),
            "127.0.0.1".into(),
            "test-agent".into(),
            "hash".into(),
            &tight,
        );
        s.touch(&tight);
        assert!(s.expires_at <= s.absolute_expires_at);
        assert!(s.is_expired());
    }

    #[test]
    fn test_touch_moves_expiry_forward() {
        let mut s = Session::new(
            Uuid::new_v4(),
            "127.0.0.1".into(),
            "test-agent".into(),
            "hash".into(),
            &config(),
        );
        s.expires_at = Utc::now() + Duration::minutes(1);
        s.touch(&config());
        assert!(s.expires_at > Utc::now() + Duration::minutes(30));
    }
}
