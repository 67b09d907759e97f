//! Session manager: one record per login, refresh-token rotation with
//! replay detection, and per-user revocation.
//!
//! The stored refresh-token hash is swapped with a compare-and-swap so two
//! concurrent rotations of the same token produce exactly one winner; the
//! loser is treated as token reuse and the whole family is revoked.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::SessionConfig;
use crate::models::Session;
use crate::services::error::AuthError;
use crate::services::jwt::JwtService;
use crate::services::store::{Expected, KeyValueStore};

const INDEX_RETRY_LIMIT: usize = 16;

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    /// Lifetime of reuse tombstones; matches the refresh-token lifetime so
    /// any token that could still be presented finds its marker.
    tombstone_ttl: Duration,
}

fn session_key(id: Uuid) -> String {
    format!("session:{}", id)
}

fn user_index_key(user_id: Uuid) -> String {
    format!("user-sessions:{}", user_id)
}

fn tombstone_key(id: Uuid) -> String {
    format!("revoked-family:{}", id)
}

impl SessionService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: SessionConfig,
        refresh_token_expiry_days: i64,
    ) -> Self {
        Self {
            store,
            config,
            tombstone_ttl: Duration::from_secs(refresh_token_expiry_days.max(1) as u64 * 86_400),
        }
    }

    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.config.absolute_lifetime_hours.max(1) as u64 * 3_600)
    }

    /// Create a session for a fresh login.
    ///
    /// The id is chosen by the caller because the refresh token embeds it
    /// and must be minted first.
    pub async fn create(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        ip_address: String,
        user_agent: String,
        refresh_token: &str,
    ) -> Result<Session, AuthError> {
        let mut session = Session::new(
            user_id,
            ip_address,
            user_agent,
            JwtService::hash_token(refresh_token),
            &self.config,
        );
        session.id = session_id;

        let json = serde_json::to_string(&session)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("session encode: {}", e)))?;
        self.store
            .put(&session_key(session.id), &json, Some(self.session_ttl()))
            .await?;
        self.index_add(user_id, session.id).await?;

        tracing::info!(user_id = %user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<Session>, AuthError> {
        let Some(raw) = self.store.get(&session_key(session_id)).await? else {
            return Ok(None);
        };
        let session: Session = serde_json::from_str(&raw)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("session decode: {}", e)))?;
        if session.is_expired() {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Exchange a presented refresh token for a rotated session.
    ///
    /// Any mismatch between the presented token and the stored hash, a
    /// revocation tombstone, or a lost swap race is reuse: the family is
    /// revoked and `TokenReused` returned, even though the token itself
    /// was once genuine.
    pub async fn rotate(
        &self,
        presented_token: &str,
        replacement_token: &str,
    ) -> Result<Session, AuthError> {
        let session_id = JwtService::refresh_token_session_id(presented_token)?;

        if self.store.get(&tombstone_key(session_id)).await?.is_some() {
            tracing::warn!(session_id = %session_id, "Refresh token presented for revoked family");
            return Err(AuthError::TokenReused);
        }

        let Some(raw) = self.store.get(&session_key(session_id)).await? else {
            return Err(AuthError::TokenInvalid);
        };
        let session: Session = serde_json::from_str(&raw)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("session decode: {}", e)))?;

        if session.is_expired() {
            self.revoke_family(&session).await?;
            return Err(AuthError::TokenExpired);
        }

        if JwtService::hash_token(presented_token) != session.refresh_token_hash {
            tracing::warn!(
                session_id = %session_id,
                user_id = %session.user_id,
                "Refresh token hash mismatch, revoking token family"
            );
            self.revoke_family(&session).await?;
            return Err(AuthError::TokenReused);
        }

        let mut rotated = session.clone();
        rotated.refresh_token_hash = JwtService::hash_token(replacement_token);
        rotated.touch(&self.config);
        let rotated_json = serde_json::to_string(&rotated)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("session encode: {}", e)))?;

        let swapped = self
            .store
            .compare_and_swap(
                &session_key(session_id),
                Expected::Value(&raw),
                &rotated_json,
                None,
            )
            .await?;

        if !swapped {
            // A concurrent rotation won the race with the same token.
            tracing::warn!(
                session_id = %session_id,
                user_id = %session.user_id,
                "Concurrent refresh rotation lost the swap, revoking token family"
            );
            self.revoke_family(&session).await?;
            return Err(AuthError::TokenReused);
        }

        Ok(rotated)
    }

    /// Slide the session expiry forward on activity. Best-effort: a lost
    /// race just means another writer already touched it.
    pub async fn touch(&self, session_id: Uuid) -> Result<(), AuthError> {
        let Some(raw) = self.store.get(&session_key(session_id)).await? else {
            return Ok(());
        };
        let Ok(mut session) = serde_json::from_str::<Session>(&raw) else {
            return Ok(());
        };
        session.touch(&self.config);
        let json = serde_json::to_string(&session)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("session encode: {}", e)))?;
        let _ = self
            .store
            .compare_and_swap(&session_key(session_id), Expected::Value(&raw), &json, None)
            .await?;
        Ok(())
    }

    /// Revoke one session.
    pub async fn revoke(&self, session_id: Uuid) -> Result<(), AuthError> {
        if let Some(session) = self.get(session_id).await? {
            self.revoke_family(&session).await?;
        } else {
            self.store.delete(&session_key(session_id)).await?;
        }
        Ok(())
    }

    /// Revoke every session a user holds.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<usize, AuthError> {
        let ids = self.index_read(user_id).await?;
        let mut revoked = 0;
        for id in &ids {
            self.store.delete(&session_key(*id)).await?;
            self.store
                .put(&tombstone_key(*id), "revoked", Some(self.tombstone_ttl))
                .await?;
            revoked += 1;
        }
        self.store.delete(&user_index_key(user_id)).await?;
        tracing::info!(user_id = %user_id, count = revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// Live sessions for a user, pruning dead index entries as a side
    /// effect.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let ids = self.index_read(user_id).await?;
        let mut sessions = Vec::new();
        for id in ids {
            if let Some(session) = self.get(id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    async fn revoke_family(&self, session: &Session) -> Result<(), AuthError> {
        self.store.delete(&session_key(session.id)).await?;
        self.store
            .put(
                &tombstone_key(session.id),
                "revoked",
                Some(self.tombstone_ttl),
            )
            .await?;
        self.index_remove(session.user_id, session.id).await?;
        Ok(())
    }

    async fn index_read(&self, user_id: Uuid) -> Result<Vec<Uuid>, AuthError> {
        let Some(raw) = self.store.get(&user_index_key(user_id)).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("session index decode: {}", e)))
    }

    async fn index_add(&self, user_id: Uuid, session_id: Uuid) -> Result<(), AuthError> {
        let key = user_index_key(user_id);
        for _ in 0..INDEX_RETRY_LIMIT {
            match self.store.get(&key).await? {
                Some(raw) => {
                    let mut ids: Vec<Uuid> = serde_json::from_str(&raw).map_err(|e| {
                        AuthError::Internal(anyhow::anyhow!("session index decode: {}", e))
                    })?;
                    if !ids.contains(&session_id) {
                        ids.push(session_id);
                    }
                    let json = serde_json::to_string(&ids)
                        .map_err(|e| AuthError::Internal(anyhow::anyhow!("{}", e)))?;
                    if self
                        .store
                        .compare_and_swap(&key, Expected::Value(&raw), &json, None)
                        .await?
                    {
                        return Ok(());
                    }
                }
                None => {
                    let json = serde_json::to_string(&vec![session_id])
                        .map_err(|e| AuthError::Internal(anyhow::anyhow!("{}", e)))?;
                    if self
                        .store
                        .compare_and_swap(&key, Expected::Absent, &json, None)
                        .await?
                    {
                        return Ok(());
                    }
                }
            }
        }
        Err(AuthError::StoreUnavailable(anyhow::anyhow!(
            "session index contention exceeded retry limit"
        )))
    }

    async fn index_remove(&self, user_id: Uuid, session_id: Uuid) -> Result<(), AuthError> {
        let key = user_index_key(user_id);
        for _ in 0..INDEX_RETRY_LIMIT {
            let Some(raw) = self.store.get(&key).await? else {
                return Ok(());
            };
            let mut ids: Vec<Uuid> = serde_json::from_str(&raw)
                .map_err(|e| AuthError::Internal(anyhow::anyhow!("session index decode: {}", e)))?;
            ids.retain(|id| *id != session_id);
            let json = serde_json::to_string(&ids)
                .map_err(|e| AuthError::Internal(anyhow::anyhow!("{}", e)))?;
            if self
                .store
                .compare_and_swap(&key, Expected::Value(&raw), &json, None)
                .await?
            {
                return Ok(());
            }
        }
        Err(AuthError::StoreUnavailable(anyhow::anyhow!(
            "session index contention exceeded retry limit"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;

    fn service() -> SessionService {
        SessionService::new(
            Arc::new(MemoryStore::new()),
            SessionConfig {
                idle_timeout_minutes: 60,
                absolute_lifetime_hours: 720,
            },
            7,
        )
    }

    fn token_for(session_id: Uuid, generation: u32) -> String {
        format!("{}.entropy-{}", session_id.simple(), generation)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let sessions = service();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let token = token_for(session_id, 0);
        let created = sessions
            .create(session_id, user_id, "127.0.0.1".into(), "agent".into(), &token)
            .await
            .unwrap();

        assert_eq!(created.id, session_id);
        let fetched = sessions.get(session_id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, user_id);
        assert_eq!(fetched.refresh_token_hash, JwtService::hash_token(&token));
    }

    #[tokio::test]
    async fn test_rotate_swaps_hash() {
        let sessions = service();
        let session_id = Uuid::new_v4();
        let old_token = token_for(session_id, 0);
        sessions
            .create(session_id, Uuid::new_v4(), "ip".into(), "ua".into(), &old_token)
            .await
            .unwrap();

        let new_token = token_for(session_id, 1);
        let rotated = sessions.rotate(&old_token, &new_token).await.unwrap();
        assert_eq!(
            rotated.refresh_token_hash,
            JwtService::hash_token(&new_token)
        );

        // The retired token now reads as theft and kills the family
        let reuse = sessions.rotate(&old_token, "ignored").await;
        assert!(matches!(reuse, Err(AuthError::TokenReused)));

        // The family is gone: even the fresh token is dead
        let follow_up = sessions.rotate(&new_token, "ignored").await;
        assert!(matches!(follow_up, Err(AuthError::TokenReused)));
    }

    #[tokio::test]
    async fn test_rotate_unknown_session() {
        let sessions = service();
        let result = sessions
            .rotate(&token_for(Uuid::new_v4(), 0), "replacement")
            .await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let sessions = service();
        let user_id = Uuid::new_v4();
        let (id_a, id_b) = (Uuid::new_v4(), Uuid::new_v4());
        sessions
            .create(id_a, user_id, "ip".into(), "ua".into(), &token_for(id_a, 0))
            .await
            .unwrap();
        sessions
            .create(id_b, user_id, "ip".into(), "ua".into(), &token_for(id_b, 0))
            .await
            .unwrap();

        assert_eq!(sessions.list(user_id).await.unwrap().len(), 2);
        assert_eq!(sessions.revoke_all(user_id).await.unwrap(), 2);
        assert!(sessions.get(id_a).await.unwrap().is_none());
        assert!(sessions.get(id_b).await.unwrap().is_none());
        assert!(sessions.list(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_single_winner() {
        let sessions = Arc::new(service());
        let session_id = Uuid::new_v4();
        let token = token_for(session_id, 0);
        sessions
            .create(session_id, Uuid::new_v4(), "ip".into(), "ua".into(), &token)
            .await
            .unwrap();

        let left = {
            let sessions = sessions.clone();
            let token = token.clone();
            tokio::spawn(async move { sessions.rotate(&token, "replacement-a").await })
        };
        let right = {
            let sessions = sessions.clone();
            let token = token.clone();
            tokio::spawn(async move { sessions.rotate(&token, "replacement-b").await })
        };

        let results = [left.await.unwrap(), right.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let reuses = results
            .iter()
            .filter(|r| matches!(r, Err(AuthError::TokenReused)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(reuses, 1);
    }
}
