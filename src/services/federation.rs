//! Pluggable federated credential verification.
//!
//! The core never speaks a provider's wire protocol; callers register
//! strategies implementing [`CredentialVerifier`] and the orchestrator
//! dispatches by provider name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::services::error::AuthError;

/// Identity asserted by an external provider after verifying a credential.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub provider: String,
    pub external_user_id: String,
    pub email: Option<String>,
    pub claims: Value,
}

/// One federated verification strategy (an OIDC relying party, a SAML
/// assertion consumer, an LDAP bind, ...).
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Verify a provider-issued credential and return the identity it
    /// attests to.
    async fn verify(&self, credential: &str) -> Result<ExternalIdentity, AuthError>;
}

/// Registry of verification strategies, dispatched by provider name.
#[derive(Clone, Default)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn CredentialVerifier>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, verifier: Arc<dyn CredentialVerifier>) {
        self.verifiers
            .insert(verifier.provider_name().to_string(), verifier);
    }

    pub async fn verify(
        &self,
        provider: &str,
        credential: &str,
    ) -> Result<ExternalIdentity, AuthError> {
        let verifier = self
            .verifiers
            .get(provider)
            .ok_or_else(|| AuthError::UnknownProvider {
                name: provider.to_string(),
            })?;
        verifier.verify(credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticVerifier;

    #[async_trait]
    impl CredentialVerifier for StaticVerifier {
        fn provider_name(&self) -> &str {
            "acme-oidc"
        }

        async fn verify(&self, credential: &str) -> Result<ExternalIdentity, AuthError> {
            if credential == "good-token" {
                Ok(ExternalIdentity {
                    provider: "acme-oidc".to_string(),
                    external_user_id: "ext-123".to_string(),
                    email: Some("fed@example.com".to_string()),
                    claims: json!({"hd": "example.com"}),
                })
            } else {
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_provider_name() {
        let mut registry = VerifierRegistry::new();
        registry.register(Arc::new(StaticVerifier));

        let identity = registry.verify("acme-oidc", "good-token").await.unwrap();
        assert_eq!(identity.external_user_id, "ext-123");

        assert!(matches!(
            registry.verify("acme-oidc", "bad-token").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            registry.verify("nobody", "good-token").await,
            Err(AuthError::UnknownProvider { .. })
        ));
    }
}
