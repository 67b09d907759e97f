//! Auth orchestrator: composes password security, tokens, MFA, RBAC,
//! rate limiting, and sessions into the register/login/refresh/logout and
//! permission-check flows. External callers go through this service
//! exclusively; no other component is reachable from outside the core.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::{
    LoginRequest, RegisterRequest, RegisterResponse, Role, SessionInfo, TokenResponse,
    UpsertRoleRequest, User, UserResponse,
};
use crate::services::breach::{BreachChecker, BreachRangeClient, BreachStatus};
use crate::services::error::AuthError;
use crate::services::federation::VerifierRegistry;
use crate::services::jwt::{AccessTokenClaims, JwtService};
use crate::services::mfa::{MfaService, MfaSetup};
use crate::services::policy::{PasswordContext, PasswordPolicy};
use crate::services::rate_limit::{LockoutPolicy, RateLimitSpec, RateLimiter};
use crate::services::rbac::{AccessDecision, RbacEngine};
use crate::services::repository::{RepositoryError, RoleRepository, UserRepository};
use crate::services::session::SessionService;
use crate::services::store::KeyValueStore;
use crate::utils::{
    hash_password, is_valid_email, normalize_email, verify_password, Password, PasswordHashString,
};

/// Successful login: token pair plus the session it opened.
#[derive(Debug, Serialize)]
pub struct LoginSuccess {
    pub tokens: TokenResponse,
    pub session: SessionInfo,
    pub user: UserResponse,
}

/// Introspection result for an access token.
#[derive(Debug, Serialize)]
pub struct Introspection {
    pub active: bool,
    pub sub: Option<String>,
    pub email: Option<String>,
    pub session_id: Option<String>,
    pub roles: Vec<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
}

impl Introspection {
    fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            email: None,
            session_id: None,
            roles: Vec::new(),
            exp: None,
            iat: None,
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    config: Arc<AuthConfig>,
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    rbac: Arc<RbacEngine>,
    jwt: JwtService,
    sessions: SessionService,
    limiter: RateLimiter,
    lockout: LockoutPolicy,
    mfa: MfaService,
    policy: PasswordPolicy,
    breach: BreachChecker,
    verifiers: VerifierRegistry,
    store: Arc<dyn KeyValueStore>,
    /// Verified against when no account matches, keeping the timing of the
    /// not-found path aligned with a real password check.
    dummy_hash: PasswordHashString,
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserRepository>,
        roles: Arc<dyn RoleRepository>,
        store: Arc<dyn KeyValueStore>,
        breach_client: Arc<dyn BreachRangeClient>,
        verifiers: VerifierRegistry,
    ) -> Result<Self, AuthError> {
        let jwt = JwtService::new(&config.jwt)?;
        let sessions = SessionService::new(
            store.clone(),
            config.session.clone(),
            config.jwt.refresh_token_expiry_days,
        );
        let dummy_hash = hash_password(
            &Password::new(Uuid::new_v4().to_string()),
            &config.hashing,
        )
        .map_err(AuthError::Internal)?;

        Ok(Self {
            jwt,
            sessions,
            limiter: RateLimiter::new(store.clone()),
            lockout: LockoutPolicy::new(config.lockout.clone()),
            mfa: MfaService::new(&config.mfa),
            policy: PasswordPolicy::new(config.password_policy.clone()),
            breach: BreachChecker::new(breach_client, &config.breach),
            rbac: Arc::new(RbacEngine::new(roles.clone())),
            config: Arc::new(config),
            users,
            roles,
            verifiers,
            store,
            dummy_hash,
        })
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, AuthError> {
        if let Some(ip) = &req.ip_address {
            let decision = self
                .limiter
                .consume(&format!("register:{}", ip), &self.register_limit())
                .await?;
            if !decision.allowed {
                return Err(AuthError::RateLimited {
                    retry_after_seconds: decision
                        .retry_after
                        .unwrap_or(Duration::ZERO)
                        .as_secs(),
                });
            }
        }

        let email = normalize_email(&req.email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        self.enforce_password_rules(
            &req.password,
            &PasswordContext {
                email: Some(&email),
                display_name: req.display_name.as_deref(),
            },
            &[],
        )
        .await?;

        let password_hash = hash_password(&Password::new(req.password), &self.config.hashing)
            .map_err(AuthError::Internal)?;
        let user = User::new(email, password_hash.as_str().to_string(), req.display_name);

        match self.users.insert(&user).await {
            Ok(()) => {}
            Err(RepositoryError::DuplicateEmail) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        }
        self.users
            .push_password_history(user.id, password_hash.as_str(), self.policy.history_size())
            .await?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(RegisterResponse { user_id: user.id })
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Login state machine: lockout check, rate limit, credential verify,
    /// MFA, session create, token issue. Credential failures feed the
    /// lockout counter; the other short circuits do not.
    pub async fn login(&self, req: LoginRequest) -> Result<LoginSuccess, AuthError> {
        let email = normalize_email(&req.email);

        let Some(mut user) = self.users.find_by_email(&email).await? else {
            // Uniform timing for unknown accounts
            let _ = verify_password(
                &Password::new(req.password),
                &self.dummy_hash,
                &self.config.hashing,
            );
            tracing::debug!("Login attempt for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        // Lockout wins over everything, including a correct password, and
        // is checked before the expensive hash comparison.
        if user.is_locked() {
            let until = user.locked_until.unwrap_or_else(chrono::Utc::now);
            tracing::warn!(user_id = %user.id, locked_until = %until, "Login attempt on locked account");
            return Err(AuthError::AccountLocked { until });
        }

        let decision = self
            .limiter
            .consume(&format!("login:{}", email), &self.login_limit())
            .await?;
        if !decision.allowed {
            return Err(AuthError::RateLimited {
                retry_after_seconds: decision.retry_after.unwrap_or(Duration::ZERO).as_secs(),
            });
        }

        let valid = match &user.password_hash {
            Some(hash) => {
                let outcome = verify_password(
                    &Password::new(req.password.clone()),
                    &PasswordHashString::new(hash.clone()),
                    &self.config.hashing,
                )
                .map_err(AuthError::Internal)?;

                if outcome.valid && outcome.needs_rehash {
                    // Hash parameters were raised since this hash was made
                    let rehashed =
                        hash_password(&Password::new(req.password.clone()), &self.config.hashing)
                            .map_err(AuthError::Internal)?;
                    user.password_hash = Some(rehashed.into_string());
                    tracing::debug!(user_id = %user.id, "Password rehashed with current parameters");
                }
                outcome.valid
            }
            None => {
                // Federated-only account: no password can be right
                let _ = verify_password(
                    &Password::new(req.password.clone()),
                    &self.dummy_hash,
                    &self.config.hashing,
                );
                false
            }
        };

        if !valid {
            return Err(self.record_credential_failure(&mut user).await?);
        }

        if user.mfa_enabled {
            let Some(code) = req.mfa_code.as_deref() else {
                return Err(AuthError::MfaRequired);
            };
            let verification = self.mfa.verify(&mut user, code)?;
            if !verification.valid {
                tracing::warn!(user_id = %user.id, "Invalid MFA code");
                return Err(AuthError::MfaInvalid);
            }
            if verification.used_backup_code {
                tracing::warn!(
                    user_id = %user.id,
                    remaining = user.backup_code_hashes.len(),
                    "Login via backup code"
                );
            }
        }

        self.lockout.reset(&mut user);
        user.updated_at = chrono::Utc::now();
        self.users.update(&user).await?;

        let success = self
            .open_session(&user, req.ip_address, req.user_agent)
            .await?;
        tracing::info!(user_id = %user.id, "Login successful");
        Ok(success)
    }

    async fn record_credential_failure(&self, user: &mut User) -> Result<AuthError, AuthError> {
        let decision = self.lockout.register_failure(user);
        user.updated_at = chrono::Utc::now();
        self.users.update(user).await?;
        if decision.locked {
            tracing::warn!(user_id = %user.id, "Lockout threshold reached");
        } else {
            tracing::debug!(user_id = %user.id, count = user.failed_login_count, "Credential failure recorded");
        }
        // The failing attempt itself reports invalid credentials; the
        // lockout becomes visible from the next attempt on.
        Ok(AuthError::InvalidCredentials)
    }

    async fn open_session(
        &self,
        user: &User,
        ip_address: String,
        user_agent: String,
    ) -> Result<LoginSuccess, AuthError> {
        let session_id = Uuid::new_v4();
        let refresh_token = self.jwt.issue_refresh_token(session_id);
        let session = self
            .sessions
            .create(session_id, user.id, ip_address, user_agent, &refresh_token)
            .await?;
        let access_token = self.issue_access_token(user, session_id).await?;

        Ok(LoginSuccess {
            tokens: TokenResponse::new(
                access_token,
                refresh_token,
                self.jwt.access_token_expiry_seconds(),
            ),
            session: SessionInfo::from(&session),
            user: user.sanitized(),
        })
    }

    async fn issue_access_token(
        &self,
        user: &User,
        session_id: Uuid,
    ) -> Result<String, AuthError> {
        let grants = self.rbac.permissions_for_user(user.id, &user.roles).await?;
        let patterns = grants.iter().map(|g| g.pattern.clone()).collect();
        self.jwt.issue_access_token(user, patterns, session_id)
    }

    // -----------------------------------------------------------------------
    // Token refresh / logout
    // -----------------------------------------------------------------------

    /// Exchange a refresh token for a new pair, always going through
    /// rotation so a replayed token revokes its whole family.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let session_id = JwtService::refresh_token_session_id(refresh_token)?;
        let replacement = self.jwt.issue_refresh_token(session_id);

        let session = match self.sessions.rotate(refresh_token, &replacement).await {
            Ok(session) => session,
            Err(AuthError::TokenReused) => {
                tracing::warn!(session_id = %session_id, "Security event: refresh token reuse");
                return Err(AuthError::TokenReused);
            }
            Err(e) => return Err(e),
        };

        let Some(user) = self.users.find_by_id(session.user_id).await? else {
            self.sessions.revoke(session.id).await?;
            return Err(AuthError::TokenInvalid);
        };
        if user.is_locked() {
            return Err(AuthError::AccountLocked {
                until: user.locked_until.unwrap_or_else(chrono::Utc::now),
            });
        }

        let access_token = self.issue_access_token(&user, session.id).await?;
        Ok(TokenResponse::new(
            access_token,
            replacement,
            self.jwt.access_token_expiry_seconds(),
        ))
    }

    pub async fn logout(&self, session_id: Uuid) -> Result<(), AuthError> {
        self.sessions.revoke(session_id).await?;
        tracing::info!(session_id = %session_id, "Session logged out");
        Ok(())
    }

    pub async fn logout_all(&self, user_id: Uuid) -> Result<usize, AuthError> {
        self.sessions.revoke_all(user_id).await
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionInfo>, AuthError> {
        let sessions = self.sessions.list(user_id).await?;
        Ok(sessions.iter().map(SessionInfo::from).collect())
    }

    // -----------------------------------------------------------------------
    // Token verification / introspection
    // -----------------------------------------------------------------------

    /// Pure signature/expiry check; safe under any concurrency, no I/O.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        self.jwt.verify_access_token(token)
    }

    /// Signature check plus session liveness. Reports inactive instead of
    /// erroring, in the style of RFC 7662.
    pub async fn introspect(&self, token: &str) -> Introspection {
        let claims = match self.jwt.verify_access_token(token) {
            Ok(claims) => claims,
            Err(_) => return Introspection::inactive(),
        };

        let session_id = match Uuid::parse_str(&claims.sid) {
            Ok(id) => id,
            Err(_) => return Introspection::inactive(),
        };
        match self.sessions.get(session_id).await {
            Ok(Some(_)) => Introspection {
                active: true,
                sub: Some(claims.sub),
                email: Some(claims.email),
                session_id: Some(claims.sid),
                roles: claims.roles,
                exp: Some(claims.exp),
                iat: Some(claims.iat),
            },
            _ => Introspection::inactive(),
        }
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    /// Decide `resource:action` for a user. Never mutates domain state.
    pub async fn check_permission(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<AccessDecision, AuthError> {
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Ok(AccessDecision {
                allowed: false,
                reason: "unknown user".to_string(),
            });
        };
        let grants = self.rbac.permissions_for_user(user.id, &user.roles).await?;
        Ok(RbacEngine::check(&grants, resource, action, context))
    }

    pub async fn upsert_role(&self, req: UpsertRoleRequest) -> Result<(), AuthError> {
        let mut role = Role::new(req.name);
        role.permissions = req.permissions;
        role.parent_roles = req.parent_roles;
        self.rbac.store_role(role).await
    }

    pub async fn delete_role(&self, name: &str) -> Result<bool, AuthError> {
        self.rbac.delete_role(name).await
    }

    pub async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<(), AuthError> {
        if self.roles.find(role_name).await?.is_none() {
            return Err(AuthError::UnknownRole {
                name: role_name.to_string(),
            });
        }
        let Some(mut user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::UserNotFound);
        };
        if !user.roles.iter().any(|r| r == role_name) {
            user.roles.push(role_name.to_string());
            user.updated_at = chrono::Utc::now();
            self.users.update(&user).await?;
        }
        self.rbac.invalidate_user(user_id);
        Ok(())
    }

    pub async fn revoke_role(&self, user_id: Uuid, role_name: &str) -> Result<(), AuthError> {
        let Some(mut user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::UserNotFound);
        };
        user.roles.retain(|r| r != role_name);
        user.updated_at = chrono::Utc::now();
        self.users.update(&user).await?;
        self.rbac.invalidate_user(user_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // MFA management
    // -----------------------------------------------------------------------

    pub async fn setup_mfa(&self, user_id: Uuid) -> Result<MfaSetup, AuthError> {
        let Some(mut user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::UserNotFound);
        };
        let setup = self.mfa.setup(&mut user)?;
        user.updated_at = chrono::Utc::now();
        self.users.update(&user).await?;
        Ok(setup)
    }

    pub async fn enable_mfa(&self, user_id: Uuid, code: &str) -> Result<bool, AuthError> {
        let Some(mut user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::UserNotFound);
        };
        let enabled = self.mfa.enable(&mut user, code)?;
        if enabled {
            user.updated_at = chrono::Utc::now();
            self.users.update(&user).await?;
        }
        Ok(enabled)
    }

    pub async fn disable_mfa(&self, user_id: Uuid) -> Result<(), AuthError> {
        let Some(mut user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::UserNotFound);
        };
        self.mfa.disable(&mut user);
        user.updated_at = chrono::Utc::now();
        self.users.update(&user).await
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Password change / reset
    // -----------------------------------------------------------------------

    /// Change a password with knowledge of the current one. Revokes every
    /// session, forcing re-login with the new credential.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let Some(mut user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::UserNotFound);
        };
        let Some(hash) = &user.password_hash else {
            return Err(AuthError::InvalidCredentials);
        };

        let outcome = verify_password(
            &Password::new(current_password),
            &PasswordHashString::new(hash.clone()),
            &self.config.hashing,
        )
        .map_err(AuthError::Internal)?;
        if !outcome.valid {
            return Err(AuthError::InvalidCredentials);
        }

        self.set_password(&mut user, new_password).await?;
        self.sessions.revoke_all(user_id).await?;
        tracing::info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Reset a password through an out-of-band flow (the reset-token
    /// transport lives outside the core). Whether an active lockout is
    /// cleared is policy, not hardcoded.
    pub async fn admin_reset_password(
        &self,
        user_id: Uuid,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let Some(mut user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::UserNotFound);
        };

        self.set_password(&mut user, new_password).await?;
        self.sessions.revoke_all(user_id).await?;
        tracing::info!(user_id = %user_id, "Password reset");
        Ok(())
    }

    async fn set_password(&self, user: &mut User, new_password: &str) -> Result<(), AuthError> {
        let history = self
            .users
            .password_history(user.id, self.policy.history_size())
            .await?;
        self.enforce_password_rules(
            new_password,
            &PasswordContext {
                email: Some(&user.email),
                display_name: user.display_name.as_deref(),
            },
            &history,
        )
        .await?;

        let new_hash = hash_password(&Password::new(new_password), &self.config.hashing)
            .map_err(AuthError::Internal)?;
        user.password_hash = Some(new_hash.as_str().to_string());
        if self.lockout.clear_on_reset() {
            self.lockout.reset(user);
        }
        user.updated_at = chrono::Utc::now();
        self.users.update(user).await?;
        self.users
            .push_password_history(user.id, new_hash.as_str(), self.policy.history_size())
            .await?;
        Ok(())
    }

    async fn enforce_password_rules(
        &self,
        password: &str,
        context: &PasswordContext<'_>,
        history: &[String],
    ) -> Result<(), AuthError> {
        let mut validation = self.policy.validate(password, context);
        if !history.is_empty()
            && self
                .policy
                .is_recent_reuse(password, history, &self.config.hashing)
        {
            validation.valid = false;
            validation
                .errors
                .push(crate::services::policy::PolicyError::RecentlyUsed);
        }
        if !validation.valid {
            return Err(AuthError::PolicyViolation {
                violations: validation.errors,
            });
        }

        match self.breach.check(password).await {
            BreachStatus::Breached { count } => {
                tracing::warn!(count, "Candidate password found in breach corpus");
                Err(AuthError::BreachDetected { count })
            }
            BreachStatus::Unknown if self.config.breach.enabled && self.config.breach.strict => {
                Err(AuthError::StoreUnavailable(anyhow::anyhow!(
                    "breach lookup unavailable in strict mode"
                )))
            }
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Federated login
    // -----------------------------------------------------------------------

    /// Login through a registered external credential verifier. Provisions
    /// or links the local account as needed; lockout still applies.
    pub async fn login_external(
        &self,
        provider: &str,
        credential: &str,
        ip_address: String,
        user_agent: String,
    ) -> Result<LoginSuccess, AuthError> {
        let identity = self.verifiers.verify(provider, credential).await?;

        let existing = self
            .users
            .find_by_external_identity(&identity.provider, &identity.external_user_id)
            .await?;

        let user = match existing {
            Some(user) => user,
            None => self.link_or_provision(&identity).await?,
        };

        if user.is_locked() {
            return Err(AuthError::AccountLocked {
                until: user.locked_until.unwrap_or_else(chrono::Utc::now),
            });
        }

        let success = self.open_session(&user, ip_address, user_agent).await?;
        tracing::info!(user_id = %user.id, provider = %provider, "Federated login successful");
        Ok(success)
    }

    async fn link_or_provision(
        &self,
        identity: &crate::services::federation::ExternalIdentity,
    ) -> Result<User, AuthError> {
        let identity_ref = crate::models::ExternalIdentityRef {
            provider: identity.provider.clone(),
            external_user_id: identity.external_user_id.clone(),
        };

        let Some(email) = identity.email.as_deref().map(normalize_email) else {
            // Nothing to link on and no email to provision with
            return Err(AuthError::UserNotFound);
        };

        if let Some(mut user) = self.users.find_by_email(&email).await? {
            user.external_identities.push(identity_ref);
            user.updated_at = chrono::Utc::now();
            self.users.update(&user).await?;
            tracing::info!(user_id = %user.id, provider = %identity.provider, "External identity linked");
            return Ok(user);
        }

        let user = User::new_federated(email, identity_ref);
        self.users.insert(&user).await?;
        tracing::info!(user_id = %user.id, provider = %identity.provider, "Federated user provisioned");
        Ok(user)
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    pub async fn health_check(&self) -> Result<(), AuthError> {
        self.store.health_check().await.map_err(Into::into)
    }

    fn login_limit(&self) -> RateLimitSpec {
        RateLimitSpec {
            max_attempts: self.config.rate_limit.login_attempts,
            window: Duration::from_secs(self.config.rate_limit.login_window_seconds),
        }
    }

    fn register_limit(&self) -> RateLimitSpec {
        RateLimitSpec {
            max_attempts: self.config.rate_limit.register_attempts,
            window: Duration::from_secs(self.config.rate_limit.register_window_seconds),
        }
    }
}
