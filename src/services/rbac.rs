//! RBAC engine: role-graph resolution, wildcard permission checks, and a
//! per-user resolved-permission cache with explicit invalidation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{PermissionGrant, Role};
use crate::services::error::AuthError;
use crate::services::repository::RoleRepository;

/// Default TTL for cached per-user permission sets. Mutations invalidate
/// eagerly; the TTL only bounds staleness from out-of-band store writes.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// Result of a permission check.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

impl AccessDecision {
    fn allow(pattern: &str) -> Self {
        Self {
            allowed: true,
            reason: format!("granted by {}", pattern),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

struct CachedGrants {
    grants: Arc<Vec<PermissionGrant>>,
    expires_at: Instant,
}

pub struct RbacEngine {
    roles: Arc<dyn RoleRepository>,
    cache: DashMap<Uuid, CachedGrants>,
    cache_ttl: Duration,
}

impl RbacEngine {
    pub fn new(roles: Arc<dyn RoleRepository>) -> Self {
        Self {
            roles,
            cache: DashMap::new(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Union of the given roles' grants and all their ancestors' grants.
    ///
    /// Assumes a validated DAG: cycles are rejected when roles are written,
    /// never re-checked here. Role names with no stored definition are
    /// skipped (the role may have been deleted after assignment).
    pub async fn resolve_permissions(
        &self,
        role_names: &[String],
    ) -> Result<Vec<PermissionGrant>, AuthError> {
        let all = self.roles.all().await?;
        let by_name: HashMap<&str, &Role> =
            all.iter().map(|r| (r.name.as_str(), r)).collect();

        let mut grants: Vec<PermissionGrant> = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = role_names.iter().map(String::as_str).collect();

        while let Some(name) = queue.pop_front() {
            if !visited.insert(name) {
                continue;
            }
            let Some(role) = by_name.get(name) else {
                tracing::warn!(role = %name, "Role assigned but not defined, skipping");
                continue;
            };
            for grant in &role.permissions {
                if !grants.contains(grant) {
                    grants.push(grant.clone());
                }
            }
            for parent in &role.parent_roles {
                queue.push_back(parent.as_str());
            }
        }

        Ok(grants)
    }

    /// Resolved permissions for a user, cached for a short TTL.
    pub async fn permissions_for_user(
        &self,
        user_id: Uuid,
        role_names: &[String],
    ) -> Result<Arc<Vec<PermissionGrant>>, AuthError> {
        if let Some(cached) = self.cache.get(&user_id) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.grants.clone());
            }
        }

        let grants = Arc::new(self.resolve_permissions(role_names).await?);
        self.cache.insert(
            user_id,
            CachedGrants {
                grants: grants.clone(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
        Ok(grants)
    }

    /// Drop one user's cached permission set (role membership changed).
    pub fn invalidate_user(&self, user_id: Uuid) {
        self.cache.remove(&user_id);
    }

    /// Drop every cached permission set (a role definition changed).
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    /// Match `resource:action` against a set of grants. Pure; never
    /// mutates anything.
    pub fn check(
        grants: &[PermissionGrant],
        resource: &str,
        action: &str,
        context: Option<&serde_json::Value>,
    ) -> AccessDecision {
        let mut conditional_miss = false;
        for grant in grants {
            if !grant.matches_pattern(resource, action) {
                continue;
            }
            if grant.conditions_hold(context) {
                return AccessDecision::allow(&grant.pattern);
            }
            conditional_miss = true;
        }

        if conditional_miss {
            AccessDecision::deny(format!(
                "permission for {}:{} is conditional and conditions did not hold",
                resource, action
            ))
        } else {
            AccessDecision::deny(format!("no permission matches {}:{}", resource, action))
        }
    }

    /// Validate and persist a role definition.
    ///
    /// Cycles and unknown parents are configuration errors raised here, at
    /// write time; every cached permission set is invalidated on success so
    /// demotions take effect immediately rather than at TTL expiry.
    pub async fn store_role(&self, role: Role) -> Result<(), AuthError> {
        let all = self.roles.all().await?;
        let mut by_name: HashMap<String, Vec<String>> = all
            .iter()
            .map(|r| (r.name.clone(), r.parent_roles.clone()))
            .collect();

        for parent in &role.parent_roles {
            if parent != &role.name && !by_name.contains_key(parent) {
                return Err(AuthError::UnknownRole {
                    name: parent.clone(),
                });
            }
        }
        by_name.insert(role.name.clone(), role.parent_roles.clone());

        if let Some(path) = find_cycle(&by_name, &role.name) {
            return Err(AuthError::RoleCycle {
                path: path.join(" -> "),
            });
        }

        self.roles.upsert(&role).await?;
        self.invalidate_all();
        tracing::info!(role = %role.name, "Role definition stored");
        Ok(())
    }

    /// Delete a role definition and invalidate all cached sets.
    pub async fn delete_role(&self, name: &str) -> Result<bool, AuthError> {
        let deleted = self.roles.delete(name).await?;
        if deleted {
            self.invalidate_all();
        }
        Ok(deleted)
    }
}

/// DFS from `start` through parent edges; a new cycle introduced by writing
/// `start` necessarily passes through it.
fn find_cycle(
    edges: &HashMap<String, Vec<String>>,
    start: &str,
) -> Option<Vec<String>> {
    let mut path = vec![start.to_string()];
    let mut visited = HashSet::new();
    dfs_cycle(edges, start, start, &mut visited, &mut path)
}

fn dfs_cycle(
    edges: &HashMap<String, Vec<String>>,
    start: &str,
    current: &str,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    let parents = edges.get(current)?;
    for parent in parents {
        if parent == start {
            let mut cycle = path.clone();
            cycle.push(start.to_string());
            return Some(cycle);
        }
        if visited.insert(parent.clone()) {
            path.push(parent.clone());
            if let Some(cycle) = dfs_cycle(edges, start, parent, visited, path) {
                return Some(cycle);
            }
            path.pop();
        }
    }
    None
}
