//! Role model - named permission sets with acyclic inheritance.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A role: a named set of permission grants plus parent roles whose grants
/// are inherited. The parent graph must be a DAG, validated at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<PermissionGrant>,
    pub parent_roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Vec::new(),
            parent_roles: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_permissions(mut self, patterns: &[&str]) -> Self {
        self.permissions = patterns
            .iter()
            .map(|p| PermissionGrant::new(*p))
            .collect();
        self
    }

    pub fn with_parents(mut self, parents: &[&str]) -> Self {
        self.parent_roles = parents.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// A single `resource:action` grant, optionally conditional.
///
/// `*` in either segment matches anything in that segment; matching is
/// segment equality, not regex. A conditional grant only applies when every
/// condition key equals the corresponding value in the request context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<BTreeMap<String, serde_json::Value>>,
}

impl PermissionGrant {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            conditions: None,
        }
    }

    pub fn conditional(
        pattern: impl Into<String>,
        conditions: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            conditions: Some(conditions),
        }
    }

    /// Wildcard match of this grant's pattern against `resource:action`.
    pub fn matches_pattern(&self, resource: &str, action: &str) -> bool {
        let Some((own_resource, own_action)) = self.pattern.split_once(':') else {
            return false;
        };
        (own_resource == "*" || own_resource == resource)
            && (own_action == "*" || own_action == action)
    }

    /// Evaluate the attached conditions (if any) against a request context.
    pub fn conditions_hold(&self, context: Option<&serde_json::Value>) -> bool {
        let Some(conditions) = &self.conditions else {
            return true;
        };
        let Some(context) = context else {
            // Conditional grant, no context supplied: condition cannot hold.
            return false;
        };
        conditions
            .iter()
            .all(|(key, expected)| context.get(key) == Some(expected))
    }
}

/// Request to create or replace a role definition.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertRoleRequest {
    pub name: String,
    pub permissions: Vec<PermissionGrant>,
    pub parent_roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exact_match() {
        let grant = PermissionGrant::new("docs:read");
        assert!(grant.matches_pattern("docs", "read"));
        assert!(!grant.matches_pattern("docs", "write"));
        assert!(!grant.matches_pattern("files", "read"));
    }

    #[test]
    fn test_action_wildcard() {
        let grant = PermissionGrant::new("files:*");
        assert!(grant.matches_pattern("files", "delete"));
        assert!(grant.matches_pattern("files", "read"));
        assert!(!grant.matches_pattern("images", "delete"));
    }

    #[test]
    fn test_full_wildcard() {
        let grant = PermissionGrant::new("*:*");
        assert!(grant.matches_pattern("anything", "at-all"));
    }

    #[test]
    fn test_pattern_without_separator_never_matches() {
        let grant = PermissionGrant::new("docs");
        assert!(!grant.matches_pattern("docs", "read"));
    }

    #[test]
    fn test_conditions() {
        let mut conditions = BTreeMap::new();
        conditions.insert("department".to_string(), json!("engineering"));
        let grant = PermissionGrant::conditional("deploys:run", conditions);

        assert!(grant.conditions_hold(Some(&json!({"department": "engineering"}))));
        assert!(!grant.conditions_hold(Some(&json!({"department": "sales"}))));
        assert!(!grant.conditions_hold(Some(&json!({}))));
        assert!(!grant.conditions_hold(None));
    }
}
