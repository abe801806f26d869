//! Route access requirements

use serde::{Deserialize, Serialize};

use super::{ensure_role, AuthError, EffectiveRoles, Identity, PathPattern, PatternError, Role};

/// What a route demands of the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRequirement {
    #[default]
    Public,
    Authenticated,
    /// Any one of the listed effective roles
    Roles(Vec<Role>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRuleConfig {
    /// Exact path or `prefix/*`
    pub path: String,
    pub require: AccessRequirement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub default: AccessRequirement,
    /// First match wins
    pub rules: Vec<AccessRuleConfig>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default: AccessRequirement::Public,
            rules: vec![
                AccessRuleConfig {
                    path: "/api/admin/*".to_string(),
                    require: AccessRequirement::Roles(vec![Role::Admin, Role::Sysadmin]),
                },
                AccessRuleConfig {
                    path: "/api/auth/me".to_string(),
                    require: AccessRequirement::Authenticated,
                },
                AccessRuleConfig {
                    path: "/api/favorites/*".to_string(),
                    require: AccessRequirement::Authenticated,
                },
            ],
        }
    }
}

/// Compiled access rules
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    default: AccessRequirement,
    rules: Vec<(PathPattern, AccessRequirement)>,
}

impl AccessPolicy {
    pub fn compile(config: &AccessConfig) -> Result<Self, PatternError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| Ok((PathPattern::parse(&rule.path)?, rule.require.clone())))
            .collect::<Result<Vec<_>, PatternError>>()?;

        Ok(Self {
            default: config.default.clone(),
            rules,
        })
    }

    /// Everything public
    pub fn open() -> Self {
        Self {
            default: AccessRequirement::Public,
            rules: Vec::new(),
        }
    }

    pub fn requirement(&self, path: &str) -> &AccessRequirement {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, requirement)| requirement)
            .unwrap_or(&self.default)
    }

    /// Enforce the requirement for `path`.
    ///
    /// `credential_rejected` records that a bearer token was presented but
    /// did not verify; callers see the same 401 either way.
    pub fn enforce(
        &self,
        path: &str,
        identity: Option<&Identity>,
        roles: &EffectiveRoles,
        credential_rejected: bool,
    ) -> Result<(), AuthError> {
        let unauthenticated = if credential_rejected {
            AuthError::InvalidCredential
        } else {
            AuthError::MissingCredential
        };

        match (self.requirement(path), identity) {
            (AccessRequirement::Public, _) => Ok(()),
            (_, None) => Err(unauthenticated),
            (AccessRequirement::Authenticated, Some(_)) => Ok(()),
            (AccessRequirement::Roles(required), Some(_)) => ensure_role(roles, required),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{compute_effective_roles, RequestSource, UserIdentity};

    fn user(roles: &[&str]) -> Identity {
        Identity::User(UserIdentity {
            user_id: "1".to_string(),
            username: "bob".to_string(),
            raw_roles: roles.iter().map(|r| r.to_string()).collect(),
            raw_groups: Vec::new(),
            permissions: Vec::new(),
        })
    }

    #[test]
    fn test_first_rule_wins() {
        let policy = AccessPolicy::compile(&AccessConfig {
            default: AccessRequirement::Authenticated,
            rules: vec![
                AccessRuleConfig {
                    path: "/api/public/*".to_string(),
                    require: AccessRequirement::Public,
                },
                AccessRuleConfig {
                    path: "/api/*".to_string(),
                    require: AccessRequirement::Roles(vec![Role::Admin]),
                },
            ],
        })
        .unwrap();

        assert_eq!(policy.requirement("/api/public/navs"), &AccessRequirement::Public);
        assert_eq!(
            policy.requirement("/api/tags"),
            &AccessRequirement::Roles(vec![Role::Admin])
        );
        assert_eq!(policy.requirement("/other"), &AccessRequirement::Authenticated);
    }

    #[test]
    fn test_enforce() {
        let policy = AccessPolicy::compile(&AccessConfig::default()).unwrap();
        let none = EffectiveRoles::empty();

        assert!(policy.enforce("/api/navs", None, &none, false).is_ok());
        assert_eq!(
            policy.enforce("/api/auth/me", None, &none, false),
            Err(AuthError::MissingCredential)
        );
        assert_eq!(
            policy.enforce("/api/auth/me", None, &none, true),
            Err(AuthError::InvalidCredential)
        );

        let viewer = user(&["viewer"]);
        let main_roles = compute_effective_roles(viewer.raw_roles(), RequestSource::Main);
        assert!(policy
            .enforce("/api/auth/me", Some(&viewer), &main_roles, false)
            .is_ok());
        assert_eq!(
            policy.enforce("/api/admin/users", Some(&viewer), &main_roles, false),
            Err(AuthError::Forbidden)
        );

        let admin = user(&["admin"]);
        let admin_roles = compute_effective_roles(admin.raw_roles(), RequestSource::Admin);
        assert!(policy
            .enforce("/api/admin/users", Some(&admin), &admin_roles, false)
            .is_ok());

        // The same account from the public site is only a plain user
        let main_roles = compute_effective_roles(admin.raw_roles(), RequestSource::Main);
        assert_eq!(
            policy.enforce("/api/admin/users", Some(&admin), &main_roles, false),
            Err(AuthError::Forbidden)
        );
    }

    #[test]
    fn test_requirement_serde() {
        let config: AccessConfig = serde_json::from_value(serde_json::json!({
            "default": "authenticated",
            "rules": [
                { "path": "/api/admin/*", "require": { "roles": ["admin", "sysadmin"] } },
                { "path": "/api/navs", "require": "public" }
            ]
        }))
        .unwrap();

        assert_eq!(config.default, AccessRequirement::Authenticated);
        assert_eq!(
            config.rules[0].require,
            AccessRequirement::Roles(vec![Role::Admin, Role::Sysadmin])
        );
    }
}
