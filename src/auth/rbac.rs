//! Source-dependent role normalization
//!
//! Raw role slugs stored against an account are collapsed to the least
//! privileged representation for the front-end that made the call. The admin
//! panel only ever sees `sysadmin` or `admin`; the public site distinguishes
//! elevated accounts from plain ones.

use serde::{Deserialize, Serialize};

use super::{AuthError, RequestSource};

/// Normalized role slug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sysadmin,
    Admin,
    User,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sysadmin => "sysadmin",
            Role::Admin => "admin",
            Role::User => "user",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles granted for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EffectiveRoles(Vec<Role>);

impl EffectiveRoles {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `admin` or `sysadmin`
    pub fn is_elevated(&self) -> bool {
        self.contains(Role::Admin) || self.contains(Role::Sysadmin)
    }

    pub fn roles(&self) -> &[Role] {
        &self.0
    }

    pub fn as_strs(&self) -> Vec<&'static str> {
        self.0.iter().map(Role::as_str).collect()
    }
}

/// Compute the effective role set for `raw_roles` as seen from `source`.
///
/// The checks run in a fixed order and the first match wins.
pub fn compute_effective_roles<S: AsRef<str>>(
    raw_roles: &[S],
    source: RequestSource,
) -> EffectiveRoles {
    let has = |slug: &str| raw_roles.iter().any(|r| r.as_ref() == slug);

    let role = match source {
        RequestSource::Admin => {
            if has("sysadmin") {
                Some(Role::Sysadmin)
            } else if has("admin") {
                Some(Role::Admin)
            } else {
                None
            }
        }
        RequestSource::Main => {
            if has("sysadmin") {
                Some(Role::Sysadmin)
            } else if has("viewer") {
                Some(Role::Viewer)
            } else if !raw_roles.is_empty() {
                Some(Role::User)
            } else {
                None
            }
        }
    };

    EffectiveRoles(role.into_iter().collect())
}

/// Ensure the effective set holds at least one of `required`.
pub fn ensure_role(effective: &EffectiveRoles, required: &[Role]) -> Result<(), AuthError> {
    if required.iter().any(|role| effective.contains(*role)) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(raw: &[&str], source: RequestSource) -> Vec<&'static str> {
        compute_effective_roles(raw, source).as_strs()
    }

    #[test]
    fn test_admin_source() {
        assert_eq!(roles(&["sysadmin", "admin"], RequestSource::Admin), vec!["sysadmin"]);
        assert_eq!(roles(&["admin", "viewer"], RequestSource::Admin), vec!["admin"]);
        assert!(roles(&["viewer"], RequestSource::Admin).is_empty());
        assert!(roles(&["editor", "user"], RequestSource::Admin).is_empty());
        assert!(roles(&[], RequestSource::Admin).is_empty());
    }

    #[test]
    fn test_main_source() {
        assert_eq!(roles(&["admin", "sysadmin"], RequestSource::Main), vec!["sysadmin"]);
        assert_eq!(roles(&["viewer", "admin"], RequestSource::Main), vec!["viewer"]);
        assert_eq!(roles(&["admin"], RequestSource::Main), vec!["user"]);
        assert_eq!(roles(&["editor"], RequestSource::Main), vec!["user"]);
        assert!(roles(&[], RequestSource::Main).is_empty());
    }

    #[test]
    fn test_ensure_role() {
        let admin = compute_effective_roles(&["admin"], RequestSource::Admin);
        assert!(ensure_role(&admin, &[Role::Admin, Role::Sysadmin]).is_ok());
        assert_eq!(ensure_role(&admin, &[Role::Sysadmin]), Err(AuthError::Forbidden));

        let nobody = EffectiveRoles::empty();
        assert_eq!(ensure_role(&nobody, &[Role::User]), Err(AuthError::Forbidden));
    }

    #[test]
    fn test_elevated() {
        assert!(compute_effective_roles(&["sysadmin"], RequestSource::Main).is_elevated());
        assert!(!compute_effective_roles(&["admin"], RequestSource::Main).is_elevated());
        assert!(compute_effective_roles(&["admin"], RequestSource::Admin).is_elevated());
    }
}
