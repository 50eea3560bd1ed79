//! Caller authority for administrative operations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use mediarepo_common::config::AuthConfig;
use mediarepo_common::{AppError, AppResult};

/// Authority tier, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Owner,
    LocalAdmin,
    GlobalAdmin,
}

/// Who is asking, and with what authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    /// Authority over every origin. `user_id` is `None` for the shared
    /// secret.
    GlobalAdmin { user_id: Option<String> },
    /// Authority over one origin.
    LocalAdmin { user_id: String, origin: String },
    /// Authority over the caller's own uploads.
    Owner { user_id: String },
}

impl AuthContext {
    /// The caller's tier.
    #[must_use]
    pub const fn tier(&self) -> Tier {
        match self {
            Self::GlobalAdmin { .. } => Tier::GlobalAdmin,
            Self::LocalAdmin { .. } => Tier::LocalAdmin,
            Self::Owner { .. } => Tier::Owner,
        }
    }

    /// The caller's user ID, if it has one.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::GlobalAdmin { user_id } => user_id.as_deref(),
            Self::LocalAdmin { user_id, .. } | Self::Owner { user_id } => Some(user_id),
        }
    }

    /// Fail with `Forbidden` unless the caller has at least `minimum`.
    pub fn require(&self, minimum: Tier) -> AppResult<()> {
        if self.tier() >= minimum {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{minimum:?} authority required"
            )))
        }
    }

    /// Whether the caller administers `origin`.
    #[must_use]
    pub fn administers(&self, origin: &str) -> bool {
        match self {
            Self::GlobalAdmin { .. } => true,
            Self::LocalAdmin { origin: own, .. } => own == origin,
            Self::Owner { .. } => false,
        }
    }
}

/// Answers who administers what.
#[async_trait]
pub trait AdminDirectory: Send + Sync {
    /// Whether `user_id` administers every origin.
    async fn is_global_admin(&self, user_id: &str) -> AppResult<bool>;

    /// Whether `user_id` administers `origin`.
    async fn is_local_admin(&self, user_id: &str, origin: &str) -> AppResult<bool>;
}

pub type AdminDirectoryService = Arc<dyn AdminDirectory>;

/// Administrators listed in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigAdminDirectory {
    global: HashSet<String>,
    local: HashMap<String, HashSet<String>>,
}

impl ConfigAdminDirectory {
    /// Build from the `[auth]` configuration section.
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            global: config.global_admins.iter().cloned().collect(),
            local: config
                .origin_admins
                .iter()
                .map(|(origin, users)| (origin.clone(), users.iter().cloned().collect()))
                .collect(),
        }
    }
}

#[async_trait]
impl AdminDirectory for ConfigAdminDirectory {
    async fn is_global_admin(&self, user_id: &str) -> AppResult<bool> {
        Ok(self.global.contains(user_id))
    }

    async fn is_local_admin(&self, user_id: &str, origin: &str) -> AppResult<bool> {
        Ok(self
            .local
            .get(origin)
            .is_some_and(|users| users.contains(user_id)))
    }
}

/// Work out the authority of `user_id` for a request served as `origin`.
pub async fn resolve_context(
    directory: &dyn AdminDirectory,
    user_id: &str,
    origin: &str,
) -> AppResult<AuthContext> {
    if directory.is_global_admin(user_id).await? {
        return Ok(AuthContext::GlobalAdmin {
            user_id: Some(user_id.to_string()),
        });
    }
    if directory.is_local_admin(user_id, origin).await? {
        return Ok(AuthContext::LocalAdmin {
            user_id: user_id.to_string(),
            origin: origin.to_string(),
        });
    }
    Ok(AuthContext::Owner {
        user_id: user_id.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn directory() -> ConfigAdminDirectory {
        let mut config = AuthConfig::default();
        config.global_admins.push("@root:local.test".to_string());
        config.origin_admins.insert(
            "local.test".to_string(),
            vec!["@mod:local.test".to_string()],
        );
        ConfigAdminDirectory::new(&config)
    }

    #[tokio::test]
    async fn test_resolves_each_tier() {
        let dir = directory();
        assert_eq!(
            resolve_context(&dir, "@root:local.test", "local.test")
                .await
                .unwrap()
                .tier(),
            Tier::GlobalAdmin
        );
        assert_eq!(
            resolve_context(&dir, "@mod:local.test", "local.test")
                .await
                .unwrap(),
            AuthContext::LocalAdmin {
                user_id: "@mod:local.test".to_string(),
                origin: "local.test".to_string()
            }
        );
        assert_eq!(
            resolve_context(&dir, "@mod:local.test", "other.test")
                .await
                .unwrap()
                .tier(),
            Tier::Owner
        );
    }

    #[test]
    fn test_require_orders_tiers() {
        let owner = AuthContext::Owner {
            user_id: "@a:local.test".to_string(),
        };
        assert!(owner.require(Tier::Owner).is_ok());
        assert!(matches!(
            owner.require(Tier::LocalAdmin),
            Err(AppError::Forbidden(_))
        ));
        let global = AuthContext::GlobalAdmin { user_id: None };
        assert!(global.require(Tier::GlobalAdmin).is_ok());
        assert!(global.administers("anything.test"));
    }
}
