//! Authentication provider implementations

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Account, AuthError, GameProfile, IdentityEndpoint, LoginOptions, Result, SkinUpload};

mod offline;
mod yggdrasil;

pub use offline::{offline_uuid, OfflineProvider, OFFLINE_SERVICE};
pub use yggdrasil::YggdrasilProvider;

/// What a provider gets to know about the session.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub client_token: String,
    /// The identity endpoints the user added.
    pub endpoints: Vec<IdentityEndpoint>,
    /// Fires when the user aborts the operation. The manager
    /// already stops awaiting the provider when this fires,
    /// providers only need it for work outside their future.
    pub cancel: CancellationToken,
}

impl AuthContext {
    /// The endpoint serving `service` (a host name or API url).
    #[must_use]
    pub fn endpoint_for(&self, service: &str) -> Option<&IdentityEndpoint> {
        self.endpoints.iter().find(|n| n.serves(service))
    }
}

/// Core trait for account authentication providers.
///
/// Providers don't touch the session state, they
/// only return accounts for the manager to store.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// Authenticates and returns the account with its game profiles.
    async fn login(&self, options: &LoginOptions, ctx: &AuthContext) -> Result<Account>;

    /// Returns the account with fresh credentials and profiles.
    /// The returned account should keep `account.id`.
    async fn refresh(&self, account: &Account, ctx: &AuthContext) -> Result<Account>;

    /// Changes the skin of `profile`, returning the updated account.
    async fn set_skin(
        &self,
        account: &Account,
        profile: &GameProfile,
        skin: &SkinUpload,
        ctx: &AuthContext,
    ) -> Result<Account> {
        _ = (profile, skin, ctx);
        Err(AuthError::UnsupportedOperation {
            operation: "setSkin",
            service: account.auth_service.clone(),
        })
    }
}

/// Providers by service name.
///
/// Names nobody registered go to the default provider,
/// so resolving never fails.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn AccountProvider>>>,
    default: Arc<dyn AccountProvider>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(default: Arc<dyn AccountProvider>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default,
        }
    }

    /// Installs `provider` for `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn AccountProvider>) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), provider);
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Arc<dyn AccountProvider> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Explicitly registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl AccountProvider for Named {
        async fn login(&self, _: &LoginOptions, _: &AuthContext) -> Result<Account> {
            Ok(Account {
                id: self.0.to_owned(),
                ..Default::default()
            })
        }

        async fn refresh(&self, account: &Account, _: &AuthContext) -> Result<Account> {
            Ok(account.clone())
        }
    }

    #[tokio::test]
    async fn unknown_names_fall_back_to_default() {
        let registry = ProviderRegistry::new(Arc::new(Named("default")));
        registry.register("custom", Arc::new(Named("custom")));
        let ctx = AuthContext::default();
        let options = LoginOptions::default();

        let custom = registry.resolve("custom").login(&options, &ctx).await.unwrap();
        assert_eq!(custom.id, "custom");
        let other = registry.resolve("nope").login(&options, &ctx).await.unwrap();
        assert_eq!(other.id, "default");
        assert_eq!(registry.names(), vec!["custom".to_owned()]);

        registry.register("custom", Arc::new(Named("replaced")));
        let replaced = registry.resolve("custom").login(&options, &ctx).await.unwrap();
        assert_eq!(replaced.id, "replaced");
    }

    #[tokio::test]
    async fn set_skin_is_unsupported_by_default() {
        let provider = Named("x");
        let account = Account {
            auth_service: "x".to_owned(),
            ..Default::default()
        };
        let skin = SkinUpload {
            skin: None,
            slim: false,
        };
        let err = provider
            .set_skin(&account, &GameProfile::default(), &skin, &AuthContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedOperation { .. }));
    }
}
