//! The account session: state, operations and their ordering.
//!
//! # Concurrency
//! - `login`, `refresh_user`, `select_user`, `select_game_profile`
//!   and `upload_skin` each run one at a time (per operation),
//!   later calls waiting for earlier ones.
//! - Concurrent removals of the same account share one execution.
//! - The state lock is never held across an `.await`. Changes are
//!   applied, notified and queued for saving in one critical section,
//!   so observers see them in the order they happened.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::future::join_all;
use ql_core::{
    err,
    guard::{KeyedMutex, SingleFlight},
    info,
    json_store::JsonStore,
    pt, warn,
};
use tokio::sync::broadcast;

use crate::{
    normalize_url, Account, AccountProvider, AuthContext, AuthError, BroadcastNotifier,
    CancelHandle, CancelRegistry, EndpointLoader, HttpEndpointLoader, IdentityEndpoint,
    KeyringTokenStorage, LoginOptions, OfflineProvider, OperationKind, Persister,
    ProviderRegistry, Result, SessionConfig, SessionEvent, SessionState, SkinUpload,
    StateNotifier, TokenStorage, UploadSkinOptions, YggdrasilProvider, OFFLINE_SERVICE,
};

/// Sets up a [`SessionManager`]. Everything not given
/// explicitly is built from the [`SessionConfig`].
pub struct SessionManagerBuilder {
    config: SessionConfig,
    tokens: Option<Arc<dyn TokenStorage>>,
    loader: Option<Arc<dyn EndpointLoader>>,
    default_provider: Option<Arc<dyn AccountProvider>>,
    providers: Vec<(String, Arc<dyn AccountProvider>)>,
    notifiers: Vec<Arc<dyn StateNotifier>>,
}

impl SessionManagerBuilder {
    /// Default: the system keyring.
    #[must_use]
    pub fn token_storage(mut self, tokens: Arc<dyn TokenStorage>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Default: [`HttpEndpointLoader`].
    #[must_use]
    pub fn endpoint_loader(mut self, loader: Arc<dyn EndpointLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// The provider for services nobody registered.
    /// Default: [`YggdrasilProvider`].
    #[must_use]
    pub fn default_provider(mut self, provider: Arc<dyn AccountProvider>) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// `"offline"` is registered by default, this can replace it.
    #[must_use]
    pub fn provider(mut self, name: impl Into<String>, provider: Arc<dyn AccountProvider>) -> Self {
        self.providers.push((name.into(), provider));
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn StateNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Loads the saved session and starts the save task.
    ///
    /// Doesn't fail: an unreadable session is logged
    /// and the manager starts empty.
    /// Must be called inside a tokio runtime.
    pub async fn load(self) -> SessionManager {
        let config = self.config;
        let tokens = self.tokens.unwrap_or_else(|| {
            Arc::new(KeyringTokenStorage::new(config.c_keyring_service()))
        });
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(HttpEndpointLoader::new(config.c_request_timeout())));
        let default_provider = self.default_provider.unwrap_or_else(|| {
            Arc::new(YggdrasilProvider::new(
                tokens.clone(),
                config.c_request_timeout(),
            ))
        });

        let providers = ProviderRegistry::new(default_provider);
        providers.register(OFFLINE_SERVICE, Arc::new(OfflineProvider));
        for (name, provider) in self.providers {
            providers.register(name, provider);
        }

        let store = JsonStore::new(config.c_session_file()).with_legacy_paths(config.c_legacy_files());
        let mut state = match store.read().await {
            Ok(n) => n,
            Err(error) => {
                err!("Couldn't load accounts from {:?}: {error}", store.path());
                SessionState::default()
            }
        };
        pt!(
            "Loaded {} account(s), {} auth server(s)",
            state.accounts.len(),
            state.identity_endpoints.len()
        );

        let persister = Persister::spawn(store, config.c_persist_debounce());
        if state.client_token.is_empty() {
            state.client_token = generate_client_token();
            persister.enqueue(state.clone());
        }

        SessionManager {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                providers,
                tokens,
                loader,
                guards: KeyedMutex::new(),
                removals: SingleFlight::new(),
                cancels: CancelRegistry::new(),
                events: BroadcastNotifier::default(),
                notifiers: RwLock::new(self.notifiers),
                persister,
            }),
        }
    }
}

fn generate_client_token() -> String {
    rand::random::<[u8; 16]>()
        .iter()
        .map(|n| format!("{n:02x}"))
        .collect()
}

/// An operation that [`SessionManager::abort_login`] and friends can reach.
/// Leaves the cancel slot when dropped.
struct Operation<'a> {
    cancels: &'a CancelRegistry,
    handle: CancelHandle,
    ctx: AuthContext,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.cancels.end(&self.handle);
    }
}

struct Inner {
    config: SessionConfig,
    state: Mutex<SessionState>,
    providers: ProviderRegistry,
    tokens: Arc<dyn TokenStorage>,
    loader: Arc<dyn EndpointLoader>,
    guards: KeyedMutex,
    removals: SingleFlight<()>,
    cancels: CancelRegistry,
    events: BroadcastNotifier,
    notifiers: RwLock<Vec<Arc<dyn StateNotifier>>>,
    persister: Persister,
}

/// Owns the account session. Cheap to clone,
/// all clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    #[must_use]
    pub fn builder(config: SessionConfig) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            tokens: None,
            loader: None,
            default_provider: None,
            providers: Vec::new(),
            notifiers: Vec::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: &SessionEvent) {
        self.inner.events.notify(event);
        for notifier in self
            .inner
            .notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            notifier.notify(event);
        }
    }

    /// Applies `f` to the state. If it reported any events,
    /// they're sent out and the new state is queued for saving.
    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState, &mut Vec<SessionEvent>) -> R) -> R {
        let mut state = self.lock_state();
        let mut events = Vec::new();
        let out = f(&mut state, &mut events);
        if !events.is_empty() {
            debug_assert!(state.check_invariants().is_ok());
            self.inner.persister.enqueue(state.clone());
            for event in &events {
                self.notify(event);
            }
        }
        out
    }

    /// Starts an abortable operation of `kind`.
    fn begin(&self, kind: OperationKind) -> Operation<'_> {
        let handle = self.inner.cancels.begin(kind);
        let ctx = {
            let state = self.lock_state();
            AuthContext {
                client_token: state.client_token.clone(),
                endpoints: state.identity_endpoints.clone(),
                cancel: handle.token().clone(),
            }
        };
        Operation {
            cancels: &self.inner.cancels,
            handle,
            ctx,
        }
    }

    /// Logs in with a provider and selects the new account.
    /// An account that was already there is replaced.
    ///
    /// # Errors
    /// - [`AuthError::InvalidInput`] for an empty username
    /// - [`AuthError::Cancelled`] if [`SessionManager::abort_login`] was called
    /// - whatever the provider failed with
    ///
    /// The state is unchanged on any error.
    pub async fn login(&self, options: LoginOptions) -> Result<Account> {
        options.validate()?;
        let _guard = self.inner.guards.lock("login").await;

        let provider = self.inner.providers.resolve(&options.service);
        let op = self.begin(OperationKind::Login);
        let mut account = op.handle.run(provider.login(&options, &op.ctx)).await?;
        drop(op);
        if account.id.is_empty() {
            return Err(AuthError::Provider(format!(
                "{} returned an account without an id",
                options.service
            )));
        }
        account.normalize();
        info!("Logged in as {}", account.display_name());

        self.mutate(|state, events| {
            state.accounts.insert(account.id.clone(), account.clone());
            events.push(SessionEvent::UserProfile(account.clone()));
            select(state, events, &account.id);
        });
        Ok(account)
    }

    /// Refreshes the credentials and profiles of the selected account.
    /// Does nothing if no account is selected.
    ///
    /// # Errors
    /// [`AuthError::Cancelled`] if [`SessionManager::abort_refresh`]
    /// was called, or whatever the provider failed with.
    /// The state is unchanged on any error.
    pub async fn refresh_user(&self) -> Result<()> {
        let _guard = self.inner.guards.lock("refreshUser").await;

        let Some(account) = self.selected_account() else {
            pt!("No account selected, nothing to refresh");
            return Ok(());
        };
        let provider = self.inner.providers.resolve(&account.auth_service);
        let op = self.begin(OperationKind::Refresh);
        let refreshed = op.handle.run(provider.refresh(&account, &op.ctx)).await?;
        drop(op);
        self.replace_account(&account.id, refreshed);
        Ok(())
    }

    /// Puts a provider's updated account in place of `id`,
    /// unless the account was removed in the meantime.
    fn replace_account(&self, id: &str, mut updated: Account) {
        updated.id = id.to_owned();
        updated.normalize();
        self.mutate(|state, events| {
            let Some(entry) = state.accounts.get_mut(id) else {
                warn!("Account {id} was removed while updating, dropping the update");
                return;
            };
            *entry = updated.clone();
            events.push(SessionEvent::UserProfile(updated));
        });
    }

    /// Selects the account `id` and refreshes it.
    ///
    /// Does nothing if it's already selected.
    /// An unknown `id` is logged and ignored.
    ///
    /// # Errors
    /// [`AuthError::InvalidInput`] for an empty id,
    /// or whatever the refresh failed with (the account stays selected).
    pub async fn select_user(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(AuthError::InvalidInput("account id is empty".to_owned()));
        }
        let _guard = self.inner.guards.lock("selectUser").await;

        let changed = self.mutate(|state, events| {
            if state.selected_account_id == id {
                return false;
            }
            if !state.accounts.contains_key(id) {
                warn!("Can't select account {id}: not found");
                return false;
            }
            select(state, events, id);
            true
        });
        if changed {
            self.refresh_user().await?;
        }
        Ok(())
    }

    /// Selects a game profile of the selected account.
    /// A missing account or profile is logged and ignored.
    ///
    /// # Errors
    /// [`AuthError::InvalidInput`] for an empty id.
    pub async fn select_game_profile(&self, profile_id: &str) -> Result<()> {
        if profile_id.is_empty() {
            return Err(AuthError::InvalidInput("profile id is empty".to_owned()));
        }
        let _guard = self.inner.guards.lock("selectGameProfile").await;

        self.mutate(|state, events| {
            let account_id = state.selected_account_id.clone();
            let Some(account) = state.accounts.get_mut(&account_id) else {
                warn!("Can't select game profile {profile_id}: no account selected");
                return;
            };
            if !account.profiles.contains_key(profile_id) {
                warn!("Can't select game profile {profile_id}: not in account {account_id}");
                return;
            }
            if account.selected_profile == profile_id {
                return;
            }
            account.selected_profile = profile_id.to_owned();
            events.push(SessionEvent::UserGameProfileSelect {
                account_id,
                profile_id: profile_id.to_owned(),
            });
        });
        Ok(())
    }

    /// Uploads a skin (or resets it, with no `skin`).
    ///
    /// The account and profile default to the selected ones.
    ///
    /// # Errors
    /// - [`AuthError::InvalidInput`] if nothing is selected to default to
    /// - [`AuthError::AccountNotFound`], [`AuthError::ProfileNotFound`]
    /// - [`AuthError::Cancelled`] if [`SessionManager::abort_skin_upload`] was called
    /// - whatever the provider failed with
    pub async fn upload_skin(&self, options: UploadSkinOptions) -> Result<()> {
        let _guard = self.inner.guards.lock("uploadSkin").await;

        let (account, profile) = {
            let state = self.lock_state();
            let account_id = options
                .user_id
                .clone()
                .unwrap_or_else(|| state.selected_account_id.clone());
            if account_id.is_empty() {
                return Err(AuthError::InvalidInput("no account selected".to_owned()));
            }
            let account = state
                .accounts
                .get(&account_id)
                .cloned()
                .ok_or(AuthError::AccountNotFound(account_id))?;

            let profile_id = options
                .game_profile_id
                .clone()
                .unwrap_or_else(|| account.selected_profile.clone());
            let profile = account.profiles.get(&profile_id).cloned().ok_or_else(|| {
                AuthError::ProfileNotFound {
                    account: account.id.clone(),
                    profile: profile_id,
                }
            })?;
            (account, profile)
        };
        let skin = SkinUpload {
            skin: options.skin,
            slim: options.slim.unwrap_or(false),
        };

        let provider = self.inner.providers.resolve(&account.auth_service);
        let op = self.begin(OperationKind::SetSkin);
        let updated = op
            .handle
            .run(provider.set_skin(&account, &profile, &skin, &op.ctx))
            .await?;
        drop(op);
        self.replace_account(&account.id, updated);
        Ok(())
    }

    /// Removes an account. If it was selected, some other account
    /// with a selected profile is selected instead (or none).
    ///
    /// Concurrent calls for the same id share one removal.
    /// An unknown id is logged and ignored.
    /// The account's stored token is deleted too.
    ///
    /// # Errors
    /// [`AuthError::InvalidInput`] for an empty id.
    pub async fn remove_user_profile(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(AuthError::InvalidInput("account id is empty".to_owned()));
        }
        let this = self.clone();
        let key = id.to_owned();
        self.inner
            .removals
            .run(id, move || async move { this.remove_now(&key).await })
            .await;
        Ok(())
    }

    async fn remove_now(&self, id: &str) {
        let removed = self.mutate(|state, events| {
            if state.accounts.remove(id).is_none() {
                warn!("Can't remove account {id}: not found");
                return false;
            }
            info!("Removed account {id}");
            events.push(SessionEvent::UserProfileRemove(id.to_owned()));

            if state.selected_account_id == id {
                let next = state
                    .fallback_account()
                    .map(|n| n.id.clone())
                    .unwrap_or_default();
                select(state, events, &next);
            }
            true
        });
        if removed {
            if let Err(error) = self.inner.tokens.delete(id).await {
                err!("Couldn't delete the stored token of {id}: {error}");
            }
        }
    }

    /// Adds a third-party auth server by its API url.
    ///
    /// The server's metadata is loaded first, nothing is stored
    /// if that fails. Adding a url that's already there
    /// updates it in place.
    ///
    /// # Errors
    /// [`AuthError::InvalidInput`] for a non-http(s) url,
    /// or whatever loading the metadata failed with.
    pub async fn register_external_provider(&self, url: &str) -> Result<IdentityEndpoint> {
        let url = normalize_url(url)?;
        let endpoint = self.inner.loader.load(&url).await?;
        info!("Added auth server {} ({})", endpoint.descriptor.name, endpoint.url);

        self.mutate(|state, events| {
            add_endpoint(state, events, endpoint.clone(), &url);
        });
        Ok(endpoint)
    }

    /// Removes a third-party auth server.
    /// An unknown url is logged and ignored.
    ///
    /// # Errors
    /// [`AuthError::InvalidInput`] for a non-http(s) url.
    pub async fn deregister_external_provider(&self, url: &str) -> Result<()> {
        let url = normalize_url(url)?;
        self.mutate(|state, events| {
            let Some(index) = state.identity_endpoints.iter().position(|n| n.url == url) else {
                warn!("Can't remove auth server {url}: not found");
                return;
            };
            state.identity_endpoints.remove(index);
            events.push(SessionEvent::AuthServices(state.identity_endpoints.clone()));
        });
        Ok(())
    }

    /// Returns `false` if no login was running.
    pub fn abort_login(&self) -> bool {
        self.inner.cancels.abort(OperationKind::Login)
    }

    /// Returns `false` if no refresh was running.
    pub fn abort_refresh(&self) -> bool {
        self.inner.cancels.abort(OperationKind::Refresh)
    }

    /// Returns `false` if no skin upload was running.
    pub fn abort_skin_upload(&self) -> bool {
        self.inner.cancels.abort(OperationKind::SetSkin)
    }

    /// Startup work that needs the network:
    ///
    /// 1. On first run, adds the default auth servers.
    /// 2. Refreshes the selected account, or if none is
    ///    selected, selects any account (and refreshes that).
    ///
    /// Failures are logged, not returned.
    pub async fn initialize(&self) {
        if !self.lock_state().endpoints_seeded {
            self.seed_endpoints().await;
        }
        let endpoints = self.lock_state().identity_endpoints.clone();
        self.notify(&SessionEvent::AuthServices(endpoints));

        self.mutate(|state, events| {
            if state.selected_account().is_none() {
                if let Some(next) = state.accounts.keys().next().cloned() {
                    select(state, events, &next);
                }
            }
        });
        if let Err(error) = self.refresh_user().await {
            err!("Couldn't refresh account: {error}");
        }
    }

    async fn seed_endpoints(&self) {
        info!("Adding default auth servers");
        let urls = self.inner.config.c_default_endpoints();
        let loaded = join_all(urls.iter().map(|url| async move {
            let url = normalize_url(url)?;
            let endpoint = self.inner.loader.load(&url).await?;
            Ok::<_, AuthError>((url, endpoint))
        }))
        .await;

        self.mutate(|state, events| {
            for (result, requested) in loaded.into_iter().zip(&urls) {
                match result {
                    Ok((url, endpoint)) => {
                        let known = state
                            .identity_endpoints
                            .iter()
                            .any(|n| n.url == url || n.url == endpoint.url);
                        if !known {
                            add_endpoint(state, events, endpoint, &url);
                        }
                    }
                    Err(error) => err!("Couldn't add auth server {requested}: {error}"),
                }
            }
            // Nothing could be loaded (offline?): try again next start
            if !state.identity_endpoints.is_empty() {
                state.endpoints_seeded = true;
                events.push(SessionEvent::AuthServices(state.identity_endpoints.clone()));
            }
        });
    }

    /// A copy of the whole session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock_state().clone()
    }

    #[must_use]
    pub fn selected_account(&self) -> Option<Account> {
        self.lock_state().selected_account().cloned()
    }

    #[must_use]
    pub fn client_token(&self) -> String {
        self.lock_state().client_token.clone()
    }

    /// The stored access token of an account, for launching the game.
    ///
    /// # Errors
    /// If the token storage failed.
    pub async fn access_token(&self, account_id: &str) -> Result<Option<String>> {
        Ok(self.inner.tokens.get(account_id).await?)
    }

    /// Events from now on. See [`SessionEvent`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_notifier(&self, notifier: Arc<dyn StateNotifier>) {
        self.inner
            .notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notifier);
    }

    /// Installs a provider for `name`, replacing any previous one.
    pub fn register_provider(&self, name: impl Into<String>, provider: Arc<dyn AccountProvider>) {
        self.inner.providers.register(name, provider);
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.inner.providers.names()
    }

    /// Waits until all changes so far are saved.
    pub async fn flush(&self) {
        self.inner.persister.flush().await;
    }
}

/// Selects `account_id` (empty: nothing) and reports it.
fn select(state: &mut SessionState, events: &mut Vec<SessionEvent>, account_id: &str) {
    state.selected_account_id = account_id.to_owned();
    let profile_id = state
        .selected_account()
        .map(|n| n.selected_profile.clone())
        .unwrap_or_default();
    events.push(SessionEvent::UserSelect {
        account_id: account_id.to_owned(),
        profile_id,
    });
}

/// Adds `endpoint`, or updates it in place if it (or the
/// `requested` url that led to it) is already there.
fn add_endpoint(
    state: &mut SessionState,
    events: &mut Vec<SessionEvent>,
    endpoint: IdentityEndpoint,
    requested: &str,
) {
    let existing = state
        .identity_endpoints
        .iter()
        .position(|n| n.url == endpoint.url || n.url == requested);
    if let Some(index) = existing {
        state.identity_endpoints[index] = endpoint;
        events.push(SessionEvent::AuthServices(state.identity_endpoints.clone()));
    } else {
        state.identity_endpoints.push(endpoint.clone());
        events.push(SessionEvent::AuthServiceAdd(endpoint));
    }
}
