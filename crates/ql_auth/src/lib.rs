//! # Account sessions for Quantum Launcher
//!
//! Keeps track of the accounts logged into the launcher,
//! which one is selected, and the third-party
//! (authlib-injector) auth servers the user added.
//!
//! The entry point is [`SessionManager`]:
//!
//! ```no_run
//! # async fn run() -> Result<(), ql_auth::AuthError> {
//! use ql_auth::{LoginOptions, SessionConfig, SessionManager};
//!
//! let manager = SessionManager::builder(SessionConfig::load().await)
//!     .load()
//!     .await;
//! // Seeds the default auth servers on first run,
//! // refreshes the selected account.
//! manager.initialize().await;
//!
//! manager
//!     .login(LoginOptions::new("steve@example.com", "hunter2", "littleskin.cn"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Login, refresh and skin uploads go through an [`AccountProvider`].
//! Unknown service names fall back to the built-in
//! [`YggdrasilProvider`], `"offline"` is the [`OfflineProvider`].
//!
//! State is saved to `<launcher dir>/auth/session.json`
//! in the background after every change.

mod cancel;
mod config;
mod endpoint;
mod error;
mod events;
mod manager;
mod persist;
mod provider;
mod token_store;
mod types;

pub use cancel::{CancelHandle, CancelRegistry, OperationKind};
pub use config::SessionConfig;
pub use endpoint::{normalize_url, EndpointLoader, HttpEndpointLoader};
pub use error::{AuthError, KeyringError, Result};
pub use events::{BroadcastNotifier, SessionEvent, StateNotifier};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use persist::Persister;
pub use provider::{
    offline_uuid, AccountProvider, AuthContext, OfflineProvider, ProviderRegistry,
    YggdrasilProvider, OFFLINE_SERVICE,
};
pub use token_store::{KeyringTokenStorage, MemoryTokenStorage, TokenStorage, TokenStoreError};
pub use types::{
    Account, EndpointDescriptor, GameProfile, IdentityEndpoint, LoginOptions, SessionState,
    SkinSource, SkinTexture, SkinUpload, Texture, Textures, UploadSkinOptions,
};
