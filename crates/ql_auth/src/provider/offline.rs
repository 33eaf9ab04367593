//! Offline accounts: just a username, no server

use std::collections::BTreeMap;

use async_trait::async_trait;
use md5::{Digest, Md5};
use ql_core::info;

use super::{AccountProvider, AuthContext};
use crate::{Account, AuthError, GameProfile, LoginOptions, Result};

/// Service name of offline accounts.
pub const OFFLINE_SERVICE: &str = "offline";

/// The UUID a vanilla server in offline mode gives `username`
/// (name-based v3 UUID of `"OfflinePlayer:<username>"`),
/// as hex without dashes.
#[must_use]
pub fn offline_uuid(username: &str) -> String {
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&Md5::digest(format!("OfflinePlayer:{username}")));
    hash[6] = (hash[6] & 0x0f) | 0x30;
    hash[8] = (hash[8] & 0x3f) | 0x80;
    hash.iter().map(|n| format!("{n:02x}")).collect()
}

fn check_username(username: &str) -> Result<()> {
    if !(3..=16).contains(&username.len()) {
        return Err(AuthError::InvalidInput(
            "offline username must be between 3 and 16 characters".to_owned(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(AuthError::InvalidInput(
            "offline username can only contain letters, numbers, and underscores".to_owned(),
        ));
    }
    Ok(())
}

/// Username-only accounts (no password, no skins).
#[derive(Default)]
pub struct OfflineProvider;

#[async_trait]
impl AccountProvider for OfflineProvider {
    async fn login(&self, options: &LoginOptions, _ctx: &AuthContext) -> Result<Account> {
        let username = options.username.trim();
        check_username(username)?;
        info!("Adding offline account {username}");

        let uuid = offline_uuid(username);
        let profile = GameProfile {
            id: uuid.clone(),
            name: username.to_owned(),
            textures: Default::default(),
        };
        Ok(Account {
            id: uuid.clone(),
            username: username.to_owned(),
            auth_service: OFFLINE_SERVICE.to_owned(),
            profiles: BTreeMap::from([(uuid.clone(), profile)]),
            selected_profile: uuid,
        })
    }

    async fn refresh(&self, account: &Account, _ctx: &AuthContext) -> Result<Account> {
        Ok(account.clone())
    }
}
