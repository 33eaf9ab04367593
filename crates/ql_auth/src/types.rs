//! Account session data model, as stored on disk

use std::{collections::BTreeMap, path::PathBuf};

use ql_core::{
    json_store::{take_field, JsonSchema},
    warn, IntoIoError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AuthError, Result};

/// One account known to the launcher.
///
/// An account can own several game profiles
/// (characters), one of which is selected.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Stable identifier, chosen by the provider
    /// (usually the remote user id).
    pub id: String,
    /// What the user typed in to log in (email or username).
    #[serde(default)]
    pub username: String,
    /// Name of the provider that authenticated this account:
    /// `"offline"`, or the host of an auth server like `"littleskin.cn"`.
    #[serde(default)]
    pub auth_service: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, GameProfile>,
    /// Key into `profiles`, or empty.
    #[serde(default)]
    pub selected_profile: String,
}

impl Account {
    #[must_use]
    pub fn selected_game_profile(&self) -> Option<&GameProfile> {
        self.profiles.get(&self.selected_profile)
    }

    /// Name to show in the UI: the selected profile's name if any.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.selected_game_profile()
            .map_or(self.username.as_str(), |n| n.name.as_str())
    }

    /// Clears `selected_profile` if it doesn't point to a profile.
    pub fn normalize(&mut self) {
        if !self.selected_profile.is_empty() && !self.profiles.contains_key(&self.selected_profile)
        {
            warn!(
                "Account {} selected missing profile {}, clearing selection",
                self.id, self.selected_profile
            );
            self.selected_profile.clear();
        }
    }
}

/// A character under an account.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GameProfile {
    /// UUID without dashes.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub textures: Textures,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Textures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin: Option<SkinTexture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cape: Option<Texture>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SkinTexture {
    pub url: String,
    /// Alex (3px arms) model.
    #[serde(default)]
    pub slim: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    pub url: String,
}

/// A third-party auth server added by the user.
///
/// Stored as `{ "url": ..., <descriptor fields> }`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityEndpoint {
    /// API root, without a trailing slash.
    pub url: String,
    #[serde(flatten)]
    pub descriptor: EndpointDescriptor,
}

impl IdentityEndpoint {
    /// The host name, which is also the `auth_service`
    /// of accounts logged in through this endpoint.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|n| n.host_str().map(str::to_owned))
    }

    /// Whether this endpoint serves accounts of `service`
    /// (a host name or the full API url).
    #[must_use]
    pub fn serves(&self, service: &str) -> bool {
        self.url == service || self.host().is_some_and(|n| n == service)
    }
}

/// What an auth server tells about itself
/// (authlib-injector API metadata).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,
    #[serde(default)]
    pub skin_domains: Vec<String>,
    /// Whether you can log in with a username instead of an email.
    #[serde(default)]
    pub non_email_login: bool,
}

/// The root document: everything the launcher
/// remembers about accounts between runs.
///
/// Stored in `QuantumLauncher/auth/session.json`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,
    /// Key into `accounts`, or empty for "no account selected".
    #[serde(default)]
    pub selected_account_id: String,
    /// Generated once, sent to auth servers that
    /// want to identify the device.
    #[serde(default)]
    pub client_token: String,
    /// In display order.
    #[serde(default)]
    pub identity_endpoints: Vec<IdentityEndpoint>,
    /// Set once the default auth servers were added (or the user already
    /// had some), so removing all of them doesn't bring them back.
    #[serde(default)]
    pub endpoints_seeded: bool,
}

impl SessionState {
    #[must_use]
    pub fn selected_account(&self) -> Option<&Account> {
        self.accounts.get(&self.selected_account_id)
    }

    /// The account to select when the selected one goes away:
    /// any account with a selected profile.
    #[must_use]
    pub fn fallback_account(&self) -> Option<&Account> {
        self.accounts
            .values()
            .find(|n| !n.selected_profile.is_empty())
    }

    /// Checks the selection invariants.
    ///
    /// # Errors
    /// Describes the first selection that points nowhere.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if !self.selected_account_id.is_empty()
            && !self.accounts.contains_key(&self.selected_account_id)
        {
            return Err(format!(
                "selected account {:?} doesn't exist",
                self.selected_account_id
            ));
        }
        for (key, account) in &self.accounts {
            if *key != account.id {
                return Err(format!("account stored as {key:?} has id {:?}", account.id));
            }
            if !account.selected_profile.is_empty()
                && !account.profiles.contains_key(&account.selected_profile)
            {
                return Err(format!(
                    "account {key:?} selected missing profile {:?}",
                    account.selected_profile
                ));
            }
        }
        Ok(())
    }
}

impl JsonSchema for SessionState {
    fn validate(&self) -> std::result::Result<(), String> {
        self.check_invariants()
    }

    fn decode_lenient(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return Self::default();
        };

        // Accounts one by one, so a broken account only loses itself
        let accounts = match object.remove("accounts") {
            Some(Value::Object(accounts)) => accounts
                .into_iter()
                .filter_map(|(key, value)| match serde_json::from_value::<Account>(value) {
                    Ok(account) => Some((key, account)),
                    Err(error) => {
                        warn!("Dropping corrupted account {key:?}: {error}");
                        None
                    }
                })
                .collect(),
            Some(other) if !other.is_null() => {
                warn!("Account list is corrupted, starting without accounts");
                BTreeMap::new()
            }
            _ => BTreeMap::new(),
        };

        Self {
            accounts,
            selected_account_id: take_field(&mut object, "selectedAccountId"),
            client_token: take_field(&mut object, "clientToken"),
            identity_endpoints: take_field(&mut object, "identityEndpoints"),
            endpoints_seeded: take_field(&mut object, "endpointsSeeded"),
        }
    }

    fn normalize(&mut self) {
        for (key, account) in &mut self.accounts {
            if account.id != *key {
                account.id.clone_from(key);
            }
            account.normalize();
        }
        if !self.selected_account_id.is_empty()
            && !self.accounts.contains_key(&self.selected_account_id)
        {
            warn!(
                "Selected account {} doesn't exist, clearing selection",
                self.selected_account_id
            );
            self.selected_account_id.clear();
        }
        // Documents from before the marker existed
        if !self.endpoints_seeded && !self.identity_endpoints.is_empty() {
            self.endpoints_seeded = true;
        }
    }
}

/// Input for [`SessionManager::login`](crate::SessionManager::login).
#[derive(Clone, Debug, Default)]
pub struct LoginOptions {
    pub username: String,
    pub password: String,
    /// Which provider to use: `"offline"`, an auth server host
    /// (`"littleskin.cn"`) or an auth server API url.
    pub service: String,
}

impl LoginOptions {
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            service: service.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(AuthError::InvalidInput("username is empty".to_owned()));
        }
        Ok(())
    }
}

/// The skin image to upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkinSource {
    /// PNG bytes
    Bytes(Vec<u8>),
    /// Path to a PNG file
    File(PathBuf),
}

impl SkinSource {
    /// # Errors
    /// If the file couldn't be read.
    pub async fn read(&self) -> Result<Vec<u8>> {
        match self {
            SkinSource::Bytes(bytes) => Ok(bytes.clone()),
            SkinSource::File(path) => Ok(tokio::fs::read(path).await.path(path)?),
        }
    }
}

/// Input for [`SessionManager::upload_skin`](crate::SessionManager::upload_skin).
///
/// Everything is optional: the account and profile default to
/// the selected ones, `slim` defaults to `false`, and no `skin`
/// resets the profile to the default skin.
#[derive(Clone, Debug, Default)]
pub struct UploadSkinOptions {
    pub user_id: Option<String>,
    pub game_profile_id: Option<String>,
    pub skin: Option<SkinSource>,
    pub slim: Option<bool>,
}

/// A skin change with all defaults resolved, as given to providers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkinUpload {
    /// `None` resets to the default skin.
    pub skin: Option<SkinSource>,
    pub slim: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, profiles: &[&str], selected: &str) -> Account {
        Account {
            id: id.to_owned(),
            username: format!("{id}@example.com"),
            auth_service: "littleskin.cn".to_owned(),
            profiles: profiles
                .iter()
                .map(|n| {
                    (
                        (*n).to_owned(),
                        GameProfile {
                            id: (*n).to_owned(),
                            name: format!("name_{n}"),
                            textures: Textures::default(),
                        },
                    )
                })
                .collect(),
            selected_profile: selected.to_owned(),
        }
    }

    #[test]
    fn normalize_repairs_selection() {
        let mut state = SessionState::default();
        state
            .accounts
            .insert("wrong-key".to_owned(), account("a", &["p1"], "p2"));
        state.selected_account_id = "missing".to_owned();

        state.normalize();

        assert!(state.check_invariants().is_ok());
        assert_eq!(state.selected_account_id, "");
        let fixed = &state.accounts["wrong-key"];
        assert_eq!(fixed.id, "wrong-key");
        assert_eq!(fixed.selected_profile, "");
    }

    #[test]
    fn lenient_decode_drops_only_broken_parts() {
        let value = serde_json::json!({
            "accounts": {
                "a": account("a", &["p1"], "p1"),
                "b": { "id": 5 }
            },
            "selectedAccountId": "a",
            "clientToken": ["not", "a", "string"],
            "identityEndpoints": [{ "url": "https://littleskin.cn/api/yggdrasil", "name": "LittleSkin" }]
        });

        let mut state = SessionState::decode_lenient(value);
        state.normalize();

        assert_eq!(state.accounts.len(), 1);
        assert_eq!(state.selected_account_id, "a");
        assert_eq!(state.client_token, "");
        assert_eq!(state.identity_endpoints[0].descriptor.name, "LittleSkin");
        assert!(state.endpoints_seeded);
    }

    #[test]
    fn fallback_needs_selected_profile() {
        let mut state = SessionState::default();
        state.accounts.insert("a".to_owned(), account("a", &[], ""));
        assert!(state.fallback_account().is_none());

        state
            .accounts
            .insert("b".to_owned(), account("b", &["p"], "p"));
        assert_eq!(state.fallback_account().map(|n| n.id.as_str()), Some("b"));
    }

    #[test]
    fn endpoint_matches_host_or_url() {
        let endpoint = IdentityEndpoint {
            url: "https://littleskin.cn/api/yggdrasil".to_owned(),
            descriptor: EndpointDescriptor::default(),
        };
        assert!(endpoint.serves("littleskin.cn"));
        assert!(endpoint.serves("https://littleskin.cn/api/yggdrasil"));
        assert!(!endpoint.serves("ely.by"));
    }
}
