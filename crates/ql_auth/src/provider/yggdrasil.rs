//! Yggdrasil (authlib-injector) auth servers, like littleskin or ely.by

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use ql_core::{
    file_utils::check_for_success, info, pt, warn, IntoJsonError, RequestError, CLIENT,
};
use reqwest::{multipart, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{AccountProvider, AuthContext};
use crate::{
    normalize_url, Account, AuthError, GameProfile, LoginOptions, Result, SkinTexture,
    SkinUpload, Texture, Textures, TokenStorage,
};

#[derive(Serialize)]
struct Agent {
    name: &'static str,
    version: u8,
}
const AGENT: Agent = Agent {
    name: "Minecraft",
    version: 1,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateRequest<'a> {
    agent: Agent,
    username: &'a str,
    password: &'a str,
    client_token: &'a str,
    request_user: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    access_token: &'a str,
    client_token: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    request_user: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    access_token: String,
    #[serde(default)]
    available_profiles: Vec<ProfileRef>,
    selected_profile: Option<ProfileRef>,
    user: Option<UserRef>,
}

#[derive(Deserialize, Clone)]
struct ProfileRef {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct UserRef {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Deserialize)]
struct SessionProfile {
    #[serde(default)]
    properties: Vec<Property>,
}

#[derive(Deserialize)]
struct Property {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct TexturesProperty {
    #[serde(default)]
    textures: TexturesPayload,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
struct TexturesPayload {
    skin: Option<TexturePayload>,
    cape: Option<TexturePayload>,
}

#[derive(Deserialize)]
struct TexturePayload {
    url: String,
    #[serde(default)]
    metadata: Option<TextureMetadata>,
}

#[derive(Deserialize)]
struct TextureMetadata {
    #[serde(default)]
    model: String,
}

/// The default provider: any service that isn't
/// registered otherwise is assumed to be a Yggdrasil server.
///
/// Access tokens go into the [`TokenStorage`], keyed by account id.
pub struct YggdrasilProvider {
    tokens: Arc<dyn TokenStorage>,
    timeout: Duration,
}

impl YggdrasilProvider {
    #[must_use]
    pub fn new(tokens: Arc<dyn TokenStorage>, timeout: Duration) -> Self {
        Self { tokens, timeout }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        Ok(request.timeout(self.timeout).send().await?)
    }

    async fn stored_token(&self, account: &Account) -> Result<String> {
        self.tokens.get(&account.id).await?.ok_or_else(|| {
            AuthError::InvalidCredentials(format!("no stored token for {}", account.username))
        })
    }

    async fn fetch_textures(&self, api: &str, profile_id: &str) -> Result<Textures> {
        let url = format!("{api}/sessionserver/session/minecraft/profile/{profile_id}?unsigned=true");
        let response = self.send(CLIENT.get(&url)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Textures::default());
        }
        check_for_success(&response)?;
        let text = response.text().await?;
        let profile: SessionProfile = serde_json::from_str(&text).json(text)?;

        let Some(property) = profile.properties.into_iter().find(|n| n.name == "textures") else {
            return Ok(Textures::default());
        };
        let decoded = STANDARD
            .decode(property.value.trim())
            .map_err(|err| AuthError::Provider(format!("invalid textures property: {err}")))?;
        let decoded = String::from_utf8_lossy(&decoded).into_owned();
        let textures: TexturesProperty = serde_json::from_str(&decoded).json(decoded)?;

        Ok(Textures {
            skin: textures.textures.skin.map(|n| SkinTexture {
                slim: n.metadata.is_some_and(|m| m.model == "slim"),
                url: n.url,
            }),
            cape: textures.textures.cape.map(|n| Texture { url: n.url }),
        })
    }

    /// Textures are nice to have, a failure here
    /// shouldn't fail the whole login.
    async fn profile_with_textures(&self, api: &str, profile: ProfileRef) -> GameProfile {
        let textures = match self.fetch_textures(api, &profile.id).await {
            Ok(n) => n,
            Err(err) => {
                warn!("Couldn't load textures of {}: {err}", profile.name);
                Textures::default()
            }
        };
        GameProfile {
            id: profile.id,
            name: profile.name,
            textures,
        }
    }

    async fn profiles_of(&self, api: &str, refs: Vec<ProfileRef>) -> BTreeMap<String, GameProfile> {
        let mut profiles = BTreeMap::new();
        for profile in refs {
            let profile = self.profile_with_textures(api, profile).await;
            profiles.insert(profile.id.clone(), profile);
        }
        profiles
    }
}

/// Best guess at the textures after a skin change whose result
/// couldn't be fetched: a reset is known to have cleared the skin,
/// an upload keeps the old textures until the next refresh.
fn textures_after_failed_reload(previous: &Textures, skin: &SkinUpload) -> Textures {
    let mut textures = previous.clone();
    if skin.skin.is_none() {
        textures.skin = None;
    }
    textures
}

/// Finds the API root for accounts of `service`.
fn api_root(service: &str, ctx: &AuthContext) -> Result<String> {
    if let Some(endpoint) = ctx.endpoint_for(service) {
        return Ok(endpoint.url.clone());
    }
    normalize_url(service).map_err(|_| AuthError::UnknownService(service.to_owned()))
}

/// `auth_service` of accounts from `api`: its host name.
fn service_name(api: &str) -> String {
    reqwest::Url::parse(api)
        .ok()
        .and_then(|n| n.host_str().map(str::to_owned))
        .unwrap_or_else(|| api.to_owned())
}

/// Turns an error response into the matching [`AuthError`].
async fn read_error(response: Response, service: &str) -> AuthError {
    let status = response.status();
    let url = response.url().clone();
    let text = match response.text().await {
        Ok(n) => n,
        Err(err) => return err.into(),
    };
    let Ok(body) = serde_json::from_str::<ErrorResponse>(&text) else {
        return RequestError::DownloadError { code: status, url }.into();
    };

    let message = if body.error_message.is_empty() {
        body.error
    } else {
        body.error_message
    };
    if message.to_lowercase().contains("two factor") {
        AuthError::TwoFactorRequired
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        AuthError::InvalidCredentials(message)
    } else {
        AuthError::Rejected {
            service: service.to_owned(),
            message,
        }
    }
}

async fn read_account(response: Response, service: &str) -> Result<AccountResponse> {
    if !response.status().is_success() {
        return Err(read_error(response, service).await);
    }
    let text = response.text().await?;
    Ok(serde_json::from_str(&text).json(text)?)
}

#[async_trait]
impl AccountProvider for YggdrasilProvider {
    async fn login(&self, options: &LoginOptions, ctx: &AuthContext) -> Result<Account> {
        let api = api_root(&options.service, ctx)?;
        let service = service_name(&api);
        info!("Logging into {service}... ({})", options.username);

        let request = AuthenticateRequest {
            agent: AGENT,
            username: &options.username,
            password: &options.password,
            client_token: &ctx.client_token,
            request_user: true,
        };
        let response = self
            .send(CLIENT.post(format!("{api}/authserver/authenticate")).json(&request))
            .await?;
        let response = read_account(response, &service).await?;

        let id = response
            .user
            .map(|n| n.id)
            .or_else(|| response.selected_profile.as_ref().map(|n| n.id.clone()))
            .or_else(|| response.available_profiles.first().map(|n| n.id.clone()))
            .ok_or_else(|| AuthError::Provider(format!("{service} returned no user id")))?;

        self.tokens.put(&id, &response.access_token).await?;

        let selected_profile = match (&response.selected_profile, &response.available_profiles[..]) {
            (Some(profile), _) => profile.id.clone(),
            (None, [only]) => only.id.clone(),
            _ => String::new(),
        };
        let mut refs = response.available_profiles;
        if let Some(selected) = response.selected_profile {
            if !refs.iter().any(|n| n.id == selected.id) {
                refs.push(selected);
            }
        }
        pt!("Found {} game profile(s)", refs.len());

        let mut account = Account {
            id,
            username: options.username.clone(),
            auth_service: service,
            profiles: self.profiles_of(&api, refs).await,
            selected_profile,
        };
        account.normalize();
        Ok(account)
    }

    async fn refresh(&self, account: &Account, ctx: &AuthContext) -> Result<Account> {
        let api = api_root(&account.auth_service, ctx)?;
        pt!("Refreshing {} account...", account.auth_service);
        let token = self.stored_token(account).await?;

        let validate = TokenRequest {
            access_token: &token,
            client_token: &ctx.client_token,
            request_user: false,
        };
        let response = self
            .send(CLIENT.post(format!("{api}/authserver/validate")).json(&validate))
            .await?;

        let mut refs: Vec<ProfileRef> = account
            .profiles
            .values()
            .map(|n| ProfileRef {
                id: n.id.clone(),
                name: n.name.clone(),
            })
            .collect();

        if !response.status().is_success() {
            let refresh = TokenRequest {
                access_token: &token,
                client_token: &ctx.client_token,
                request_user: true,
            };
            let response = self
                .send(CLIENT.post(format!("{api}/authserver/refresh")).json(&refresh))
                .await?;
            let response = read_account(response, &account.auth_service).await?;
            self.tokens.put(&account.id, &response.access_token).await?;

            if !response.available_profiles.is_empty() {
                refs = response.available_profiles;
            }
            if let Some(selected) = response.selected_profile {
                if let Some(n) = refs.iter_mut().find(|n| n.id == selected.id) {
                    n.name = selected.name;
                } else {
                    refs.push(selected);
                }
            }
        }

        let mut refreshed = Account {
            id: account.id.clone(),
            username: account.username.clone(),
            auth_service: account.auth_service.clone(),
            profiles: self.profiles_of(&api, refs).await,
            selected_profile: account.selected_profile.clone(),
        };
        refreshed.normalize();
        Ok(refreshed)
    }

    async fn set_skin(
        &self,
        account: &Account,
        profile: &GameProfile,
        skin: &SkinUpload,
        ctx: &AuthContext,
    ) -> Result<Account> {
        let api = api_root(&account.auth_service, ctx)?;
        let token = self.stored_token(account).await?;
        let url = format!("{api}/api/user/profile/{}/skin", profile.id);

        let request = if let Some(source) = &skin.skin {
            info!("Uploading skin for {}", profile.name);
            let file = multipart::Part::bytes(source.read().await?)
                .file_name("skin.png")
                .mime_str("image/png")?;
            let form = multipart::Form::new()
                .text("model", if skin.slim { "slim" } else { "" })
                .part("file", file);
            CLIENT.put(&url).multipart(form)
        } else {
            info!("Resetting skin of {}", profile.name);
            CLIENT.delete(&url)
        };
        let response = self.send(request.bearer_auth(&token)).await?;
        if !response.status().is_success() {
            return Err(read_error(response, &account.auth_service).await);
        }

        let mut updated = account.clone();
        let textures = match self.fetch_textures(&api, &profile.id).await {
            Ok(n) => n,
            Err(err) => {
                warn!("Couldn't reload textures of {}: {err}", profile.name);
                textures_after_failed_reload(&profile.textures, skin)
            }
        };
        if let Some(entry) = updated.profiles.get_mut(&profile.id) {
            entry.textures = textures;
        }
        Ok(updated)
    }
}
