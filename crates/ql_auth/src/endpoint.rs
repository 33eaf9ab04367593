//! Loading third-party auth server (authlib-injector) metadata

use std::time::Duration;

use async_trait::async_trait;
use ql_core::{file_utils::check_for_success, pt, IntoJsonError, CLIENT};
use serde::Deserialize;

use crate::{AuthError, EndpointDescriptor, IdentityEndpoint, Result};

/// Servers can point to their real API root with this header
/// (so users can type in the website address).
const API_LOCATION_HEADER: &str = "x-authlib-injector-api-location";

/// Checks that `url` is an http(s) url and
/// strips the trailing slash.
///
/// # Errors
/// [`AuthError::InvalidInput`] for anything else.
pub fn normalize_url(url: &str) -> Result<String> {
    let url = url.trim();
    let parsed = reqwest::Url::parse(url)
        .map_err(|err| AuthError::InvalidInput(format!("invalid url {url:?}: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AuthError::InvalidInput(format!(
            "{url:?} is not an http(s) url"
        )));
    }
    Ok(url.trim_end_matches('/').to_owned())
}

/// Fetches what an auth server says about itself.
#[async_trait]
pub trait EndpointLoader: Send + Sync {
    /// `url` is already normalized.
    async fn load(&self, url: &str) -> Result<IdentityEndpoint>;
}

/// Loads the metadata document at the API root over HTTP.
pub struct HttpEndpointLoader {
    timeout: Duration,
}

impl HttpEndpointLoader {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        Ok(CLIENT.get(url).timeout(self.timeout).send().await?)
    }
}

#[async_trait]
impl EndpointLoader for HttpEndpointLoader {
    async fn load(&self, url: &str) -> Result<IdentityEndpoint> {
        pt!("Loading auth server info: {url}");
        let mut url = url.to_owned();
        let mut response = self.get(&url).await?;

        let location = response
            .headers()
            .get(API_LOCATION_HEADER)
            .and_then(|n| n.to_str().ok())
            .and_then(|n| response.url().join(n).ok());
        if let Some(location) = location {
            let location = normalize_url(location.as_str())?;
            if location != url {
                pt!("API is at {location}");
                response = self.get(&location).await?;
                url = location;
            }
        }

        check_for_success(&response)?;
        let text = response.text().await?;
        let descriptor = parse_metadata(&text).map_err(|reason| AuthError::Endpoint {
            url: url.clone(),
            reason,
        })?;
        Ok(IdentityEndpoint { url, descriptor })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    meta: Meta,
    #[serde(default)]
    skin_domains: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    server_name: Option<String>,
    implementation_name: Option<String>,
    implementation_version: Option<String>,
    #[serde(default)]
    links: Links,
    #[serde(default, rename = "feature.non_email_login")]
    non_email_login: bool,
}

#[derive(Deserialize, Default)]
struct Links {
    homepage: Option<String>,
    register: Option<String>,
}

fn parse_metadata(text: &str) -> std::result::Result<EndpointDescriptor, String> {
    let metadata: Metadata = serde_json::from_str(text)
        .json(text.to_owned())
        .map_err(|err| err.to_string())?;
    let name = metadata
        .meta
        .server_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| "metadata has no serverName".to_owned())?;

    Ok(EndpointDescriptor {
        name,
        implementation_name: metadata.meta.implementation_name,
        implementation_version: metadata.meta.implementation_version,
        homepage: metadata.meta.links.homepage,
        register: metadata.meta.links.register,
        skin_domains: metadata.skin_domains,
        non_email_login: metadata.meta.non_email_login,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_normalized() {
        assert_eq!(
            normalize_url(" https://littleskin.cn/api/yggdrasil/ ").unwrap(),
            "https://littleskin.cn/api/yggdrasil"
        );
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("littleskin.cn").is_err());
    }

    #[test]
    fn metadata_parsing() {
        let text = r#"{
            "meta": {
                "serverName": "LittleSkin",
                "implementationName": "Yggdrasil API for Blessing Skin",
                "implementationVersion": "5.2.0",
                "links": { "homepage": "https://littleskin.cn/" },
                "feature.non_email_login": true
            },
            "skinDomains": ["littleskin.cn"],
            "signaturePublickey": "..."
        }"#;
        let descriptor = parse_metadata(text).unwrap();
        assert_eq!(descriptor.name, "LittleSkin");
        assert!(descriptor.non_email_login);
        assert_eq!(descriptor.skin_domains, vec!["littleskin.cn".to_owned()]);
        assert_eq!(descriptor.register, None);
    }

    #[test]
    fn metadata_needs_a_name() {
        assert!(parse_metadata(r#"{ "meta": {} }"#).is_err());
        assert!(parse_metadata("<html></html>").is_err());
    }
}
