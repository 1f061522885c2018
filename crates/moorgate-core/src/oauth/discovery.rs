//! OAuth endpoint discovery
//!
//! MCP providers advertise their authorization server by answering an
//! unauthenticated `initialize` call with a 401 whose `WWW-Authenticate`
//! header names a protected-resource metadata URL. Providers that skip the
//! challenge are probed at the standard well-known path on the endpoint's
//! origin instead.

use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::registry::CLIENT_NAME;

/// RFC 8414 authorization-server metadata (the fields this flow consumes)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// RFC 9728 protected-resource metadata
#[derive(Debug, Clone, Deserialize)]
struct ResourceMetadata {
    #[serde(default)]
    authorization_servers: Vec<String>,
    #[serde(default)]
    scopes_supported: Vec<String>,
}

/// Resolved OAuth endpoints for one provider connect attempt
#[derive(Debug, Clone)]
pub struct DiscoveredOAuth {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: Option<String>,
    pub scopes: Vec<String>,
}

/// Extract the `resource_metadata="..."` URL from a `WWW-Authenticate` header
pub fn parse_resource_metadata_url(www_authenticate: &str) -> Option<String> {
    let marker = "resource_metadata=\"";
    let start = www_authenticate.find(marker)? + marker.len();
    let rest = &www_authenticate[start..];
    let end = rest.find('"')?;
    let url = &rest[..end];
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

/// The well-known authorization-server metadata URL for a base URL
fn well_known_url(base: &str) -> String {
    format!(
        "{}/.well-known/oauth-authorization-server",
        base.trim_end_matches('/')
    )
}

/// Probe a provider endpoint and resolve its OAuth endpoints and scopes
///
/// Fails with [`Error::Discovery`] when no usable metadata can be found;
/// discovery failures are never retried automatically.
pub async fn discover(
    http: &reqwest::Client,
    provider_id: &str,
    endpoint: &str,
    logger: &dyn Logger,
) -> Result<DiscoveredOAuth> {
    let discovery_err = |reason: &str| Error::Discovery {
        provider: provider_id.to_string(),
        reason: reason.to_string(),
    };

    logger.info(&format!(
        "[oauth] Discovering OAuth endpoints for {} at {}",
        provider_id, endpoint
    ));

    let response = http
        .post(endpoint)
        .json(&json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") },
            },
            "id": 1,
        }))
        .send()
        .await?;

    let mut metadata: Option<AuthServerMetadata> = None;
    let mut resource_scopes: Vec<String> = Vec::new();

    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        let challenge = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(metadata_url) = challenge.as_deref().and_then(parse_resource_metadata_url) {
            logger.debug(&format!("[oauth] Resource metadata URL: {}", metadata_url));
            match fetch_challenge_metadata(http, &metadata_url).await {
                Ok((found, scopes)) => {
                    metadata = found;
                    resource_scopes = scopes;
                }
                Err(e) => logger.warn(&format!(
                    "[oauth] Challenge-driven discovery for {} failed: {}",
                    provider_id, e
                )),
            }
        }
    }

    // Fallback: standard discovery at the endpoint's origin
    if metadata.is_none() {
        let origin = Url::parse(endpoint)
            .map_err(|e| discovery_err(&format!("invalid endpoint URL: {}", e)))?
            .origin()
            .ascii_serialization();
        let url = well_known_url(&origin);
        logger.debug(&format!("[oauth] Trying standard discovery at {}", url));

        if let Ok(response) = http.get(&url).send().await {
            if response.status().is_success() {
                metadata = response.json::<AuthServerMetadata>().await.ok();
            }
        }
    }

    let metadata = metadata.ok_or_else(|| discovery_err("no OAuth metadata found"))?;
    let authorization_endpoint = metadata
        .authorization_endpoint
        .ok_or_else(|| discovery_err("metadata has no authorization_endpoint"))?;
    let token_endpoint = metadata
        .token_endpoint
        .ok_or_else(|| discovery_err("metadata has no token_endpoint"))?;

    let scopes = if resource_scopes.is_empty() {
        metadata.scopes_supported
    } else {
        resource_scopes
    };

    Ok(DiscoveredOAuth {
        authorization_endpoint,
        token_endpoint,
        registration_endpoint: metadata.registration_endpoint,
        scopes,
    })
}

/// Follow a challenge's resource-metadata URL to the authorization server's
/// metadata document
async fn fetch_challenge_metadata(
    http: &reqwest::Client,
    metadata_url: &str,
) -> Result<(Option<AuthServerMetadata>, Vec<String>)> {
    let resource: ResourceMetadata = http.get(metadata_url).send().await?.json().await?;

    let Some(auth_server) = resource.authorization_servers.first() else {
        return Ok((None, resource.scopes_supported));
    };

    let response = http.get(well_known_url(auth_server)).send().await?;
    if !response.status().is_success() {
        return Ok((None, resource.scopes_supported));
    }
    let metadata = response.json::<AuthServerMetadata>().await?;
    Ok((Some(metadata), resource.scopes_supported))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_metadata_url() {
        let header = r#"Bearer realm="mcp", resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource""#;
        assert_eq!(
            parse_resource_metadata_url(header).as_deref(),
            Some("https://mcp.example.com/.well-known/oauth-protected-resource")
        );
    }

    #[test]
    fn test_parse_resource_metadata_url_absent() {
        assert!(parse_resource_metadata_url(r#"Bearer realm="mcp""#).is_none());
        assert!(parse_resource_metadata_url("").is_none());
        assert!(parse_resource_metadata_url(r#"resource_metadata="""#).is_none());
    }

    #[test]
    fn test_well_known_url_trims_trailing_slash() {
        assert_eq!(
            well_known_url("https://auth.example.com/"),
            "https://auth.example.com/.well-known/oauth-authorization-server"
        );
        assert_eq!(
            well_known_url("https://auth.example.com"),
            "https://auth.example.com/.well-known/oauth-authorization-server"
        );
    }

    #[test]
    fn test_metadata_deserialization_tolerates_missing_fields() {
        let metadata: AuthServerMetadata = serde_json::from_str(
            r#"{"authorization_endpoint": "https://a.example.com/authorize"}"#,
        )
        .unwrap();
        assert!(metadata.token_endpoint.is_none());
        assert!(metadata.scopes_supported.is_empty());
    }
}
