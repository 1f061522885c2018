//! Provider registry
//!
//! Immutable, process-wide table of known integration providers: their
//! regional MCP endpoints, OAuth registration hints, and the callback port
//! each provider's authorization server has whitelisted. The registry is an
//! explicit injected object (never ambient state) so tests substitute their
//! own instances.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// Client name sent during dynamic client registration and MCP initialize
pub const CLIENT_NAME: &str = "Moorgate Chat";

/// Client id used when a provider has neither dynamic registration nor a
/// pre-shared id configured in the environment
pub const DEFAULT_CLIENT_ID: &str = "moorgate-chat";

/// Static configuration of one integration provider
///
/// Loaded once at startup, never mutated. The callback port varies per
/// provider because authorization servers whitelist fixed redirect ports.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Stable provider id ("mixpanel", "jira", ...)
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Short description shown to the model and the user
    pub description: String,
    /// Region name -> MCP endpoint URL
    pub endpoints: BTreeMap<String, String>,
    /// Region used when the caller names none (or an unknown one)
    pub default_region: String,
    /// Static registration endpoint hint, used when discovery metadata
    /// omits `registration_endpoint`
    pub registration_endpoint: Option<String>,
    /// Localhost port this provider's authorization server whitelists
    pub callback_port: u16,
}

impl ProviderConfig {
    /// Resolve the MCP endpoint for a region, falling back to the default
    /// region for unknown or absent region names
    pub fn endpoint_for(&self, region: Option<&str>) -> &str {
        region
            .and_then(|r| self.endpoints.get(r))
            .or_else(|| self.endpoints.get(&self.default_region))
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Redirect URI for this provider's OAuth flow
    ///
    /// `OAUTH_CALLBACK_URL_<ID>` overrides the localhost default in
    /// deployments where the provider whitelists a real domain instead.
    pub fn redirect_uri(&self) -> String {
        let var = format!("OAUTH_CALLBACK_URL_{}", self.id.to_uppercase());
        std::env::var(&var)
            .unwrap_or_else(|_| format!("http://localhost:{}/callback", self.callback_port))
    }

    /// Pre-shared client id from `<ID>_CLIENT_ID`, if configured
    pub fn preshared_client_id(&self) -> Option<String> {
        std::env::var(format!("{}_CLIENT_ID", self.id.to_uppercase())).ok()
    }
}

/// Read-only table of known providers, keyed by id
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Create an empty registry (tests build their own providers)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from explicit provider configs
    pub fn with_providers(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// The built-in provider table
    pub fn builtin() -> Self {
        Self::with_providers(vec![
            ProviderConfig {
                id: "mixpanel".to_string(),
                name: "Mixpanel".to_string(),
                description: "Analytics and user behavior tracking".to_string(),
                endpoints: BTreeMap::from([
                    ("us".to_string(), "https://mcp.mixpanel.com/mcp".to_string()),
                    ("eu".to_string(), "https://mcp-eu.mixpanel.com/mcp".to_string()),
                    ("india".to_string(), "https://mcp-in.mixpanel.com/mcp".to_string()),
                ]),
                default_region: "us".to_string(),
                registration_endpoint: Some(
                    "https://mcp.mixpanel.com/oauth/register".to_string(),
                ),
                // Mixpanel whitelists localhost:8001
                callback_port: 8001,
            },
            ProviderConfig {
                id: "jira".to_string(),
                name: "Jira (Atlassian Rovo)".to_string(),
                description: "Jira and Confluence integration via Atlassian Rovo MCP"
                    .to_string(),
                endpoints: BTreeMap::from([(
                    "default".to_string(),
                    "https://mcp.atlassian.com/v1/mcp".to_string(),
                )]),
                default_region: "default".to_string(),
                registration_endpoint: None,
                // Atlassian whitelists localhost:5598
                callback_port: 5598,
            },
        ])
    }

    /// Look up a provider by id
    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// Look up a provider by id, failing with `UnknownProvider`
    pub fn require(&self, id: &str) -> Result<&ProviderConfig> {
        self.get(id)
            .ok_or_else(|| Error::UnknownProvider(id.to_string()))
    }

    /// All providers, in stable id order
    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values()
    }

    /// All provider ids, in stable order
    pub fn ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Every region name any provider accepts
    pub fn regions(&self) -> Vec<String> {
        self.providers
            .values()
            .flat_map(|p| p.endpoints.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct callback ports the listeners must bind at startup
    pub fn callback_ports(&self) -> BTreeSet<u16> {
        self.providers.values().map(|p| p.callback_port).collect()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry has no providers
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_providers() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.ids(), vec!["jira", "mixpanel"]);
        assert!(registry.get("mixpanel").is_some());
        assert!(registry.get("notion").is_none());
    }

    #[test]
    fn test_require_unknown_provider() {
        let registry = ProviderRegistry::builtin();
        let err = registry.require("notion").unwrap_err();
        assert_eq!(err.kind(), "unknown_provider");
    }

    #[test]
    fn test_region_resolution() {
        let registry = ProviderRegistry::builtin();
        let mixpanel = registry.get("mixpanel").unwrap();

        assert_eq!(mixpanel.endpoint_for(Some("eu")), "https://mcp-eu.mixpanel.com/mcp");
        // Unknown and absent regions fall back to the default region
        assert_eq!(mixpanel.endpoint_for(Some("mars")), "https://mcp.mixpanel.com/mcp");
        assert_eq!(mixpanel.endpoint_for(None), "https://mcp.mixpanel.com/mcp");
    }

    #[test]
    fn test_callback_ports_are_deduplicated() {
        let registry = ProviderRegistry::builtin();
        let ports = registry.callback_ports();
        assert!(ports.contains(&8001));
        assert!(ports.contains(&5598));
        assert_eq!(ports.len(), 2);
    }

    #[test]
    fn test_default_redirect_uri_uses_callback_port() {
        let registry = ProviderRegistry::builtin();
        let jira = registry.get("jira").unwrap();
        // No env override set for this id in tests
        assert_eq!(jira.redirect_uri(), "http://localhost:5598/callback");
    }

    #[test]
    fn test_all_regions() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.regions(), vec!["default", "eu", "india", "us"]);
    }
}
