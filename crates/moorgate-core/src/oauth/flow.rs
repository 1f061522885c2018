//! OAuth flow coordinator
//!
//! `OAuthBroker` owns the connect handshake end to end: discovery, dynamic
//! client registration (cached process-wide), authorization-URL
//! construction, and code-for-token exchange. Flow contexts live in the
//! `SessionStore` under both the session-scoped and global-state indices so
//! the callback listener can finish a flow without session cookies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::oauth::discovery::discover;
use crate::oauth::pkce;
use crate::registry::{ProviderRegistry, CLIENT_NAME, DEFAULT_CLIENT_ID};
use crate::session::{OAuthFlowContext, SessionStore, TokenRecord};

/// Dynamic-registration result, cached per (registration endpoint,
/// redirect URI) because registration is expensive and redirect URIs vary
/// per provider
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Authorization URL handed back to the user, with the state token that
/// correlates the eventual callback
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub provider_id: String,
    pub auth_url: String,
    pub state: String,
}

/// Outcome of a finished code exchange
#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    pub session_id: String,
    pub provider_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Drives the PKCE-protected authorization-code flow against provider
/// authorization servers
pub struct OAuthBroker {
    registry: Arc<ProviderRegistry>,
    sessions: Arc<SessionStore>,
    http: reqwest::Client,
    registered_clients: RwLock<HashMap<(String, String), RegisteredClient>>,
    logger: Arc<dyn Logger>,
}

impl OAuthBroker {
    /// Create a broker over an injected registry and session store
    pub fn new(
        registry: Arc<ProviderRegistry>,
        sessions: Arc<SessionStore>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            registry,
            sessions,
            http: reqwest::Client::new(),
            registered_clients: RwLock::new(HashMap::new()),
            logger,
        }
    }

    /// Start a connect flow: discovery, client resolution, flow storage,
    /// authorization-URL construction
    ///
    /// Nothing is stored when the provider id is unknown or discovery
    /// fails; a fresh user-initiated attempt is the only retry path.
    pub async fn initiate(
        &self,
        session_id: &str,
        provider_id: &str,
        region: Option<&str>,
    ) -> Result<AuthorizationRequest> {
        let config = self.registry.require(provider_id)?;
        let endpoint = config.endpoint_for(region).to_string();
        let redirect_uri = config.redirect_uri();

        let discovered = discover(&self.http, provider_id, &endpoint, self.logger.as_ref()).await?;

        // Metadata wins; the registry's static registration endpoint is a hint
        let registration_endpoint = discovered
            .registration_endpoint
            .clone()
            .or_else(|| config.registration_endpoint.clone());

        let client_id = match registration_endpoint {
            Some(registration) => {
                self.register_client(provider_id, &registration, &redirect_uri)
                    .await?
                    .client_id
            }
            None => config
                .preshared_client_id()
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
        };

        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let state = pkce::generate_state();

        let context = OAuthFlowContext {
            provider_id: provider_id.to_string(),
            region: region.map(str::to_string),
            endpoint,
            authorization_endpoint: discovered.authorization_endpoint.clone(),
            token_endpoint: discovered.token_endpoint.clone(),
            code_verifier,
            client_id: client_id.clone(),
            redirect_uri: redirect_uri.clone(),
            created_at: std::time::Instant::now(),
        };
        self.sessions.put_flow(session_id, &state, context);

        let mut auth_url =
            Url::parse(&discovered.authorization_endpoint).map_err(|e| Error::Discovery {
                provider: provider_id.to_string(),
                reason: format!("invalid authorization_endpoint: {}", e),
            })?;
        {
            let mut pairs = auth_url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &client_id)
                .append_pair("redirect_uri", &redirect_uri)
                .append_pair("state", &state)
                .append_pair("code_challenge", &code_challenge)
                .append_pair("code_challenge_method", "S256");
            if !discovered.scopes.is_empty() {
                pairs.append_pair("scope", &discovered.scopes.join(" "));
            }
        }

        self.logger.info(&format!(
            "[oauth] Authorization URL ready for {} (session {})",
            provider_id, session_id
        ));

        Ok(AuthorizationRequest {
            provider_id: provider_id.to_string(),
            auth_url: auth_url.into(),
            state,
        })
    }

    /// Finish a flow with the authorization code from the callback
    ///
    /// Resolves the flow context by (session, state) when the caller still
    /// has session context, or by the global state index when the redirect
    /// arrived on a bare callback listener. The context is single-use:
    /// success deletes it from both indices.
    pub async fn complete(
        &self,
        code: &str,
        state: &str,
        session_id: Option<&str>,
    ) -> Result<CompletedAuthorization> {
        let (owner, context) = match session_id {
            Some(sid) => {
                let context = self
                    .sessions
                    .flow(sid, state)
                    .ok_or(Error::InvalidOrExpiredState)?;
                (sid.to_string(), context)
            }
            None => self
                .sessions
                .flow_by_state(state)
                .ok_or(Error::InvalidOrExpiredState)?,
        };

        self.logger.info(&format!(
            "[oauth] Exchanging code for {} (session {})",
            context.provider_id, owner
        ));

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", context.redirect_uri.as_str()),
            ("client_id", context.client_id.as_str()),
            ("code_verifier", context.code_verifier.as_str()),
        ];
        let response = self
            .http
            .post(&context.token_endpoint)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            self.logger
                .error(&format!("[oauth] Token exchange failed ({}): {}", status, detail));
            return Err(Error::TokenExchange { status, detail });
        }

        let token: TokenEndpointResponse = response.json().await?;
        let record = TokenRecord::new(
            token.access_token,
            token.refresh_token,
            token.expires_in.map(Duration::from_secs),
        )
        .with_token_type(token.token_type.unwrap_or_else(|| "Bearer".to_string()));

        self.sessions.set_token(&owner, &context.provider_id, record);
        self.sessions.clear_flow(&owner, state);

        Ok(CompletedAuthorization {
            session_id: owner,
            provider_id: context.provider_id,
        })
    }

    /// Register (or reuse) a dynamic OAuth client bound to a redirect URI
    async fn register_client(
        &self,
        provider_id: &str,
        registration_endpoint: &str,
        redirect_uri: &str,
    ) -> Result<RegisteredClient> {
        let key = (registration_endpoint.to_string(), redirect_uri.to_string());
        if let Some(client) = self.registered_clients.read().get(&key) {
            return Ok(client.clone());
        }

        self.logger.info(&format!(
            "[oauth] Registering dynamic client at {} for {}",
            registration_endpoint, redirect_uri
        ));

        let response = self
            .http
            .post(registration_endpoint)
            .json(&json!({
                "client_name": CLIENT_NAME,
                "redirect_uris": [redirect_uri],
                "grant_types": ["authorization_code", "refresh_token"],
                "response_types": ["code"],
                "token_endpoint_auth_method": "none",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Discovery {
                provider: provider_id.to_string(),
                reason: format!("dynamic client registration failed ({}): {}", status, detail),
            });
        }

        let client: RegisteredClient = response.json().await?;
        self.registered_clients.write().insert(key, client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoOpLogger;
    use crate::registry::ProviderConfig;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    /// In-process stand-in for a provider endpoint plus its authorization
    /// server: 401 on the MCP endpoint, well-known metadata, registration,
    /// and token endpoints.
    async fn spawn_auth_server() -> (String, Arc<AtomicUsize>) {
        let registrations = Arc::new(AtomicUsize::new(0));
        let counter = registrations.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let meta_base = base.clone();

        let app = Router::new()
            .route(
                "/mcp",
                post(|| async { (StatusCode::UNAUTHORIZED, "authorization required") }),
            )
            .route(
                "/.well-known/oauth-authorization-server",
                get(move || {
                    let base = meta_base.clone();
                    async move {
                        Json(json!({
                            "authorization_endpoint": format!("{base}/authorize"),
                            "token_endpoint": format!("{base}/token"),
                            "registration_endpoint": format!("{base}/register"),
                            "scopes_supported": ["read", "write"],
                        }))
                    }
                }),
            )
            .route(
                "/register",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({
                            "client_id": "dyn-client-1",
                            "redirect_uris": ["http://localhost:8001/callback"],
                        }))
                    }
                }),
            )
            .route(
                "/token",
                post(|| async {
                    Json(json!({
                        "access_token": "tok-123",
                        "token_type": "Bearer",
                        "expires_in": 3600,
                        "refresh_token": "ref-123",
                    }))
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, registrations)
    }

    /// Authorization server whose token endpoint always rejects the code
    async fn spawn_rejecting_token_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().route(
            "/token",
            post(|| async { (StatusCode::BAD_REQUEST, "invalid_grant") }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn test_registry(base: &str) -> ProviderRegistry {
        ProviderRegistry::with_providers(vec![ProviderConfig {
            id: "acme".to_string(),
            name: "Acme".to_string(),
            description: "Test provider".to_string(),
            endpoints: BTreeMap::from([("us".to_string(), format!("{base}/mcp"))]),
            default_region: "us".to_string(),
            registration_endpoint: None,
            callback_port: 8001,
        }])
    }

    fn broker_with(registry: ProviderRegistry) -> (OAuthBroker, Arc<SessionStore>) {
        let sessions = Arc::new(SessionStore::new());
        let broker = OAuthBroker::new(
            Arc::new(registry),
            sessions.clone(),
            Arc::new(NoOpLogger::new()),
        );
        (broker, sessions)
    }

    fn stored_flow(base: &str) -> OAuthFlowContext {
        OAuthFlowContext {
            provider_id: "acme".to_string(),
            region: None,
            endpoint: format!("{base}/mcp"),
            authorization_endpoint: format!("{base}/authorize"),
            token_endpoint: format!("{base}/token"),
            code_verifier: "verifier-1".to_string(),
            client_id: "client-1".to_string(),
            redirect_uri: "http://localhost:8001/callback".to_string(),
            created_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_initiate_unknown_provider_stores_nothing() {
        let (broker, sessions) = broker_with(ProviderRegistry::builtin());

        let err = broker.initiate("s1", "notion", None).await.unwrap_err();
        assert_eq!(err.kind(), "unknown_provider");
        assert_eq!(sessions.pending_flow_count("s1"), 0);
    }

    #[tokio::test]
    async fn test_initiate_builds_authorization_url() {
        let (base, _registrations) = spawn_auth_server().await;
        let (broker, sessions) = broker_with(test_registry(&base));

        let request = broker.initiate("s1", "acme", Some("us")).await.unwrap();

        assert!(request.auth_url.starts_with(&format!("{base}/authorize?")));
        assert!(request.auth_url.contains("response_type=code"));
        assert!(request.auth_url.contains("client_id=dyn-client-1"));
        assert!(request.auth_url.contains(&format!("state={}", request.state)));
        assert!(request.auth_url.contains("code_challenge="));
        assert!(request.auth_url.contains("code_challenge_method=S256"));
        assert!(request.auth_url.contains("scope=read+write"));

        // Flow is resolvable through the global index, owned by s1
        let (owner, context) = sessions.flow_by_state(&request.state).unwrap();
        assert_eq!(owner, "s1");
        assert_eq!(context.provider_id, "acme");
        assert_eq!(context.token_endpoint, format!("{base}/token"));
    }

    #[tokio::test]
    async fn test_dynamic_registration_is_cached() {
        let (base, registrations) = spawn_auth_server().await;
        let (broker, _sessions) = broker_with(test_registry(&base));

        broker.initiate("s1", "acme", None).await.unwrap();
        broker.initiate("s2", "acme", None).await.unwrap();

        assert_eq!(registrations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_complete_is_single_use() {
        let (base, _registrations) = spawn_auth_server().await;
        let (broker, sessions) = broker_with(test_registry(&base));
        sessions.put_flow("s1", "state-1", stored_flow(&base));

        let done = broker.complete("code-1", "state-1", None).await.unwrap();
        assert_eq!(done.session_id, "s1");
        assert_eq!(done.provider_id, "acme");

        let token = sessions.token("s1", "acme").unwrap();
        assert_eq!(token.access_token, "tok-123");
        assert_eq!(token.refresh_token.as_deref(), Some("ref-123"));

        // The context was deleted from both indices by the first call
        let err = broker.complete("code-1", "state-1", None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_or_expired_state");
    }

    #[tokio::test]
    async fn test_complete_with_session_scoped_lookup() {
        let (base, _registrations) = spawn_auth_server().await;
        let (broker, sessions) = broker_with(test_registry(&base));
        sessions.put_flow("s1", "state-1", stored_flow(&base));

        // The wrong session cannot finish another session's flow
        let err = broker
            .complete("code-1", "state-1", Some("s2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_or_expired_state");

        let done = broker
            .complete("code-1", "state-1", Some("s1"))
            .await
            .unwrap();
        assert_eq!(done.provider_id, "acme");
    }

    #[tokio::test]
    async fn test_complete_unknown_state() {
        let (broker, _sessions) = broker_with(ProviderRegistry::builtin());
        let err = broker.complete("code", "no-such-state", None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_or_expired_state");
    }

    #[tokio::test]
    async fn test_token_exchange_error_carries_upstream_detail() {
        let base = spawn_rejecting_token_server().await;
        let (broker, sessions) = broker_with(test_registry(&base));
        sessions.put_flow("s1", "state-1", stored_flow(&base));

        let err = broker.complete("bad-code", "state-1", None).await.unwrap_err();
        match err {
            Error::TokenExchange { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "invalid_grant");
            }
            other => panic!("expected TokenExchange, got {other:?}"),
        }
    }
}
