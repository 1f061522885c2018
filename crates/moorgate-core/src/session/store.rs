//! In-memory session store for per-user OAuth tokens and pending flows
//!
//! All state is volatile and scoped to the process lifetime. Pending OAuth
//! flows are indexed two ways: by (session, state) for same-session lookups
//! and by a global state -> session index, because the authorization
//! redirect lands on a separate listener with no session cookie attached.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Tokens closer than this to expiry are treated as absent
pub const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Pending OAuth flows expire this long after creation
pub const FLOW_TTL: Duration = Duration::from_secs(10 * 60);

/// Stored OAuth credentials for one (session, provider) pair
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// None = the token never expires
    pub expires_at: Option<Instant>,
    pub token_type: String,
    pub stored_at: Instant,
}

impl TokenRecord {
    /// Create a record stored now
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<Duration>,
    ) -> Self {
        let now = Instant::now();
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in.map(|d| now + d),
            token_type: "Bearer".to_string(),
            stored_at: now,
        }
    }

    /// Set the token type reported by the authorization server
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Valid iff `now < expires_at - buffer`; never-expiring tokens are
    /// always valid
    pub fn is_valid_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => now + TOKEN_EXPIRY_BUFFER < expires_at,
            None => true,
        }
    }

    /// Seconds until expiry, if the token expires
    pub fn expires_in_secs(&self) -> Option<u64> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()).as_secs())
    }
}

/// Everything needed to finish a pending authorization-code flow
#[derive(Debug, Clone)]
pub struct OAuthFlowContext {
    pub provider_id: String,
    pub region: Option<String>,
    /// MCP endpoint the flow was initiated against
    pub endpoint: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub code_verifier: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub created_at: Instant,
}

impl OAuthFlowContext {
    /// Whether this flow is past its 10-minute window
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > FLOW_TTL
    }
}

#[derive(Debug, Default)]
struct SessionEntry {
    tokens: HashMap<String, TokenRecord>,
    flows: HashMap<String, OAuthFlowContext>,
}

/// Concurrent store of per-session tokens and pending flows
///
/// Structure-wide locking: every operation is a short critical section and
/// guards are never held across `.await`.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    /// Global state-token -> session-id index for cookie-less callbacks
    state_index: RwLock<HashMap<String, String>>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the token for a (session, provider) pair
    pub fn set_token(&self, session_id: &str, provider_id: &str, token: TokenRecord) {
        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .tokens
            .insert(provider_id.to_string(), token);
    }

    /// Get the token for a (session, provider) pair
    ///
    /// Returns None when missing or within the pre-expiry buffer. Performs
    /// no side effect; invalid records are left in place.
    pub fn token(&self, session_id: &str, provider_id: &str) -> Option<TokenRecord> {
        let sessions = self.sessions.read();
        let record = sessions.get(session_id)?.tokens.get(provider_id)?;
        if record.is_valid_at(Instant::now()) {
            Some(record.clone())
        } else {
            None
        }
    }

    /// Remove the token for a (session, provider) pair
    pub fn remove_token(&self, session_id: &str, provider_id: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.tokens.remove(provider_id);
        }
    }

    /// Provider ids this session holds currently valid tokens for
    pub fn valid_providers(&self, session_id: &str) -> Vec<String> {
        let now = Instant::now();
        let sessions = self.sessions.read();
        let Some(entry) = sessions.get(session_id) else {
            return Vec::new();
        };
        let mut providers: Vec<String> = entry
            .tokens
            .iter()
            .filter(|(_, record)| record.is_valid_at(now))
            .map(|(id, _)| id.clone())
            .collect();
        providers.sort();
        providers
    }

    /// Store a pending flow under both the session-scoped and global indices
    pub fn put_flow(&self, session_id: &str, state: &str, context: OAuthFlowContext) {
        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .flows
            .insert(state.to_string(), context);
        drop(sessions);
        self.state_index
            .write()
            .insert(state.to_string(), session_id.to_string());
    }

    /// Resolve a pending flow by (session, state)
    ///
    /// Expired flows are purged from both indices and reported absent.
    pub fn flow(&self, session_id: &str, state: &str) -> Option<OAuthFlowContext> {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let entry = sessions.get_mut(session_id)?;
        let context = entry.flows.get(state)?;
        if context.is_expired_at(now) {
            entry.flows.remove(state);
            drop(sessions);
            self.state_index.write().remove(state);
            return None;
        }
        Some(context.clone())
    }

    /// Resolve a pending flow by state token alone, for callbacks that
    /// arrive without session context
    pub fn flow_by_state(&self, state: &str) -> Option<(String, OAuthFlowContext)> {
        let session_id = self.state_index.read().get(state).cloned()?;
        let context = self.flow(&session_id, state)?;
        Some((session_id, context))
    }

    /// Number of pending flows for a session (including not-yet-purged
    /// expired ones)
    pub fn pending_flow_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(|entry| entry.flows.len())
            .unwrap_or(0)
    }

    /// Delete a pending flow from both indices
    pub fn clear_flow(&self, session_id: &str, state: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.flows.remove(state);
        }
        drop(sessions);
        self.state_index.write().remove(state);
    }

    /// Drop all state belonging to a session
    pub fn clear_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write();
        let Some(entry) = sessions.remove(session_id) else {
            return;
        };
        drop(sessions);
        let mut index = self.state_index.write();
        for state in entry.flows.keys() {
            index.remove(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_created_at(created_at: Instant) -> OAuthFlowContext {
        OAuthFlowContext {
            provider_id: "mixpanel".to_string(),
            region: Some("us".to_string()),
            endpoint: "https://mcp.mixpanel.com/mcp".to_string(),
            authorization_endpoint: "https://auth.example.com/authorize".to_string(),
            token_endpoint: "https://auth.example.com/token".to_string(),
            code_verifier: "verifier".to_string(),
            client_id: "client-1".to_string(),
            redirect_uri: "http://localhost:8001/callback".to_string(),
            created_at,
        }
    }

    #[test]
    fn test_token_validity_buffer() {
        let store = SessionStore::new();

        // Expiring in 4 minutes: inside the 5-minute buffer, reported absent
        let near = TokenRecord::new("tok-a", None, Some(Duration::from_secs(4 * 60)));
        store.set_token("s1", "mixpanel", near);
        assert!(store.token("s1", "mixpanel").is_none());

        // Expiring in 6 minutes: outside the buffer, present
        let ok = TokenRecord::new("tok-b", None, Some(Duration::from_secs(6 * 60)));
        store.set_token("s1", "mixpanel", ok);
        assert_eq!(store.token("s1", "mixpanel").unwrap().access_token, "tok-b");
    }

    #[test]
    fn test_invalid_token_is_not_deleted() {
        let store = SessionStore::new();
        store.set_token(
            "s1",
            "jira",
            TokenRecord::new("tok", None, Some(Duration::from_secs(60))),
        );
        assert!(store.token("s1", "jira").is_none());
        // The record is still there, just filtered on read
        assert!(store.sessions.read().get("s1").unwrap().tokens.contains_key("jira"));
    }

    #[test]
    fn test_never_expiring_token() {
        let store = SessionStore::new();
        store.set_token("s1", "jira", TokenRecord::new("tok", None, None));
        assert!(store.token("s1", "jira").is_some());
    }

    #[test]
    fn test_valid_providers_filters_and_sorts() {
        let store = SessionStore::new();
        store.set_token("s1", "mixpanel", TokenRecord::new("a", None, None));
        store.set_token(
            "s1",
            "jira",
            TokenRecord::new("b", None, Some(Duration::from_secs(3600))),
        );
        store.set_token(
            "s1",
            "linear",
            TokenRecord::new("c", None, Some(Duration::from_secs(60))),
        );
        assert_eq!(store.valid_providers("s1"), vec!["jira", "mixpanel"]);
        assert!(store.valid_providers("s2").is_empty());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        store.set_token("s1", "mixpanel", TokenRecord::new("a", None, None));
        assert!(store.token("s2", "mixpanel").is_none());

        store.clear_session("s1");
        assert!(store.token("s1", "mixpanel").is_none());
    }

    #[test]
    fn test_flow_ttl_boundaries() {
        let store = SessionStore::new();

        let fresh = flow_created_at(Instant::now() - Duration::from_secs(9 * 60 + 59));
        store.put_flow("s1", "state-fresh", fresh);
        assert!(store.flow("s1", "state-fresh").is_some());

        let stale = flow_created_at(Instant::now() - Duration::from_secs(10 * 60 + 1));
        store.put_flow("s1", "state-stale", stale);
        assert!(store.flow("s1", "state-stale").is_none());
        // Lazy purge removed it from the global index too
        assert!(store.flow_by_state("state-stale").is_none());
    }

    #[test]
    fn test_flow_by_state_resolves_owning_session() {
        let store = SessionStore::new();
        store.put_flow("s1", "state-1", flow_created_at(Instant::now()));

        let (session_id, context) = store.flow_by_state("state-1").unwrap();
        assert_eq!(session_id, "s1");
        assert_eq!(context.provider_id, "mixpanel");
        assert!(store.flow_by_state("state-unknown").is_none());
    }

    #[test]
    fn test_clear_flow_removes_both_indices() {
        let store = SessionStore::new();
        store.put_flow("s1", "state-1", flow_created_at(Instant::now()));

        store.clear_flow("s1", "state-1");
        assert!(store.flow("s1", "state-1").is_none());
        assert!(store.flow_by_state("state-1").is_none());
    }

    #[test]
    fn test_clear_session_drops_state_index_entries() {
        let store = SessionStore::new();
        store.put_flow("s1", "state-1", flow_created_at(Instant::now()));
        store.clear_session("s1");
        assert!(store.flow_by_state("state-1").is_none());
    }
}
