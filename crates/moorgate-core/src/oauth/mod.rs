//! OAuth flow coordination
//!
//! Drives the full connect handshake against an integration provider:
//! discovery (401 challenge or well-known metadata), dynamic client
//! registration, PKCE-protected authorization-URL construction, and
//! code-for-token exchange.

pub mod pkce;

mod discovery;
mod flow;

pub use discovery::{discover, parse_resource_metadata_url, AuthServerMetadata, DiscoveredOAuth};
pub use flow::{AuthorizationRequest, CompletedAuthorization, OAuthBroker, RegisteredClient};
