//! OAuth callback listeners
//!
//! Providers redirect the user's browser to `http://localhost:<port>/callback`
//! after authorization. One small axum server runs per distinct callback port
//! in the registry and finishes the pending flow by state lookup, since the
//! redirect arrives outside any session context.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::logging::Logger;
use crate::oauth::OAuthBroker;
use crate::registry::ProviderRegistry;

fn frontend_url() -> String {
    std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    broker: Arc<OAuthBroker>,
    logger: Arc<dyn Logger>,
}

/// One bound callback listener
pub struct CallbackListener {
    pub addr: SocketAddr,
    pub handle: JoinHandle<()>,
}

/// Build the callback router around a broker
pub fn router(broker: Arc<OAuthBroker>, logger: Arc<dyn Logger>) -> Router {
    let state = CallbackState { broker, logger };
    Router::new()
        .route("/callback", get(handle_callback))
        .with_state(state)
}

/// Bind a callback listener on one port
///
/// Port 0 binds an ephemeral port, used by tests.
pub async fn bind(
    port: u16,
    broker: Arc<OAuthBroker>,
    logger: Arc<dyn Logger>,
) -> Result<CallbackListener> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let addr = listener.local_addr()?;

    logger.info(&format!("[Callback] Listening on {}", addr));

    let app = router(broker, Arc::clone(&logger));
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            logger.error(&format!("[Callback] Server error: {}", e));
        }
    });

    Ok(CallbackListener { addr, handle })
}

/// Start one listener per distinct callback port in the registry
pub async fn serve(
    registry: &ProviderRegistry,
    broker: Arc<OAuthBroker>,
    logger: Arc<dyn Logger>,
) -> Result<Vec<CallbackListener>> {
    let mut listeners = Vec::new();
    for port in registry.callback_ports() {
        listeners.push(bind(port, Arc::clone(&broker), Arc::clone(&logger)).await?);
    }
    Ok(listeners)
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<String>) {
    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or(error);
        return (StatusCode::BAD_REQUEST, failure_page("Connection Failed", &detail));
    }

    let (code, callback_state) = match (query.code, query.state) {
        (Some(code), Some(s)) => (code, s),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                failure_page("Connection Failed", "Missing authorization code or state"),
            );
        }
    };

    match state.broker.complete(&code, &callback_state, None).await {
        Ok(completed) => (StatusCode::OK, success_page(&completed.provider_id)),
        Err(e) => {
            state
                .logger
                .error(&format!("[Callback] OAuth callback error: {}", e));
            let status = if e.is_user_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, failure_page("Connection Error", &e.to_string()))
        }
    }
}

fn success_page(provider_id: &str) -> Html<String> {
    let frontend = frontend_url();
    Html(format!(
        r#"<html>
  <head>
    <title>Connected Successfully</title>
    <script>
      if (window.opener) {{
        window.opener.postMessage({{ type: 'oauth_complete', server: '{provider_id}' }}, '*');
        window.close();
      }} else {{
        setTimeout(() => window.location.href = '{frontend}', 2000);
      }}
    </script>
  </head>
  <body style="font-family: system-ui; padding: 40px; text-align: center;">
    <h1>Connected Successfully!</h1>
    <p>You have connected to {provider_id}.</p>
    <p>You can close this window and return to the chat.</p>
  </body>
</html>"#
    ))
}

fn failure_page(title: &str, detail: &str) -> Html<String> {
    let frontend = frontend_url();
    Html(format!(
        r#"<html>
  <head><title>{title}</title></head>
  <body style="font-family: system-ui; padding: 40px; text-align: center;">
    <h1>{title}</h1>
    <p>{detail}</p>
    <p><a href="{frontend}">Return to app</a></p>
  </body>
</html>"#
    ))
}
