//! Per-session credential and pending-flow storage

mod store;

pub use store::{
    OAuthFlowContext, SessionStore, TokenRecord, FLOW_TTL, TOKEN_EXPIRY_BUFFER,
};
