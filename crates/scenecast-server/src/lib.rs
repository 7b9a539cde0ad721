//! Scenecast HTTP server
//!
//! Serves the scene to two audiences: tool-calling protocol clients over
//! `/sse` + `/messages`, and viewers over `/events` or `/ws`.

pub mod access;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use access::{AccessError, AccessGate, AccessRequest, AuthRequirement, CorsGrant};
pub use error::ApiError;
pub use hub::{Audience, BroadcastHub, DeliveryReport, HubConfig, ProtocolSink, ViewerId};
pub use protocol::SceneProtocol;
pub use rate_limit::{RateDecision, RateLimiter};
pub use server::{create_router, run_server};
pub use state::AppState;
