//! # Scenecast Session
//!
//! Protocol session layer: session lifecycle, heartbeats, outbound frame
//! transport and the distributed session store adapter shared across
//! instances.
//!
//! Without a store, sessions keep working locally; only cross-instance
//! presence checks are lost.

pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod session;
pub mod store;
pub mod transport;

pub use error::{HandlerError, SessionError, SessionResult, StoreError, StoreResult};
pub use heartbeat::{run_heartbeat, HeartbeatResult};
pub use manager::{
    DispatchAck, EstablishedSession, MessageHandler, SessionGuard, SessionManager,
    SessionManagerConfig,
};
pub use session::{Session, SessionInfo, SessionState};
pub use store::{
    MemorySessionStore, RedisSessionStore, SessionMetadata, SessionRecord, SessionStore,
    StoreHandle,
};
pub use transport::{FrameSender, TransportError};
