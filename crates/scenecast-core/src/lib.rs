//! Scenecast core types.
//!
//! The scene state service mutates a small keyed record and reports each
//! change through an [`EventEmitter`]; the event model maps every logical
//! change onto one or more wire names; the event log keeps a bounded
//! diagnostic history.

pub mod event;
pub mod event_log;
pub mod scene;
pub mod sse;

pub use event::{BroadcastEvent, EventEmitter, EventKind};
pub use event_log::{EventLog, LogEntry, DEFAULT_EVENT_LOG_CAPACITY};
pub use scene::{SceneError, SceneSnapshot, SceneState};
pub use sse::SseFrame;
