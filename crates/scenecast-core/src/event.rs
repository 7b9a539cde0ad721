//! Broadcast event model.
//!
//! Every state mutation is described by an [`EventKind`]. Older viewers
//! still listen for legacy event names, so a kind may map to several wire
//! names; the mapping is a static table rather than string building so the
//! full alias set can be enumerated in tests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical event kinds produced by the scene state service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new asset became the current scene asset.
    AssetLoaded,
    /// An animation clip was selected on the current asset.
    AnimationLoaded,
    /// Playback started.
    AnimationPlayed,
    /// Playback stopped.
    AnimationStopped,
    /// Synthetic snapshot sent to a viewer stream on connect.
    Init,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::AssetLoaded,
        EventKind::AnimationLoaded,
        EventKind::AnimationPlayed,
        EventKind::AnimationStopped,
        EventKind::Init,
    ];

    /// Wire names for this kind, current name first.
    pub fn type_names(self) -> &'static [&'static str] {
        match self {
            EventKind::AssetLoaded => &["assetLoaded", "modelLoaded"],
            EventKind::AnimationLoaded => &["animationLoaded"],
            EventKind::AnimationPlayed => &["animationPlayed", "animationStarted"],
            EventKind::AnimationStopped => &["animationStopped"],
            EventKind::Init => &["init"],
        }
    }

    /// Current wire name.
    pub fn primary_name(self) -> &'static str {
        self.type_names()[0]
    }

    /// Resolve any wire name, legacy or current, back to its kind.
    pub fn from_type_name(name: &str) -> Option<EventKind> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_names().contains(&name))
    }

    /// One event per wire name, all sharing the same payload.
    pub fn expand(self, data: &Value) -> Vec<BroadcastEvent> {
        self.type_names()
            .iter()
            .map(|name| BroadcastEvent::new(*name, data.clone()))
            .collect()
    }
}

/// A single event as delivered to an audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// Sink for state-change notifications.
///
/// Implementations must not block: the scene service calls `emit` inline
/// with every mutation.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, kind: EventKind, data: Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_every_kind_has_unique_names() {
        let mut seen = HashSet::new();
        for kind in EventKind::ALL {
            assert!(!kind.type_names().is_empty());
            for name in kind.type_names() {
                assert!(seen.insert(*name), "duplicate wire name {}", name);
                assert_eq!(EventKind::from_type_name(name), Some(kind));
            }
        }
    }

    #[test]
    fn test_alias_table() {
        assert_eq!(
            EventKind::AssetLoaded.type_names(),
            &["assetLoaded", "modelLoaded"]
        );
        assert_eq!(
            EventKind::AnimationPlayed.type_names(),
            &["animationPlayed", "animationStarted"]
        );
        assert_eq!(EventKind::AnimationStopped.type_names(), &["animationStopped"]);
        assert_eq!(EventKind::Init.primary_name(), "init");
        assert_eq!(EventKind::from_type_name("unknown"), None);
    }

    #[test]
    fn test_expand_shares_payload() {
        let data = json!({"path": "models/robot.glb"});
        let events = EventKind::AssetLoaded.expand(&data);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "assetLoaded");
        assert_eq!(events[1].event_type(), "modelLoaded");
        assert!(events.iter().all(|e| e.data() == &data));
    }

    #[test]
    fn test_serialized_shape() {
        let event = BroadcastEvent::new("animationStopped", json!({"name": "walk"}));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "animationStopped", "data": {"name": "walk"}})
        );
    }
}
