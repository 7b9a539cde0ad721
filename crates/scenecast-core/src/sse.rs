//! Server-sent events framing.

use crate::event::BroadcastEvent;

/// One frame on a `text/event-stream` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// `event: <name>` followed by one `data:` line per payload line.
    Event { event: String, data: String },
    /// `: <text>` comment, ignored by clients. Used for keep-alive.
    Comment(String),
    /// `retry: <ms>` reconnection hint.
    Retry(u64),
}

impl SseFrame {
    pub fn event(event: impl Into<String>, data: impl Into<String>) -> Self {
        SseFrame::Event {
            event: event.into(),
            data: data.into(),
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        SseFrame::Comment(text.into())
    }

    pub fn ping() -> Self {
        SseFrame::comment("ping")
    }

    /// Frame a broadcast event as `event: <type>` with its JSON payload.
    pub fn from_broadcast(event: &BroadcastEvent) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_string(event.data())?;
        Ok(SseFrame::event(event.event_type(), data))
    }

    /// Wire encoding, including the terminating blank line.
    pub fn encode(&self) -> String {
        match self {
            SseFrame::Event { event, data } => {
                let mut out = format!("event: {}\n", event);
                for line in data.split('\n') {
                    out.push_str("data: ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
                out
            }
            SseFrame::Comment(text) => format!(": {}\n\n", text),
            SseFrame::Retry(ms) => format!("retry: {}\n\n", ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_frames() {
        assert_eq!(SseFrame::ping().encode(), ": ping\n\n");
        assert_eq!(SseFrame::Retry(3000).encode(), "retry: 3000\n\n");
        assert_eq!(
            SseFrame::event("endpoint", "/messages?sessionId=abc").encode(),
            "event: endpoint\ndata: /messages?sessionId=abc\n\n"
        );
    }

    #[test]
    fn test_multiline_data_gets_one_prefix_per_line() {
        assert_eq!(
            SseFrame::event("note", "a\nb").encode(),
            "event: note\ndata: a\ndata: b\n\n"
        );
    }

    #[test]
    fn test_from_broadcast() {
        let event = BroadcastEvent::new("assetLoaded", json!({"path": "x.glb"}));
        let frame = SseFrame::from_broadcast(&event).unwrap();
        assert_eq!(
            frame.encode(),
            "event: assetLoaded\ndata: {\"path\":\"x.glb\"}\n\n"
        );
    }
}
