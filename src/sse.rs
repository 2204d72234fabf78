//! Server-sent-events rendering of rewrite streams.
//!
//! Each event becomes one `data: <json>\n\n` frame:
//!
//! ```text
//! data: {"progress":30}
//!
//! data: {"patch":[{"op":"replace","path":"/1","value":"..."}]}
//!
//! ```
//!
//! A failed stream ends with a single `{"error": "..."}` frame instead of a
//! patch.

use axum::response::sse::Event;
use serde_json::{json, Value};

use refinery_core::Error;

use crate::rewrite::RewriteEvent;

/// JSON payload carried by an event's `data:` line.
pub fn event_payload(event: &RewriteEvent) -> Value {
    match event {
        RewriteEvent::Progress(p) => json!({ "progress": p }),
        RewriteEvent::Patch(ops) => json!({ "patch": ops }),
    }
}

pub fn error_payload(err: &Error) -> Value {
    json!({ "error": err.to_string() })
}

/// Full wire frame for `event`, blank-line terminated.
pub fn to_sse_frame(event: &RewriteEvent) -> String {
    frame(&event_payload(event))
}

pub fn error_frame(err: &Error) -> String {
    frame(&error_payload(err))
}

fn frame(payload: &Value) -> String {
    format!("data: {}\n\n", payload)
}

/// The same payloads as axum [`Event`]s for `Sse` responses.
pub fn to_axum_event(item: &Result<RewriteEvent, Error>) -> Event {
    let payload = match item {
        Ok(event) => event_payload(event),
        Err(err) => error_payload(err),
    };
    Event::default().data(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use refinery_core::patch::PatchOp;

    #[test]
    fn progress_frame() {
        assert_eq!(
            to_sse_frame(&RewriteEvent::Progress(60)),
            "data: {\"progress\":60}\n\n"
        );
    }

    #[test]
    fn patch_frame() {
        let frame = to_sse_frame(&RewriteEvent::Patch(vec![PatchOp::replace(2, "b")]));
        assert_eq!(
            frame,
            "data: {\"patch\":[{\"op\":\"replace\",\"path\":\"/2\",\"value\":\"b\"}]}\n\n"
        );
    }

    #[test]
    fn empty_patch_is_still_a_frame() {
        assert_eq!(
            to_sse_frame(&RewriteEvent::Patch(Vec::new())),
            "data: {\"patch\":[]}\n\n"
        );
    }

    #[test]
    fn error_frame_carries_message() {
        let frame = error_frame(&Error::Provider("boom".to_string()));
        assert!(frame.starts_with("data: {\"error\":"));
        assert!(frame.contains("boom"));
        assert!(frame.ends_with("\n\n"));
    }
}
