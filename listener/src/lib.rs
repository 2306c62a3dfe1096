//! # Pawn Event Listener
//!
//! A minimal tracker subscriber. It registers under a name, prints every spawn
//! and death the tracker sends, and unsubscribes on the way out.
//!
//! Packets travel over UDP, so the `Subscribe` request is repeated until the
//! tracker acknowledges it.

pub mod network;

use shared::PawnEvent;

/// Renders an event as a single log line, or as JSON when `json` is set
pub fn format_event(event: &PawnEvent, json: bool) -> Result<String, serde_json::Error> {
    if json {
        return serde_json::to_string(event);
    }

    Ok(format!(
        "{} {} ({} via {})",
        event.kind, event.pawn, event.player.name, event.player.controller
    ))
}
