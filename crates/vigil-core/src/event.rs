//! Event ingestion into the analysis engine.

use crate::results::AffectedItemsResult;
use crate::transport::QueueSocket;
use serde_json::Value;
use tracing::debug;

/// Queue header marking events pushed through the API.
pub const EVENT_HEADER: &str = "1:API-Webhook:";

/// Queue each event for analysis.
///
/// Events are sent one datagram each; the affected items are the events that
/// were queued and every failure is reported under the event itself.
pub async fn send_event_to_analysisd(queue: &QueueSocket, events: &[String]) -> AffectedItemsResult {
    let mut result = AffectedItemsResult::with_messages(
        "All events were forwarded to analysisd",
        "Some events were forwarded to analysisd",
        "No events were forwarded to analysisd",
    );

    for event in events {
        match queue.send_msg(EVENT_HEADER, event).await {
            Ok(()) => result.add_affected(event.clone()),
            Err(e) => {
                debug!("Event not forwarded: {}", e);
                result.add_failed(event.clone(), &e);
            }
        }
    }
    result
}

/// Normalize an incoming event: strings pass through, anything else is sent
/// as its JSON text.
pub fn event_text(event: &Value) -> String {
    match event {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
