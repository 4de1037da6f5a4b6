//! Interaction recorder (spec §4.9).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde_json::Value;

use crate::id::generate_id;

/// Direction of an interaction relative to the component that recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Traffic flowing into the component.
    Downstream,
    /// Traffic flowing out of the component.
    Upstream,
}

/// Lifecycle status of a recorded interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionStatus {
    /// Request sent, no response observed yet.
    Pending,
    /// Completed with a response.
    Completed,
    /// Completed with an error.
    Failed,
    /// Timed out waiting for a response.
    Timeout,
}

/// One recorded request/response or message exchange.
#[derive(Debug, Clone)]
pub struct Interaction {
    /// Stable interaction id.
    pub id: String,
    /// Name of the recording component.
    pub service_name: String,
    /// Message type / discriminator.
    pub message_type: String,
    /// Protocol name (e.g. `"http"`, `"ws"`, `"amqp"`).
    pub protocol: String,
    /// Direction relative to the recording component.
    pub direction: Direction,
    /// Correlation id, if any.
    pub trace_id: Option<String>,
    /// When the request was sent/received.
    pub request_timestamp: SystemTime,
    /// When the response/ack landed, if it has.
    pub response_timestamp: Option<SystemTime>,
    /// Request payload, if captured.
    pub request_payload: Option<Value>,
    /// Response payload, if captured.
    pub response_payload: Option<Value>,
    /// Current status.
    pub status: InteractionStatus,
    /// Wall-clock duration once completed.
    pub duration: Option<Duration>,
    /// Error description if `status == Failed`.
    pub error: Option<String>,
}

impl Interaction {
    /// Start a new pending interaction.
    pub fn start(
        service_name: impl Into<String>,
        message_type: impl Into<String>,
        protocol: impl Into<String>,
        direction: Direction,
        trace_id: Option<String>,
        request_payload: Option<Value>,
    ) -> Self {
        Self {
            id: generate_id("interaction"),
            service_name: service_name.into(),
            message_type: message_type.into(),
            protocol: protocol.into(),
            direction,
            trace_id,
            request_timestamp: SystemTime::now(),
            response_timestamp: None,
            request_payload,
            response_payload: None,
            status: InteractionStatus::Pending,
            duration: None,
            error: None,
        }
    }

    fn complete(&mut self, status: InteractionStatus, response_payload: Option<Value>, error: Option<String>) {
        let now = SystemTime::now();
        self.response_timestamp = Some(now);
        self.duration = Some(now.duration_since(self.request_timestamp).unwrap_or_default());
        self.response_payload = response_payload;
        self.status = status;
        self.error = error;
    }
}

/// Predicate-based filter passed to [`InteractionRecorder::query`].
#[derive(Default)]
pub struct InteractionFilter {
    /// Restrict to this service name.
    pub service_name: Option<String>,
    /// Restrict to this message type.
    pub message_type: Option<String>,
    /// Restrict to this trace id.
    pub trace_id: Option<String>,
    /// Restrict to this direction.
    pub direction: Option<Direction>,
    /// Restrict to this status.
    pub status: Option<InteractionStatus>,
    /// Restrict to this protocol.
    pub protocol: Option<String>,
    /// Arbitrary extra predicate, ANDed with the rest.
    pub predicate: Option<Arc<dyn Fn(&Interaction) -> bool + Send + Sync>>,
}

impl InteractionFilter {
    fn matches(&self, i: &Interaction) -> bool {
        self.service_name.as_deref().map_or(true, |s| s == i.service_name)
            && self.message_type.as_deref().map_or(true, |m| m == i.message_type)
            && self.trace_id.as_deref().map_or(true, |t| Some(t) == i.trace_id.as_deref())
            && self.direction.map_or(true, |d| d == i.direction)
            && self.status.map_or(true, |s| s == i.status)
            && self.protocol.as_deref().map_or(true, |p| p == i.protocol)
            && self.predicate.as_ref().map_or(true, |p| p(i))
    }
}

/// Records interactions alongside components, optionally bounded to a ring
/// buffer so long-running scenarios don't grow memory unbounded (spec
/// §4.9, expanded per SPEC_FULL.md §2).
pub struct InteractionRecorder {
    interactions: Mutex<Vec<Interaction>>,
    capacity: Option<usize>,
}

impl InteractionRecorder {
    /// Unbounded recorder.
    pub fn new() -> Self {
        Self { interactions: Mutex::new(Vec::new()), capacity: None }
    }

    /// Recorder retaining at most `capacity` interactions, oldest evicted first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { interactions: Mutex::new(Vec::new()), capacity: Some(capacity) }
    }

    /// Begin recording a new interaction, returning its id for later completion.
    pub fn record_request(&self, interaction: Interaction) -> String {
        let id = interaction.id.clone();
        let mut interactions = self.interactions.lock();
        if let Some(cap) = self.capacity {
            while interactions.len() >= cap {
                interactions.remove(0);
            }
        }
        interactions.push(interaction);
        id
    }

    /// Mark an interaction completed successfully.
    pub fn record_response(&self, id: &str, response_payload: Option<Value>) {
        self.finish(id, InteractionStatus::Completed, response_payload, None);
    }

    /// Mark an interaction failed.
    pub fn record_failure(&self, id: &str, error: impl Into<String>) {
        self.finish(id, InteractionStatus::Failed, None, Some(error.into()));
    }

    /// Mark an interaction timed out.
    pub fn record_timeout(&self, id: &str) {
        self.finish(id, InteractionStatus::Timeout, None, None);
    }

    fn finish(&self, id: &str, status: InteractionStatus, response_payload: Option<Value>, error: Option<String>) {
        let mut interactions = self.interactions.lock();
        if let Some(i) = interactions.iter_mut().find(|i| i.id == id) {
            i.complete(status, response_payload, error);
        }
    }

    /// Query recorded interactions by any combination of filter fields.
    pub fn query(&self, filter: &InteractionFilter) -> Vec<Interaction> {
        self.interactions.lock().iter().filter(|i| filter.matches(i)).cloned().collect()
    }

    /// All recorded interactions, in recording order.
    pub fn all(&self) -> Vec<Interaction> {
        self.interactions.lock().clone()
    }
}

impl Default for InteractionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filters_by_status_and_service() {
        let recorder = InteractionRecorder::new();
        let id = recorder.record_request(Interaction::start(
            "svc-a",
            "GET /users",
            "http",
            Direction::Downstream,
            None,
            None,
        ));
        recorder.record_response(&id, None);

        let pending = recorder.query(&InteractionFilter {
            status: Some(InteractionStatus::Pending),
            ..Default::default()
        });
        assert!(pending.is_empty());

        let completed = recorder.query(&InteractionFilter {
            service_name: Some("svc-a".to_string()),
            status: Some(InteractionStatus::Completed),
            ..Default::default()
        });
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn bounded_recorder_evicts_oldest() {
        let recorder = InteractionRecorder::with_capacity(2);
        for i in 0..5 {
            recorder.record_request(Interaction::start(
                "svc",
                format!("msg-{i}"),
                "http",
                Direction::Downstream,
                None,
                None,
            ));
        }
        assert_eq!(recorder.all().len(), 2);
        assert_eq!(recorder.all()[1].message_type, "msg-4");
    }
}
