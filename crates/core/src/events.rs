use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Progress events surfaced to whatever UI drove the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// Current intent summary from the stack.
    Thought { summary: String },
    /// Pipeline status line, e.g. "DELIBERATING" or "EXECUTING research".
    Status { status: String },
    /// ReAct progress.
    Progress { step: usize, total_steps: usize },
    /// Which model core is serving the request.
    Model { label: String },
    /// Time budget for the request, seconds.
    Budget { time_s: f64 },
    /// A nexus task was added or removed.
    NexusTask { added: bool, id: String },
}

/// Event sink callback; cheap to clone, safe to call from any task.
pub type OnEvent = Arc<dyn Fn(CoreEvent) + Send + Sync>;

/// Emit an event when a sink is attached.
pub fn emit(on_event: &Option<OnEvent>, event: CoreEvent) {
    if let Some(sink) = on_event {
        sink(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emit_is_noop_without_sink() {
        emit(&None, CoreEvent::Status { status: "x".into() });
    }

    #[test]
    fn emit_delivers_to_sink() {
        let seen = Arc::new(Mutex::new(vec![]));
        let seen_clone = seen.clone();
        let sink: OnEvent = Arc::new(move |event| {
            seen_clone.lock().unwrap().push(format!("{event:?}"));
        });
        emit(&Some(sink), CoreEvent::Progress { step: 1, total_steps: 5 });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = CoreEvent::Model { label: "Reasoning Core".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "model");
    }
}
