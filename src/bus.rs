use crate::chat::Message;
use crate::filters::FilterState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events the UI observes; the SSE endpoint forwards them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    MessageAppended(Message),

    /// The active conversation changed and the transcript was reloaded.
    ThreadChanged { group: Option<i64> },

    ConversationsUpdated,

    /// `fields` are the keys that were auto-filled and now carry the
    /// transient highlight.
    FiltersAutoFilled {
        fields: Vec<String>,
        filters: FilterState,
    },

    HighlightCleared,

    FiltersApplied { filters: FilterState },

    /// A system notification (e.g., session restored, backend unreachable)
    SystemNotification {
        level: NotificationLevel,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
