use serde::Serialize;
use tokio::sync::broadcast;

/// State changes observers (dashboards, tests) can follow.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    NodeRegistered { node_id: String },
    NodeOffline { node_id: String },
    FileAnnounced { filename: String, node_id: String },
    FileDeannounced { filename: String, node_id: String },
    FileRemoved { filename: String },
}

impl ControlEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::NodeRegistered { .. } => "node_registered",
            ControlEvent::NodeOffline { .. } => "node_offline",
            ControlEvent::FileAnnounced { .. } => "file_announced",
            ControlEvent::FileDeannounced { .. } => "file_deannounced",
            ControlEvent::FileRemoved { .. } => "file_removed",
        }
    }
}

pub struct EventHub {
    sender: broadcast::Sender<ControlEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ControlEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
