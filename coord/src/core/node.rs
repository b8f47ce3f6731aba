use std::collections::HashSet;
use std::time::Instant;

pub use common::schemas::{NodeInfo, StorageInfo};

#[derive(Clone, Debug)]
pub struct NodeRuntime {
    pub info: NodeInfo,
    pub last_seen: Instant,
}

impl NodeRuntime {
    /// Personal nodes belong to a user session and never time out.
    pub fn is_personal(&self) -> bool {
        self.info.owner.is_some()
    }

    pub fn touch(&mut self, now: Instant, now_ms: i128) {
        self.last_seen = now;
        self.info.last_heartbeat_ms = now_ms;
        self.info.online = true;
    }

    /// Adds `delta` to `used`, flooring at zero.
    pub fn adjust_used(&mut self, delta: i64) {
        let used = &mut self.info.storage.used;
        *used = if delta >= 0 {
            used.saturating_add(delta.unsigned_abs())
        } else {
            used.saturating_sub(delta.unsigned_abs())
        };
    }
}

#[derive(Clone, Debug)]
pub struct FileEntry {
    pub owners: HashSet<String>, // node_ids; never empty
    pub size: u64,               // from the first announcer
    pub upload_time_ms: i128,
    pub replicated: bool,
}
