use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use common::error::ApiError;
use common::schemas::{FileInfo, NodeLocation, RegisterRequest};
use common::time_utils::utc_now_ms;

use crate::core::accounts::AccountStore;
use crate::core::events::{ControlEvent, EventHub};
use crate::core::liveness::{SweepPlan, plan_sweep};
use crate::core::node::{FileEntry, NodeInfo, NodeRuntime, StorageInfo};

/// Node table and file index. Both live behind the single lock in
/// [`ControlPlane`]; announce/deannounce and the liveness sweep mutate them
/// together.
#[derive(Default, Debug)]
pub struct Tables {
    pub nodes: HashMap<String, NodeRuntime>,
    pub files: HashMap<String, FileEntry>,
}

impl Tables {
    pub fn is_online(&self, node_id: &str) -> bool {
        self.nodes.get(node_id).is_some_and(|n| n.info.online)
    }

    /// No-op for unknown nodes.
    pub fn adjust_storage(&mut self, node_id: &str, delta: i64) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.adjust_used(delta);
        }
    }

    pub fn apply(&mut self, plan: &SweepPlan) {
        for node_id in &plan.offline {
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.info.online = false;
            }
        }
        for filename in &plan.evicted {
            self.files.remove(filename);
        }
    }
}

struct AccountCharge {
    owner: String,
    delta: i64,
}

pub struct ControlPlane {
    tables: RwLock<Tables>,
    events: EventHub,
    accounts: Arc<dyn AccountStore>,
}

impl ControlPlane {
    pub fn new(accounts: Arc<dyn AccountStore>, event_capacity: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            events: EventHub::new(event_capacity),
            accounts,
        }
    }

    // A panic while holding the lock leaves the maps structurally valid, so
    // poisoning is not treated as fatal.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn register(&self, req: RegisterRequest) {
        self.register_at(req, Instant::now())
    }

    /// Upserts the node record. A known node keeps its `used` counter: that
    /// counter belongs to announce/deannounce accounting.
    pub fn register_at(&self, req: RegisterRequest, now: Instant) {
        let node_id = req.node_id.clone();
        {
            let mut tables = self.write();

            let storage = match (tables.nodes.get(&req.node_id), req.storage) {
                (Some(existing), Some(s)) => StorageInfo {
                    total: s.total,
                    used: existing.info.storage.used,
                },
                (Some(existing), None) => existing.info.storage,
                (None, s) => s.unwrap_or_default(),
            };

            let info = NodeInfo {
                node_id: req.node_id,
                address: req.address,
                port: req.port,
                online: true,
                last_heartbeat_ms: utc_now_ms(),
                owner: req.owner,
                storage,
                version: req.version,
            };

            tables.nodes.insert(
                node_id.clone(),
                NodeRuntime {
                    info,
                    last_seen: now,
                },
            );
        }

        info!(node_id = %node_id, "node registered");
        self.events.publish(ControlEvent::NodeRegistered { node_id });
    }

    pub fn heartbeat(&self, node_id: &str) -> bool {
        self.heartbeat_at(node_id, Instant::now())
    }

    /// Returns whether the node is known. Unknown ids are ignored.
    pub fn heartbeat_at(&self, node_id: &str, now: Instant) -> bool {
        let mut tables = self.write();
        match tables.nodes.get_mut(node_id) {
            Some(node) => {
                if !node.info.online {
                    info!(node_id, "node back online");
                }
                node.touch(now, utc_now_ms());
                true
            }
            None => {
                debug!(node_id, "heartbeat from unknown node ignored");
                false
            }
        }
    }

    /// Point-in-time copy of every node record, ordered by id.
    pub fn list(&self) -> Vec<NodeInfo> {
        let mut nodes = self
            .read()
            .nodes
            .values()
            .map(|n| n.info.clone())
            .collect::<Vec<_>>();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn node(&self, node_id: &str) -> Option<NodeInfo> {
        self.read().nodes.get(node_id).map(|n| n.info.clone())
    }

    pub fn adjust_storage(&self, node_id: &str, delta: i64) {
        self.write().adjust_storage(node_id, delta);
    }

    pub fn announce(&self, filename: &str, node_id: &str, size: u64) -> Result<(), ApiError> {
        let (added, charge) = {
            let mut guard = self.write();
            let tables = &mut *guard;

            let owner = tables
                .nodes
                .get(node_id)
                .ok_or_else(|| ApiError::NodeNotRegistered(node_id.to_string()))?
                .info
                .owner
                .clone();

            let entry = tables
                .files
                .entry(filename.to_string())
                .or_insert_with(|| FileEntry {
                    owners: HashSet::new(),
                    size,
                    upload_time_ms: utc_now_ms(),
                    replicated: false,
                });
            let added = entry.owners.insert(node_id.to_string());
            if entry.owners.len() > 1 {
                entry.replicated = true;
            }

            // Accounting only moves the first time a node claims the file.
            let delta = size_delta(size);
            if added {
                tables.adjust_storage(node_id, delta);
            }

            let charge = owner
                .filter(|_| added)
                .map(|owner| AccountCharge { owner, delta });
            (added, charge)
        };

        if let Some(charge) = charge {
            self.charge_account(&charge);
        }

        if added {
            info!(filename, node_id, size, "file announced");
            self.events.publish(ControlEvent::FileAnnounced {
                filename: filename.to_string(),
                node_id: node_id.to_string(),
            });
        }

        Ok(())
    }

    pub fn deannounce(&self, filename: &str, node_id: &str, size: u64) -> Result<(), ApiError> {
        let (removed, emptied, charge) = {
            let mut guard = self.write();
            let tables = &mut *guard;

            let owner = tables
                .nodes
                .get(node_id)
                .ok_or_else(|| ApiError::NodeNotRegistered(node_id.to_string()))?
                .info
                .owner
                .clone();

            let Some(entry) = tables.files.get_mut(filename) else {
                return Ok(());
            };

            let removed = entry.owners.remove(node_id);
            let emptied = entry.owners.is_empty();
            if emptied {
                tables.files.remove(filename);
            }

            let delta = -size_delta(size);
            if removed {
                tables.adjust_storage(node_id, delta);
            }

            let charge = owner
                .filter(|_| removed)
                .map(|owner| AccountCharge { owner, delta });
            (removed, emptied, charge)
        };

        if let Some(charge) = charge {
            self.charge_account(&charge);
        }

        if removed {
            info!(filename, node_id, "file deannounced");
            self.events.publish(ControlEvent::FileDeannounced {
                filename: filename.to_string(),
                node_id: node_id.to_string(),
            });
        }
        if emptied {
            self.events.publish(ControlEvent::FileRemoved {
                filename: filename.to_string(),
            });
        }

        Ok(())
    }

    /// Online owners of `filename`. Offline owners stay in the index but are not returned.
    pub fn locate(&self, filename: &str) -> Vec<NodeLocation> {
        let tables = self.read();
        let Some(entry) = tables.files.get(filename) else {
            return vec![];
        };

        let mut locations = entry
            .owners
            .iter()
            .filter_map(|id| tables.nodes.get(id))
            .filter(|n| n.info.online)
            .map(|n| n.info.location())
            .collect::<Vec<_>>();
        locations.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        locations
    }

    pub fn list_files(&self) -> Vec<String> {
        let mut files = self.read().files.keys().cloned().collect::<Vec<_>>();
        files.sort();
        files
    }

    pub fn file_info(&self, filename: &str) -> Option<FileInfo> {
        let tables = self.read();
        let entry = tables.files.get(filename)?;

        let mut owners = entry.owners.iter().cloned().collect::<Vec<_>>();
        owners.sort();

        Some(FileInfo {
            filename: filename.to_string(),
            owners,
            size: entry.size,
            upload_time_ms: entry.upload_time_ms,
            replicated: entry.replicated,
        })
    }

    /// One liveness pass: plan and apply under the write lock, then log and
    /// broadcast what changed.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> SweepPlan {
        let plan = {
            let mut tables = self.write();
            let plan = plan_sweep(&tables, now, timeout);
            tables.apply(&plan);
            plan
        };

        for node_id in &plan.offline {
            warn!(node_id = %node_id, timeout = ?timeout, "node offline: heartbeat timeout");
            self.events.publish(ControlEvent::NodeOffline {
                node_id: node_id.clone(),
            });
        }
        for filename in &plan.evicted {
            info!(filename = %filename, "file evicted: no online owner");
            self.events.publish(ControlEvent::FileRemoved {
                filename: filename.clone(),
            });
        }

        plan
    }

    fn charge_account(&self, charge: &AccountCharge) {
        match self.accounts.adjust_used_storage(&charge.owner, charge.delta) {
            Ok(used) => debug!(owner = %charge.owner, delta = charge.delta, used, "account storage adjusted"),
            Err(e) => warn!(owner = %charge.owner, delta = charge.delta, "account storage update failed: {e:#}"),
        }
    }
}

fn size_delta(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
