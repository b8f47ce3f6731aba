use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::anyhow;

/// Durable per-user storage counters kept outside the control plane.
///
/// The coordinator calls this after announce/deannounce of a personal node,
/// once the registry lock is released. Calls are best-effort: a failure is
/// logged and the registry update stands, so the two counters may drift.
pub trait AccountStore: Send + Sync {
    fn used_storage(&self, owner: &str) -> anyhow::Result<u64>;

    /// Applies `delta` (floored at zero) and returns the new total.
    fn adjust_used_storage(&self, owner: &str, delta: i64) -> anyhow::Result<u64>;
}

#[derive(Default)]
pub struct MemoryAccounts {
    used: RwLock<HashMap<String, u64>>,
}

impl AccountStore for MemoryAccounts {
    fn used_storage(&self, owner: &str) -> anyhow::Result<u64> {
        let used = self
            .used
            .read()
            .map_err(|e| anyhow!("failed to acquire accounts read lock: {}", e))?;
        Ok(used.get(owner).copied().unwrap_or(0))
    }

    fn adjust_used_storage(&self, owner: &str, delta: i64) -> anyhow::Result<u64> {
        let mut used = self
            .used
            .write()
            .map_err(|e| anyhow!("failed to acquire accounts write lock: {}", e))?;
        let entry = used.entry(owner.to_string()).or_insert(0);
        *entry = if delta >= 0 {
            entry.saturating_add(delta.unsigned_abs())
        } else {
            entry.saturating_sub(delta.unsigned_abs())
        };
        Ok(*entry)
    }
}
