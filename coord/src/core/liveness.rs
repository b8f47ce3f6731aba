use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::core::registry::{ControlPlane, Tables};

/// Outcome of one liveness pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    /// Nodes whose heartbeat timed out in this pass, sorted.
    pub offline: Vec<String>,
    /// Files left with no online owner, sorted.
    pub evicted: Vec<String>,
}

impl SweepPlan {
    pub fn is_empty(&self) -> bool {
        self.offline.is_empty() && self.evicted.is_empty()
    }
}

/// Decides which nodes go offline and which files lose their last online
/// owner. Personal nodes are exempt from the timeout. Eviction only runs when
/// at least one node changed state in this pass.
pub fn plan_sweep(tables: &Tables, now: Instant, timeout: Duration) -> SweepPlan {
    let mut offline = tables
        .nodes
        .values()
        .filter(|n| !n.is_personal() && n.info.online)
        .filter(|n| now.saturating_duration_since(n.last_seen) > timeout)
        .map(|n| n.info.node_id.clone())
        .collect::<Vec<_>>();

    if offline.is_empty() {
        return SweepPlan::default();
    }
    offline.sort();

    let going = offline.iter().map(String::as_str).collect::<HashSet<_>>();
    let still_online = |id: &str| !going.contains(id) && tables.is_online(id);

    let mut evicted = tables
        .files
        .iter()
        .filter(|(_, entry)| !entry.owners.iter().any(|o| still_online(o.as_str())))
        .map(|(filename, _)| filename.clone())
        .collect::<Vec<_>>();
    evicted.sort();

    SweepPlan { offline, evicted }
}

/// Periodically marks silent nodes offline and drops files nobody online holds.
pub async fn liveness_monitor(
    plane: Arc<ControlPlane>,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(interval);
    info!(interval = ?interval, timeout = ?timeout, "liveness monitor started");

    loop {
        tokio::select! {
            _ = tick.tick() => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; }}
        }

        let plan = plane.sweep(Instant::now(), timeout);
        if !plan.is_empty() {
            debug!(
                offline = plan.offline.len(),
                evicted = plan.evicted.len(),
                "liveness sweep applied"
            );
        }
    }

    info!("liveness monitor stopped");

    Ok(())
}
