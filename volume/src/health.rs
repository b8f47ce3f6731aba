use std::time::Duration;
use tracing::{info, warn};

use common::schemas::{HeartbeatRequest, HeartbeatResponse};
use common::trace_middleware::traced;

use crate::client::join_cluster;
use crate::state::VolumeState;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub async fn heartbeat_loop(
    state: VolumeState,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let url = format!("{}/admin/heartbeat", state.coordinator_url);
    let mut tick = tokio::time::interval(interval);
    let mut backoff = interval;

    loop {
        tokio::select! {
            _ = tick.tick() => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }

        let hb = HeartbeatRequest {
            node_id: state.node_id.clone(),
        };

        let req = traced(state.http_client.post(&url)).json(&hb);

        let ok = match req.send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<HeartbeatResponse>().await {
                Ok(ack) if !ack.registered => {
                    // Coordinator lost us (restart): register and re-announce.
                    info!("coordinator does not know {}, re-joining", state.node_id);
                    match join_cluster(&state).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("re-join failed: {e:#}");
                            false
                        }
                    }
                }
                Ok(_) => true,
                Err(e) => {
                    warn!("heartbeat ack unreadable: {e}");
                    false
                }
            },
            Ok(resp) => {
                warn!("heartbeat non-200: {}", resp.status());
                false
            }
            Err(e) => {
                warn!("heartbeat error: {e}");
                false
            }
        };

        if ok {
            backoff = interval;
            continue;
        }

        // back off on repeated failures, capped
        backoff = backoff.mul_f32(1.5).min(MAX_BACKOFF);
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }
    }

    info!("heartbeat loop stopped");

    Ok(())
}
