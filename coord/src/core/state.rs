use std::sync::Arc;
use std::time::Duration;

use crate::core::registry::ControlPlane;

#[derive(Clone)]
pub struct CoordinatorState {
    pub plane: Arc<ControlPlane>,

    pub sweep_interval: Duration,
    pub node_timeout: Duration,
}
