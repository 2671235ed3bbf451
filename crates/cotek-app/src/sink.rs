use tracing::{debug, info};

use device_cache::StateSink;
use types::{LinkStatus, SensorName, SwitchState, Target};

/// Publishes cache updates as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StateSink for TracingSink {
    fn publish_sensor(&self, name: SensorName, value: Option<f64>) {
        match value {
            Some(value) => debug!(entity_id = %name.entity_id(), value, "sensor updated"),
            None => debug!(entity_id = %name.entity_id(), "sensor unavailable"),
        }
    }

    fn publish_state(&self, target: Target, state: SwitchState) {
        debug!(entity_id = %format!("binary_sensor.{target}_state"), state = ?state, "state updated");
    }

    fn publish_link(&self, status: LinkStatus) {
        info!(entity_id = "sensor.serial_status", status = ?status, "serial status");
    }
}
