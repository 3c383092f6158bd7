//! Refresh and replay counters
//!
//! Emitted through the `metrics` facade; the relay binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.
//!
//! - `refresh_started_total`: refresh calls issued (one per leader)
//! - `refresh_joined_total`: callers that waited on an in-flight refresh
//! - `refresh_completed_total` (label `outcome`)
//! - `request_replays_total` (label `outcome`)
//! - `credential_rotations_total`: server-initiated rotations written

pub fn record_refresh_started() {
    metrics::counter!("refresh_started_total").increment(1);
}

pub fn record_refresh_joined() {
    metrics::counter!("refresh_joined_total").increment(1);
}

pub fn record_refresh_completed(outcome: &'static str) {
    metrics::counter!("refresh_completed_total", "outcome" => outcome).increment(1);
}

pub fn record_replay(outcome: &'static str) {
    metrics::counter!("request_replays_total", "outcome" => outcome).increment(1);
}

pub fn record_rotation() {
    metrics::counter!("credential_rotations_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn counters_render_with_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_refresh_started();
        record_refresh_joined();
        record_refresh_joined();
        record_refresh_completed("success");
        record_replay("sent");

        let output = handle.render();
        assert!(output.contains("refresh_started_total 1"), "{output}");
        assert!(output.contains("refresh_joined_total 2"), "{output}");
        assert!(output.contains("outcome=\"success\""), "{output}");
        assert!(output.contains("request_replays_total"), "{output}");
    }
}
