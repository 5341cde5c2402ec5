//! Recorder installation.

use std::net::SocketAddr;

use {anyhow::Result, tracing::info};

/// Seconds buckets for sink deliveries (file appends up to slow webhooks).
#[cfg(feature = "prometheus")]
const SINK_DURATION_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Install the global recorder.
///
/// With the `prometheus` feature and a `listen` address this serves
/// `/metrics` on that address. Otherwise the `metrics` macros stay no-ops.
/// Must be called from inside a tokio runtime.
pub fn init_metrics(enabled: bool, listen: Option<SocketAddr>) -> Result<()> {
    let Some(addr) = listen.filter(|_| enabled) else {
        info!("metrics export disabled");
        return Ok(());
    };

    #[cfg(feature = "prometheus")]
    {
        use {
            crate::completion,
            metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
        };

        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Full(completion::SINK_DURATION_SECONDS.to_string()),
                SINK_DURATION_BUCKETS,
            )?
            .install()?;
        info!(%addr, "prometheus exporter listening");
    }

    #[cfg(not(feature = "prometheus"))]
    info!(%addr, "metrics requested but the prometheus exporter is not compiled in");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_is_a_no_op() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        assert!(init_metrics(false, Some(addr)).is_ok());
        assert!(init_metrics(true, None).is_ok());
    }
}
