use crate::collab::{EmitOpts, TelemetrySink};

/// Telemetry sink writing every metric through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn emit(&self, metric: &str, value: f64, opts: &EmitOpts) -> anyhow::Result<()> {
        let run = opts
            .run_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| String::from("-"));
        let tags = opts
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        log::info!(target: "wander_crawler::telemetry", "{run} {metric}={value} [{tags}]");
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _metric: &str, _value: f64, _opts: &EmitOpts) -> anyhow::Result<()> {
        Ok(())
    }
}
