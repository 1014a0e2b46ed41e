use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use ispapp_api::{BandwidthReport, Envelope};
use ispapp_config::Settings;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::context::AgentContext;
use crate::error::HandlerError;
use crate::registry::{Handler, Reply};

pub const DEFAULT_IPERF_SERVER: &str = "iperf.longshot-router.com";
const IPERF: &str = "iperf3";

/// Outcome of one iperf3 run. Rates are in Mbit/s (2^20 bits).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedtestResult {
    pub server: String,
    pub up: f64,
    pub down: f64,
    #[serde(skip)]
    pub duration: Duration,
}

impl SpeedtestResult {
    /// Shape posted to `/bandwidth`, rates in Kbit/s.
    pub fn to_report(&self) -> BandwidthReport {
        let now = Local::now();
        let duration = format!("{}s", self.duration.as_secs());
        BandwidthReport {
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            tx_avg: to_kbits(self.up),
            rx_avg: to_kbits(self.down),
            tx_duration: duration.clone(),
            rx_duration: duration,
            server: self.server.clone(),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_kbits(mbits: f64) -> u64 {
    (mbits.max(0.0) * 1024.0) as u64
}

/// Run iperf3 against the configured server (or the default one).
pub async fn run_speedtest(ctx: &AgentContext) -> Result<SpeedtestResult, HandlerError> {
    let server = Settings::from_store(&ctx.store)
        .iperf_server
        .unwrap_or_else(|| DEFAULT_IPERF_SERVER.to_owned());
    let args: Vec<String> = ["-c", server.as_str(), "-i", "1", "-t", "1", "-P", "5", "-f", "m", "-J"]
        .into_iter()
        .map(str::to_owned)
        .collect();

    info!(server = %server, "starting speed test");
    let started = Instant::now();
    let output = ctx.commands.run(IPERF, &args).await?;
    let duration = started.elapsed();

    if !output.success() {
        return Err(HandlerError::Command(format!(
            "{IPERF} exited with {:?}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }
    let (up, down) = parse_iperf_json(&output.stdout)?;
    info!(server = %server, up, down, "speed test finished");
    Ok(SpeedtestResult {
        server,
        up,
        down,
        duration,
    })
}

/// `(up, down)` in Mbit/s from iperf3's `-J` output.
pub fn parse_iperf_json(text: &str) -> Result<(f64, f64), HandlerError> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| HandlerError::Command(format!("unreadable {IPERF} output: {e}")))?;
    if let Some(err) = doc.get("error").and_then(Value::as_str) {
        return Err(HandlerError::Command(err.to_owned()));
    }
    let rate = |field: &str| {
        doc.pointer(&format!("/end/{field}/bits_per_second"))
            .and_then(Value::as_f64)
            .map_or(0.0, |bits| bits / 1024.0 / 1024.0)
    };
    Ok((rate("sum_sent"), rate("sum_received")))
}

/// `speedtest`: run iperf3 and reply with up/down rates.
pub struct SpeedtestHandler {
    ctx: AgentContext,
}

impl SpeedtestHandler {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler for SpeedtestHandler {
    async fn handle(&self, _request: &Envelope) -> Result<Reply, HandlerError> {
        let result = run_speedtest(&self.ctx).await?;
        let data = serde_json::to_value(&result)
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        Ok(Reply::data(data))
    }
}
