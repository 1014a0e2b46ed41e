// ── Device probe ──
//
// Best-effort host facts read through a `FileReader`. Every field is
// optional: a missing file leaves it `None` rather than failing the probe.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::capability::FileReader;

pub const OPENWRT_RELEASE: &str = "/etc/openwrt_release";
pub const HOSTNAME: &str = "/proc/sys/kernel/hostname";
pub const UPTIME: &str = "/proc/uptime";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// `DISTRIB_ID`, e.g. `OpenWrt`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}

impl DeviceInfo {
    pub async fn collect(files: &dyn FileReader) -> Self {
        let mut info = Self {
            hostname: files
                .read_to_string(Path::new(HOSTNAME))
                .await
                .map(|h| h.trim().to_owned())
                .filter(|h| !h.is_empty()),
            uptime_secs: files
                .read_to_string(Path::new(UPTIME))
                .await
                .and_then(|text| parse_uptime(&text))
                .map(|d| d.as_secs()),
            ..Self::default()
        };

        if let Some(release) = files.read_to_string(Path::new(OPENWRT_RELEASE)).await {
            for (key, value) in parse_release(&release) {
                let slot = match key {
                    "DISTRIB_ID" => &mut info.distribution,
                    "DISTRIB_RELEASE" => &mut info.release,
                    "DISTRIB_REVISION" => &mut info.revision,
                    "DISTRIB_TARGET" => &mut info.target,
                    "DISTRIB_ARCH" => &mut info.arch,
                    _ => continue,
                };
                *slot = Some(value);
            }
        }
        info
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        let unknown = "unknown";
        format!(
            "{} {} ({}) on {}",
            self.distribution.as_deref().unwrap_or(unknown),
            self.release.as_deref().unwrap_or(unknown),
            self.target.as_deref().unwrap_or(unknown),
            self.hostname.as_deref().unwrap_or(unknown),
        )
    }
}

/// `KEY='value'` lines; quotes (single or double) are stripped.
fn parse_release(text: &str) -> impl Iterator<Item = (&str, String)> {
    text.lines().filter_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
            .unwrap_or(value);
        Some((key.trim(), value.to_owned()))
    })
}

/// First field of `/proc/uptime`: seconds since boot, fractional.
pub fn parse_uptime(text: &str) -> Option<Duration> {
    let secs: f64 = text.split_whitespace().next()?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
