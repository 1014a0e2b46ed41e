// ── Control-plane HTTP client ──
//
// Token exchange, the periodic `/update` poll and the `/terminal` command
// queue. All endpoints live on the same host and port as the session.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;

/// Access/refresh token pair issued by `/auth/login` or `/auth/refresh`.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenPair {
    access_token: String,
    refresh_token: String,
}

/// Instructions returned by `GET /update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateInstructions {
    pub execute_speedtest: bool,
    /// `"upgrade"` when a firmware upgrade is pending.
    pub fw_status: Option<String>,
    pub update_fast: bool,
    /// `"1"` asks the device to reboot.
    #[serde(deserialize_with = "flag")]
    pub reboot: bool,
}

/// Result of a speed test, posted to `/bandwidth`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthReport {
    pub date: String,
    pub time: String,
    /// Kbit/s.
    pub tx_avg: u64,
    /// Kbit/s.
    pub rx_avg: u64,
    pub tx_duration: String,
    pub rx_duration: String,
    pub server: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BandwidthAck {
    setserver: Option<String>,
}

/// Shell command waiting in the `/terminal` queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueuedCommand {
    pub id: String,
    pub cmd: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TerminalQueue {
    queue: Vec<QueuedCommand>,
}

/// Outcome of one queued command, posted back to `/terminal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub id: String,
    pub cmd: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub stdout: String,
    pub stderr: String,
    pub executed: bool,
}

/// Accepts `true`, `1`, `"1"` and `"true"`.
fn flag<'de, D>(de: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(de)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_u64() == Some(1),
        serde_json::Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    })
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ControlPlaneClient {
    /// Wrap an existing client; used to share one connection pool across
    /// endpoint changes.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Exchange the device identity for a token pair.
    pub async fn login(&self, login: &str, key: &SecretString) -> Result<TokenPair, Error> {
        let url = self.base_url.join("auth/login")?;
        debug!(%login, "requesting tokens via login");
        let resp = self
            .http
            .get(url)
            .query(&[("login", login), ("key", key.expose_secret())])
            .send()
            .await?;
        let raw: RawTokenPair = decode(resp).await?;
        Ok(raw.into())
    }

    /// Exchange a refresh token for a new pair.
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, Error> {
        let url = self.base_url.join("auth/refresh")?;
        debug!("requesting tokens via refresh");
        let resp = self
            .http
            .get(url)
            .query(&[("refreshToken", refresh_token.expose_secret())])
            .send()
            .await?;
        let raw: RawTokenPair = decode(resp).await?;
        Ok(raw.into())
    }

    pub async fn check_update(&self, access_token: &SecretString) -> Result<UpdateInstructions, Error> {
        let url = self.base_url.join("update")?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;
        decode(resp).await
    }

    /// Post speed-test results. Returns a replacement iperf server when
    /// the control plane assigns one.
    pub async fn report_bandwidth(
        &self,
        access_token: &SecretString,
        report: &BandwidthReport,
    ) -> Result<Option<String>, Error> {
        let url = self.base_url.join("bandwidth")?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(access_token.expose_secret())
            .json(report)
            .send()
            .await?;
        let body = checked_body(resp).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let ack: BandwidthAck = parse_body(body)?;
        Ok(ack.setserver.filter(|s| !s.trim().is_empty()))
    }

    /// Fetch the commands queued for this device.
    pub async fn terminal_queue(&self, access_token: &SecretString) -> Result<Vec<QueuedCommand>, Error> {
        let url = self.base_url.join("terminal")?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(access_token.expose_secret())
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let body = checked_body(resp).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let queue: TerminalQueue = parse_body(body)?;
        Ok(queue.queue)
    }

    /// Report executed commands. The response body is ignored.
    pub async fn report_terminal(
        &self,
        access_token: &SecretString,
        results: &[CommandResult],
    ) -> Result<(), Error> {
        let url = self.base_url.join("terminal")?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(access_token.expose_secret())
            .json(results)
            .send()
            .await?;
        checked_body(resp).await?;
        Ok(())
    }
}

impl From<RawTokenPair> for TokenPair {
    fn from(raw: RawTokenPair) -> Self {
        Self {
            access_token: SecretString::from(raw.access_token),
            refresh_token: SecretString::from(raw.refresh_token),
        }
    }
}

/// Map status codes onto the error taxonomy, then decode the JSON body.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    parse_body(checked_body(resp).await?)
}

/// Body of a successful response; 401/403 and other failures become errors.
async fn checked_body(resp: reqwest::Response) -> Result<String, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        });
    }
    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(body)
}

fn parse_body<T: DeserializeOwned>(body: String) -> Result<T, Error> {
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn update_instructions_accept_string_flags() {
        let parsed: UpdateInstructions = serde_json::from_str(
            r#"{"executeSpeedtest":true,"fwStatus":"upgrade","updateFast":false,"reboot":"1"}"#,
        )
        .unwrap();
        assert!(parsed.execute_speedtest);
        assert!(parsed.reboot);
        assert_eq!(parsed.fw_status.as_deref(), Some("upgrade"));

        let empty: UpdateInstructions = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, UpdateInstructions::default());
    }

    #[test]
    fn terminal_queue_tolerates_missing_queue() {
        let parsed: TerminalQueue =
            serde_json::from_str(r#"{"queue":[{"id":"7","cmd":"uptime"}]}"#).unwrap();
        assert_eq!(
            parsed.queue,
            [QueuedCommand {
                id: "7".into(),
                cmd: "uptime".into()
            }]
        );

        let empty: TerminalQueue = serde_json::from_str("{}").unwrap();
        assert!(empty.queue.is_empty());
    }

    #[test]
    fn base_url_must_parse() {
        assert!(matches!(
            ControlPlaneClient::from_reqwest("not a url", reqwest::Client::new()),
            Err(Error::InvalidUrl(_))
        ));
    }
}
