// `getconfig` and `config`: read and edit the settings section remotely.

use async_trait::async_trait;
use ispapp_api::Envelope;
use ispapp_config::OptionValue;
use ispapp_config::settings::{PACKAGE, SETTINGS, keys};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::error::HandlerError;
use crate::registry::{Handler, Reply};

const REDACTED: &str = "********";

pub struct GetConfigHandler {
    ctx: AgentContext,
}

impl GetConfigHandler {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler for GetConfigHandler {
    async fn handle(&self, _request: &Envelope) -> Result<Reply, HandlerError> {
        let store = &self.ctx.store;
        if store.section(PACKAGE, SETTINGS).is_none() {
            return Err(HandlerError::Internal("settings section is missing".into()));
        }

        let sequence = store
            .get_first(PACKAGE, SETTINGS, keys::SEQUENCE_NUMBER)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        store.set(PACKAGE, SETTINGS, keys::SEQUENCE_NUMBER, [sequence.to_string()]);
        store.set(
            PACKAGE,
            SETTINGS,
            keys::LAST_CONFIG_REQUEST,
            [chrono::Utc::now().timestamp().to_string()],
        );
        if let Err(e) = store.commit() {
            warn!(error = %e, "config request bookkeeping not persisted");
        }

        let section = store.section(PACKAGE, SETTINGS).ok_or_else(|| {
            HandlerError::Internal("settings section is missing".into())
        })?;

        let mut out = Map::new();
        for (key, value) in &section.options {
            let rendered = if is_secret(key) {
                let set = value.as_slice().iter().any(|v| !v.is_empty());
                Value::String(if set { REDACTED.to_owned() } else { String::new() })
            } else {
                match value {
                    OptionValue::Single(v) => Value::String(v.clone()),
                    OptionValue::List(vs) => json!(vs),
                }
            };
            out.insert(key.clone(), rendered);
        }
        Ok(Reply::data(Value::Object(out)))
    }
}

/// Applies `{key: value | [values]}` to the settings section and commits.
/// The whole request is rejected if any key is a secret or any value is
/// not a string, number, bool or array of those.
pub struct SetConfigHandler {
    ctx: AgentContext,
}

impl SetConfigHandler {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler for SetConfigHandler {
    async fn handle(&self, request: &Envelope) -> Result<Reply, HandlerError> {
        let Value::Object(changes) = &request.data else {
            return Err(HandlerError::InvalidPayload("expected an object of settings".into()));
        };

        let mut updates = Vec::with_capacity(changes.len());
        for (key, value) in changes {
            if is_secret(key) {
                return Err(HandlerError::Forbidden(key.clone()));
            }
            updates.push((key.as_str(), values_of(key, value)?));
        }

        let store = &self.ctx.store;
        let mut applied = Vec::new();
        for (key, values) in updates {
            if store.get(PACKAGE, SETTINGS, key).as_ref() == Some(&values) {
                continue;
            }
            if store.set(PACKAGE, SETTINGS, key, values) {
                applied.push(key.to_owned());
            } else {
                warn!(key, "settings section unavailable, value not applied");
            }
        }
        if !applied.is_empty() {
            // Staged values stay pending on failure and go out with the next commit.
            store.commit()?;
            info!(keys = ?applied, "settings updated remotely");
        }
        Ok(Reply::data(json!({ "applied": applied })))
    }
}

fn is_secret(key: &str) -> bool {
    keys::SECRETS.contains(&key)
}

fn values_of(key: &str, value: &Value) -> Result<Vec<String>, HandlerError> {
    match value {
        Value::Array(items) => items.iter().map(|v| scalar(key, v)).collect(),
        other => scalar(key, other).map(|v| vec![v]),
    }
}

fn scalar(key: &str, value: &Value) -> Result<String, HandlerError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_owned()),
        _ => Err(HandlerError::InvalidPayload(format!(
            "unsupported value for '{key}'"
        ))),
    }
}
