use async_trait::async_trait;
use ispapp_api::Envelope;
use serde_json::{Value, json};

use crate::context::AgentContext;
use crate::error::HandlerError;
use crate::registry::{Handler, Reply};

const SHELL: &str = "/bin/sh";

/// `terminal`: run a command on the device.
///
/// Payload is either an argv array (`["uci", "show", "network"]`) or
/// `{"cmd": "<shell line>"}`, which runs through `/bin/sh -c`.
pub struct TerminalHandler {
    ctx: AgentContext,
}

impl TerminalHandler {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler for TerminalHandler {
    async fn handle(&self, request: &Envelope) -> Result<Reply, HandlerError> {
        let (program, args) = argv(&request.data)?;
        let output = self.ctx.commands.run(&program, &args).await?;
        Ok(Reply {
            stdout: output.stdout,
            stderr: output.stderr,
            data: json!({ "exitCode": output.exit_code }),
        })
    }
}

fn argv(data: &Value) -> Result<(String, Vec<String>), HandlerError> {
    match data {
        Value::Array(items) => {
            let mut words = items.iter().map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| HandlerError::InvalidPayload("argv entries must be strings".into()))
            });
            let program = words
                .next()
                .transpose()?
                .filter(|p| !p.is_empty())
                .ok_or_else(|| HandlerError::InvalidPayload("empty argv".into()))?;
            let args = words.collect::<Result<Vec<_>, _>>()?;
            Ok((program, args))
        }
        Value::Object(map) => match map.get("cmd").and_then(Value::as_str) {
            Some(line) if !line.trim().is_empty() => {
                Ok((SHELL.to_owned(), vec!["-c".to_owned(), line.to_owned()]))
            }
            _ => Err(HandlerError::InvalidPayload("missing \"cmd\"".into())),
        },
        _ => Err(HandlerError::InvalidPayload(
            "expected an argv array or {\"cmd\": ...}".into(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn argv_array_splits_program_and_args() {
        let (program, args) = argv(&json!(["uci", "show", "network"])).unwrap();
        assert_eq!(program, "uci");
        assert_eq!(args, ["show", "network"]);
    }

    #[test]
    fn cmd_object_runs_through_shell() {
        let (program, args) = argv(&json!({"cmd": "ls | wc -l"})).unwrap();
        assert_eq!(program, SHELL);
        assert_eq!(args, ["-c", "ls | wc -l"]);
    }

    #[test]
    fn rejects_malformed_payloads() {
        for bad in [json!([]), json!([""]), json!([1, 2]), json!({"cmd": " "}), json!("ls")] {
            assert!(
                matches!(argv(&bad), Err(HandlerError::InvalidPayload(_))),
                "accepted {bad}"
            );
        }
    }
}
