// Dispatch and handler behaviour through the public registry.
#![allow(clippy::unwrap_used, clippy::float_cmp)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ispapp_api::{Dispatcher, Envelope, Outbox, Response};
use ispapp_config::ConfigStore;
use ispapp_config::settings::{PACKAGE, SETTINGS, keys};
use ispapp_core::handlers::register_defaults;
use ispapp_core::{
    AGENT_VERSION, AgentContext, CommandOutput, CommandRunner, FileReader, Handler,
    HandlerError, HandlerRegistry, Reply,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    outputs: HashMap<String, CommandOutput>,
}

impl FakeRunner {
    fn with(program: &str, stdout: &str, exit_code: i32) -> Self {
        Self {
            outputs: HashMap::from([(
                program.to_owned(),
                CommandOutput {
                    stdout: stdout.to_owned(),
                    stderr: String::new(),
                    exit_code: Some(exit_code),
                },
            )]),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HandlerError> {
        self.calls.lock().unwrap().push((program.to_owned(), args.to_vec()));
        self.outputs
            .get(program)
            .cloned()
            .ok_or_else(|| HandlerError::Command(format!("{program}: not found")))
    }
}

struct MapReader(HashMap<PathBuf, String>);

#[async_trait]
impl FileReader for MapReader {
    async fn read_to_string(&self, path: &Path) -> Option<String> {
        self.0.get(path).cloned()
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    ctx: AgentContext,
    runner: Arc<FakeRunner>,
    registry: HandlerRegistry,
}

fn fixture(runner: FakeRunner) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ConfigStore::open(dir.path()));
    ispapp_config::ensure_defaults(&store).unwrap();

    let runner = Arc::new(runner);
    let files = MapReader(HashMap::from([(
        PathBuf::from("/proc/sys/kernel/hostname"),
        "router-1\n".to_owned(),
    )]));
    let ctx = AgentContext::new(store, runner.clone(), Arc::new(files));
    let registry = register_defaults(HandlerRegistry::builder(), &ctx).build();
    Fixture {
        dir,
        ctx,
        runner,
        registry,
    }
}

fn request(kind: &str, data: Value) -> Envelope {
    Envelope::new(kind, data).with_correlation(format!("{kind}-1"))
}

async fn recv(rx: &mut mpsc::Receiver<String>) -> Response {
    let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a reply")
        .unwrap();
    serde_json::from_str(&text).unwrap()
}

struct Slow {
    delay: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler for Slow {
    async fn handle(&self, request: &Envelope) -> Result<Reply, HandlerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Reply::data(json!({ "kind": request.kind })))
    }
}

fn slow(delay_ms: u64, in_flight: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> (Slow, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = Slow {
        delay: Duration::from_millis(delay_ms),
        calls: Arc::clone(&calls),
        in_flight: Arc::clone(in_flight),
        peak: Arc::clone(peak),
    };
    (handler, calls)
}

// ── Dispatch ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_each_type_dispatched_exactly_once() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (long, long_calls) = slow(200, &in_flight, &peak);
    let (short, short_calls) = slow(10, &in_flight, &peak);
    let registry = HandlerRegistry::builder()
        .register("long", long)
        .register("short", short)
        .build();

    let (outbox, mut rx) = Outbox::channel(8);
    registry.dispatch(request("long", Value::Null), &outbox);
    registry.dispatch(request("short", Value::Null), &outbox);

    // The short handler is not stuck behind the long one.
    let first = recv(&mut rx).await;
    let second = recv(&mut rx).await;
    assert_eq!(first.kind, "short");
    assert_eq!(second.kind, "long");
    assert_eq!(second.correlation_id.as_deref(), Some("long-1"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(long_calls.load(Ordering::SeqCst), 1);
    assert_eq!(short_calls.load(Ordering::SeqCst), 1);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrency_limit_is_honoured() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, _) = slow(50, &in_flight, &peak);
    let (b, _) = slow(50, &in_flight, &peak);
    let registry = HandlerRegistry::builder()
        .register("a", a)
        .register("b", b)
        .max_concurrent(1)
        .build();

    let (outbox, mut rx) = Outbox::channel(8);
    registry.dispatch(request("a", Value::Null), &outbox);
    registry.dispatch(request("b", Value::Null), &outbox);
    recv(&mut rx).await;
    recv(&mut rx).await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_defaults_cover_inbound_types() {
    let fx = fixture(FakeRunner::default());
    assert_eq!(
        fx.registry.kinds(),
        ["command", "config", "getconfig", "getupdate", "speedtest", "terminal"]
    );
}

// ── Handlers ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_terminal_runs_argv_and_reports_exit_code() {
    let fx = fixture(FakeRunner::with("uci", "network.lan=interface\n", 0));
    let resp = fx
        .registry
        .execute(&request("terminal", json!(["uci", "show", "network"])))
        .await
        .unwrap();

    assert!(!resp.is_error());
    assert_eq!(resp.stdout, "network.lan=interface\n");
    assert_eq!(resp.data, json!({ "exitCode": 0 }));
    assert_eq!(
        fx.runner.calls(),
        [("uci".to_owned(), vec!["show".to_owned(), "network".to_owned()])]
    );
}

#[tokio::test]
async fn test_terminal_spawn_failure_is_reported() {
    let fx = fixture(FakeRunner::default());
    let resp = fx
        .registry
        .execute(&request("terminal", json!(["missing"])))
        .await
        .unwrap();
    assert!(resp.is_error());
    assert!(resp.stderr.contains("missing: not found"));
    assert_eq!(resp.correlation_id.as_deref(), Some("terminal-1"));
}

#[tokio::test]
async fn test_getconfig_redacts_secrets() {
    let fx = fixture(FakeRunner::default());
    fx.ctx.store.set(PACKAGE, SETTINGS, keys::KEY, ["hunter2"]);

    let resp = fx.registry.execute(&request("getconfig", Value::Null)).await.unwrap();
    assert_eq!(resp.data[keys::KEY], "********");
    assert_eq!(resp.data[keys::ACCESS_TOKEN], "");
    assert_eq!(resp.data[keys::DOMAIN], "prv.cloud.ispapp.co");
    assert!(resp.data[keys::PING_TARGETS].is_array());
    assert!(!serde_json::to_string(&resp).unwrap().contains("hunter2"));
}

#[tokio::test]
async fn test_config_applies_and_persists() {
    let fx = fixture(FakeRunner::default());
    let resp = fx
        .registry
        .execute(&request(
            "config",
            json!({
                "Domain": "cloud.example.net",
                "updateInterval": 5,
                "pingTargets": ["a.example", "b.example"],
            }),
        ))
        .await
        .unwrap();
    assert!(!resp.is_error(), "{resp:?}");
    assert_eq!(resp.data["applied"].as_array().unwrap().len(), 3);

    let reopened = ConfigStore::open(fx.dir.path());
    reopened.load(PACKAGE).unwrap();
    assert_eq!(
        reopened.get_first(PACKAGE, SETTINGS, keys::DOMAIN).as_deref(),
        Some("cloud.example.net")
    );
    assert_eq!(
        reopened.get(PACKAGE, SETTINGS, keys::PING_TARGETS).unwrap(),
        ["a.example", "b.example"]
    );
    assert_eq!(
        reopened.get_first(PACKAGE, SETTINGS, keys::UPDATE_INTERVAL).as_deref(),
        Some("5")
    );
}

#[tokio::test]
async fn test_config_rejects_secret_keys_atomically() {
    let fx = fixture(FakeRunner::default());
    let resp = fx
        .registry
        .execute(&request(
            "config",
            json!({ "Domain": "evil.example", "accessToken": "x" }),
        ))
        .await
        .unwrap();

    assert_eq!(
        resp.error.as_deref(),
        Some("key 'accessToken' cannot be changed remotely")
    );
    assert_eq!(
        fx.ctx.store.get_first(PACKAGE, SETTINGS, keys::DOMAIN).as_deref(),
        Some("prv.cloud.ispapp.co")
    );
    assert!(fx.ctx.store.changes().is_empty());
}

#[tokio::test]
async fn test_config_commit_failure_keeps_changes_pending() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("cfg");
    let store = Arc::new(ConfigStore::open(&root));
    ispapp_config::ensure_defaults(&store).unwrap();
    let ctx = AgentContext::new(
        Arc::clone(&store),
        Arc::new(FakeRunner::default()),
        Arc::new(MapReader(HashMap::new())),
    );
    let registry = register_defaults(HandlerRegistry::builder(), &ctx).build();

    // A regular file where the config directory should be.
    std::fs::remove_dir_all(&root).unwrap();
    std::fs::write(&root, "").unwrap();

    let resp = registry
        .execute(&request("config", json!({ "Domain": "cloud.example.net" })))
        .await
        .unwrap();
    assert!(resp.is_error());
    assert!(resp.error.as_deref().unwrap().contains("failed to persist"));
    assert_eq!(
        store.get_first(PACKAGE, SETTINGS, keys::DOMAIN).as_deref(),
        Some("cloud.example.net")
    );
    assert_eq!(store.changes(), [PACKAGE.to_owned()]);

    // Once the directory is back the staged value goes out with the next commit.
    std::fs::remove_file(&root).unwrap();
    store.commit().unwrap();
    let reopened = ConfigStore::open(&root);
    reopened.load(PACKAGE).unwrap();
    assert_eq!(
        reopened.get_first(PACKAGE, SETTINGS, keys::DOMAIN).as_deref(),
        Some("cloud.example.net")
    );
}

#[tokio::test]
async fn test_config_without_settings_section_applies_nothing() {
    let fx = fixture(FakeRunner::default());
    assert!(fx.ctx.store.del_section(PACKAGE, SETTINGS));
    fx.ctx.store.commit().unwrap();

    let resp = fx
        .registry
        .execute(&request("config", json!({ "Domain": "cloud.example.net" })))
        .await
        .unwrap();
    assert!(!resp.is_error(), "{resp:?}");
    assert_eq!(resp.data["applied"], json!([]));
    assert!(fx.ctx.store.changes().is_empty());
}

#[tokio::test]
async fn test_getconfig_counts_requests() {
    let fx = fixture(FakeRunner::default());

    let first = fx.registry.execute(&request("getconfig", Value::Null)).await.unwrap();
    let second = fx.registry.execute(&request("getconfig", Value::Null)).await.unwrap();
    assert_eq!(first.data[keys::SEQUENCE_NUMBER], "1");
    assert_eq!(second.data[keys::SEQUENCE_NUMBER], "2");
    let stamp: i64 = second.data[keys::LAST_CONFIG_REQUEST].as_str().unwrap().parse().unwrap();
    assert!(stamp > 1_600_000_000);

    let reopened = ConfigStore::open(fx.dir.path());
    reopened.load(PACKAGE).unwrap();
    assert_eq!(
        reopened.get_first(PACKAGE, SETTINGS, keys::SEQUENCE_NUMBER).as_deref(),
        Some("2")
    );
}

#[tokio::test]
async fn test_command_status_and_unknown() {
    let fx = fixture(FakeRunner::default());

    let status = fx
        .registry
        .execute(&request("command", json!({ "command": "status" })))
        .await
        .unwrap();
    assert_eq!(status.data["session"], "Disconnected");
    assert_eq!(status.data["device"]["hostname"], "router-1");

    let unknown = fx
        .registry
        .execute(&request("command", json!({ "command": "selfdestruct" })))
        .await
        .unwrap();
    assert_eq!(
        unknown.error.as_deref(),
        Some("invalid payload: unknown command 'selfdestruct'")
    );
}

#[tokio::test]
async fn test_command_reboot_runs_reboot() {
    let fx = fixture(FakeRunner::with("reboot", "", 0));
    let resp = fx
        .registry
        .execute(&request("command", json!({ "command": "reboot" })))
        .await
        .unwrap();
    assert!(!resp.is_error());
    assert_eq!(fx.runner.calls(), [("reboot".to_owned(), Vec::new())]);
}

#[tokio::test]
async fn test_getupdate_reports_version_and_device() {
    let fx = fixture(FakeRunner::default());
    let resp = fx.registry.execute(&request("getupdate", Value::Null)).await.unwrap();
    assert_eq!(resp.data["version"], AGENT_VERSION);
    assert_eq!(resp.data["session"], "Disconnected");
    assert_eq!(resp.data["device"]["hostname"], "router-1");
}

#[tokio::test]
async fn test_speedtest_uses_default_server() {
    let iperf = r#"{"end": {
        "sum_sent": {"bits_per_second": 20971520},
        "sum_received": {"bits_per_second": 41943040}
    }}"#;
    let fx = fixture(FakeRunner::with("iperf3", iperf, 0));
    let resp = fx.registry.execute(&request("speedtest", Value::Null)).await.unwrap();

    assert!(!resp.is_error(), "{resp:?}");
    assert_eq!(resp.data["up"], 20.0);
    assert_eq!(resp.data["down"], 40.0);
    assert_eq!(resp.data["server"], "iperf.longshot-router.com");
    let calls = fx.runner.calls();
    assert_eq!(calls[0].1[..2], ["-c", "iperf.longshot-router.com"]);
}
