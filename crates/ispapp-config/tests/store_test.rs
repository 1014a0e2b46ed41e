// Integration tests for `ConfigStore` persistence against a temp directory.
#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;

use ispapp_config::settings::{self, PACKAGE, SETTINGS, ZERO_LOGIN, keys};
use ispapp_config::{ConfigStore, Package, Settings, StoredCredentials};
use secrecy::ExposeSecret;

const DEVICE_CONFIG: &str = "\
config settings 'settings'
    option enabled '1'
    option login '00000000-0000-0000-0000-000000000000'
    option Domain 'prv.cloud.ispapp.co'
    option ListenerPort '443'
    option accessToken ''
    option refreshToken ''
    list pingTargets 'cloud.example.co'
    list pingTargets 'alt.example.co'
";

// ── Helpers ─────────────────────────────────────────────────────────

fn seeded(text: &str) -> (tempfile::TempDir, ConfigStore) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(PACKAGE), text).unwrap();
    let store = ConfigStore::open(dir.path());
    store.load(PACKAGE).unwrap();
    (dir, store)
}

fn on_disk(dir: &tempfile::TempDir) -> String {
    std::fs::read_to_string(dir.path().join(PACKAGE)).unwrap()
}

// ── Transactions ────────────────────────────────────────────────────

#[test]
fn test_set_commit_survives_reload() {
    let (dir, store) = seeded(DEVICE_CONFIG);
    assert!(store.set(PACKAGE, SETTINGS, keys::DOMAIN, ["example.net"]));
    store.commit().unwrap();
    assert!(store.changes().is_empty());

    let fresh = ConfigStore::open(dir.path());
    fresh.load(PACKAGE).unwrap();
    assert_eq!(
        fresh.get(PACKAGE, SETTINGS, keys::DOMAIN),
        Some(vec!["example.net".to_owned()])
    );
    assert_eq!(
        fresh.get(PACKAGE, SETTINGS, keys::PING_TARGETS),
        Some(vec!["cloud.example.co".to_owned(), "alt.example.co".to_owned()])
    );
}

#[test]
fn test_revert_leaves_file_untouched() {
    let (dir, store) = seeded(DEVICE_CONFIG);
    let before = on_disk(&dir);

    store.set(PACKAGE, SETTINGS, keys::DOMAIN, ["example.net"]);
    store.del(PACKAGE, SETTINGS, keys::PING_TARGETS);
    store.add_section(PACKAGE, "extra", "overview").unwrap();
    store.revert();

    assert!(store.changes().is_empty());
    assert_eq!(on_disk(&dir), before);
    assert_eq!(
        store.get_first(PACKAGE, SETTINGS, keys::DOMAIN).as_deref(),
        Some("prv.cloud.ispapp.co")
    );
    assert!(store.section(PACKAGE, "extra").is_none());
}

#[test]
fn test_commit_leaves_no_temp_files() {
    let (dir, store) = seeded(DEVICE_CONFIG);
    store.set(PACKAGE, SETTINGS, keys::ENABLED, ["0"]);
    store.commit().unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec![PACKAGE.to_owned()]);
}

#[test]
fn test_committed_file_round_trips() {
    let (dir, store) = seeded(DEVICE_CONFIG);
    store.set(PACKAGE, SETTINGS, keys::KEY, ["it's a secret"]);
    store.commit().unwrap();

    let text = on_disk(&dir);
    let first = Package::parse(&text).unwrap();
    let second = Package::parse(&first.to_string()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        store.get_first(PACKAGE, SETTINGS, keys::KEY).as_deref(),
        Some("it's a secret")
    );
}

// ── Addressing ──────────────────────────────────────────────────────

#[test]
fn test_index_addressing_ignores_section_name() {
    let (_dir, store) = seeded(
        "config overview 'first'\nconfig settings 'main'\n option Domain 'a.example'\nconfig settings\n option Domain 'b.example'\n",
    );
    assert_eq!(
        store.get_first(PACKAGE, "@settings[0]", keys::DOMAIN).as_deref(),
        Some("a.example")
    );
    assert_eq!(
        store.get_first(PACKAGE, "@settings[1]", keys::DOMAIN).as_deref(),
        Some("b.example")
    );
    assert_eq!(Settings::from_store(&store).domain, "a.example");
}

// ── Defaults ────────────────────────────────────────────────────────

#[test]
fn test_empty_store_gets_defaults_persisted() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(PACKAGE), "").unwrap();
    let store = ConfigStore::open(dir.path());
    store.load(PACKAGE).unwrap();

    assert!(settings::ensure_defaults(&store).unwrap());

    let fresh = ConfigStore::open(dir.path());
    fresh.load(PACKAGE).unwrap();
    let loaded = Settings::from_store(&fresh);
    assert!(loaded.enabled);
    assert!(loaded.has_identity());
    assert_ne!(loaded.login, ZERO_LOGIN);
    assert!(uuid::Uuid::parse_str(&loaded.login).is_ok());

    let creds = StoredCredentials::load(&fresh);
    assert!(creds.access_token.expose_secret().is_empty());
    assert!(creds.refresh_token.expose_secret().is_empty());
    assert!(!creds.has_refresh_token());
}

#[test]
fn test_parse_error_does_not_truncate_file() {
    let dir = tempfile::tempdir().unwrap();
    let broken = "option login 'x'\nconfig settings 'settings'\n";
    std::fs::write(dir.path().join(PACKAGE), broken).unwrap();
    let store = ConfigStore::open(dir.path());

    assert!(store.load(PACKAGE).is_err());
    assert_eq!(std::fs::read_to_string(dir.path().join(PACKAGE)).unwrap(), broken);
}
