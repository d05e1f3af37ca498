//! Loading configuration files and building components from them.

use std::collections::HashMap;

use threadline_context::Encoding;
use threadline_engine::{ConfigError, StoreBackend, ThreadlineConfig};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

const SAMPLE: &str = r#"
[app]
bot_name = "Helper"
end_marker = "<end>"
temperature = 0.2

[context]
max_tokens = 2048
encoding = "cl100k_base"

[provider]
api_key = "sk-file"
max_retries = 1

[store]
backend = "memory"
"#;

#[test]
fn sample_file_builds_session_and_store() {
    let config = ThreadlineConfig::parse(SAMPLE).unwrap();

    let session = config.session_config().unwrap();
    assert_eq!(session.markers.bot_name(), "Helper");
    assert_eq!(session.limits.max_tokens, 2048);
    assert_eq!(config.encoding().unwrap(), Encoding::Cl100kBase);
    assert_eq!(config.store.backend, StoreBackend::Memory);

    let store = config.open_store().unwrap();
    assert_eq!(store.backend_name(), "memory");
    assert!(config.open_provider().is_ok());
}

#[test]
fn environment_overrides_file_values() {
    let mut config = ThreadlineConfig::parse(SAMPLE).unwrap();
    config
        .apply_env(lookup(&[("BOTNAME", "Robo"), ("OPENAI_API_KEY", "sk-env")]))
        .unwrap();

    assert_eq!(config.markers().bot_name(), "Robo");
    assert_eq!(config.provider.api_key.as_deref(), Some("sk-env"));
}

#[test]
fn sqlite_backend_opens_file_under_configured_path() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("nested").join("sessions.db");
    let toml = format!(
        "[store]\nbackend = \"sqlite\"\npath = {:?}\n",
        db.to_string_lossy()
    );
    let config = ThreadlineConfig::parse(&toml).unwrap();

    let store = config.open_store().unwrap();
    store.set("k", "v").unwrap();
    assert!(db.exists());
}

#[test]
fn missing_api_key_is_rejected_when_building_provider() {
    let config = ThreadlineConfig::parse("[store]\nbackend = \"memory\"\n").unwrap();
    assert!(config.open_provider().is_err());
}

#[test]
fn load_from_file_reads_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = ThreadlineConfig::load(Some(&path)).unwrap();
    assert_eq!(config.context.max_tokens, 2048);
    assert_eq!(config.store.backend, StoreBackend::Memory);
}

#[test]
fn malformed_file_reports_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[context\nmax_tokens = ").unwrap();

    let err = ThreadlineConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}
