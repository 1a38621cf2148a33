//! Integration tests for config file loading

use std::io::Write;

use synapse::SynapseError;
use synapse::config::{CONFIG_VERSION, Config};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
        [working_memory]
        capacity = 5

        [oracle]
        provider = "rules"
        timeout_secs = 10
        "#,
    );

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.version, CONFIG_VERSION);
    assert_eq!(config.working_memory.capacity, 5);
    assert_eq!(config.working_memory.capacity_ceiling, 9);
    assert_eq!(config.oracle.timeout_secs, 10);
    assert_eq!(config.stm.episode_gap_minutes, 30);
}

#[test]
fn test_unsupported_version_is_rejected() {
    let file = write_config("version = 99\n");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(matches!(err, SynapseError::Config(_)));
}

#[test]
fn test_unordered_fate_tiers_are_rejected() {
    let file = write_config(
        r#"
        [consolidation]
        retained_strength = 0.9
        transfer_strength = 0.7
        "#,
    );
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_malformed_toml_is_an_error() {
    let file = write_config("[working_memory\ncapacity = ");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config"));
}
