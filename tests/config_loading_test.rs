//! Configuration loading from TOML files.

use keypipe::config::PipelineConfig;
use keypipe::error::PipelineError;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_malformed_duration_is_a_config_error() {
    let file = write_config(
        r#"
        [sink]
        flush_window = "soon"
        "#,
    );
    let err = PipelineConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[test]
fn test_effective_config_round_trips_through_toml() {
    let config = PipelineConfig::default();
    let rendered = toml::to_string_pretty(&config).unwrap();
    assert!(rendered.contains("flush_window = \"30s\""));

    let file = write_config(&rendered);
    assert_eq!(PipelineConfig::load_from(file.path()).unwrap(), config);
}
