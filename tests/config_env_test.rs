//! Environment overrides on top of a configuration file.
//!
//! Kept in its own test binary so the process environment is not shared with
//! other configuration tests.

use keypipe::config::{InputSource, PipelineConfig};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_file_and_environment_are_merged() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        r#"
        [ring]
        capacity = 128

        [capture]
        source = "script"
        script = "Hello"

        [sink]
        flush_window = "2m"
        "#
        .as_bytes(),
    )
    .unwrap();

    std::env::set_var("KEYPIPE_RING__CAPACITY", "64");
    std::env::set_var("KEYPIPE_SINK__PENDING_CAPACITY", "256");
    let config = PipelineConfig::load_from(file.path());
    std::env::remove_var("KEYPIPE_RING__CAPACITY");
    std::env::remove_var("KEYPIPE_SINK__PENDING_CAPACITY");

    let config = config.unwrap();
    assert_eq!(config.ring.capacity, 64);
    assert_eq!(config.sink.pending_capacity, 256);
    assert_eq!(config.sink.flush_window, Duration::from_secs(120));
    assert_eq!(config.capture.source, InputSource::Script);
    assert_eq!(config.capture.script, "Hello");
    // Untouched sections keep their defaults
    assert_eq!(config.channels.transform_call, 5);
    assert_eq!(config.channels.sink_notify, 6);
    config.validate().unwrap();
}
