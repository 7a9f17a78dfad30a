//! Input trees and configurations for end-to-end runs

use std::path::{Path, PathBuf};
use std::time::Duration;

use bulk_anonymize::Config;

/// Anonymization configuration document sent with every task
pub fn anonymization_document() -> serde_json::Value {
    serde_json::json!({
        "name": "e2e",
        "face": { "anonymization": "blur", "threshold": 0.5 },
        "license-plate": { "anonymization": "blur" }
    })
}

/// Configuration pointing at `endpoint` with `root/in` and `root/out` as folders
///
/// Polling is instant and the worker count is small so runs finish quickly.
pub fn config_for(endpoint: &str, root: &Path) -> Config {
    let mut config = Config::default();
    config.service.endpoint = endpoint.to_string();
    config.service.username = "e2e@example.com".to_string();
    config.service.password = "correct horse".to_string();
    config.service.request_timeout = Duration::from_secs(5);
    config.source.input_dir = root.join("in");
    config.source.output_dir = root.join("out");
    config.pipeline.workers = 2;
    config.pipeline.poll_interval = Duration::from_millis(5);
    config.pipeline.max_poll_attempts = 50;
    config.pipeline.fetch_retry.initial_delay = Duration::from_millis(5);
    config.pipeline.fetch_retry.jitter = false;
    config.anonymization = anonymization_document();
    std::fs::create_dir_all(&config.source.input_dir).unwrap();
    config
}

/// Create an image file below the input folder and return its content
pub fn write_image(config: &Config, relative: &str) -> Vec<u8> {
    let path = config.source.input_dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    // Not a real image; the service treats it as opaque bytes
    let content = format!("\u{ff}\u{d8} pixels of {relative}").into_bytes();
    std::fs::write(&path, &content).unwrap();
    content
}

/// Path below the output folder
pub fn output_path(config: &Config, relative: &str) -> PathBuf {
    config.source.output_dir.join(relative)
}

/// Every regular file below `root`, relative and sorted
pub fn files_below(root: &Path) -> Vec<String> {
    if !root.exists() {
        return Vec::new();
    }
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}
