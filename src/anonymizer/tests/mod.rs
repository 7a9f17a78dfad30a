use super::test_helpers::{FakeApi, Progress, anonymized, test_config, write_input};
use super::*;
use crate::error::Error;
use crate::types::RunSummary;
use std::time::Duration;


fn anonymizer(config: Config, api: &Arc<FakeApi>) -> Anonymizer {
    Anonymizer::with_api(config, api.clone())
}

/// Every file below `root`, relative to it, sorted
fn files_below(root: &std::path::Path) -> Vec<String> {
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
