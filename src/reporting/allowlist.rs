//! # Allowed Errors Module / 已知错误模块
//!
//! A persisted allow-list of normalized error signatures. Known-flaky
//! failures matching the list are suppressed from failing a report while new
//! ones still surface.
//!
//! 持久化的规范化错误签名允许列表。匹配列表的已知不稳定失败不会使报告失败，
//! 而新的失败仍会暴露出来。

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::infra::logger::Logger;

/// Normalizes an error into its allow-list signature: the first line with
/// digits and brackets stripped and repeated whitespace collapsed. Matches
/// "the same error" across runs despite embedded line numbers or counts.
pub fn normalize_signature(error: &str) -> String {
    let first_line = error.lines().next().unwrap_or("");
    let stripped: String = first_line
        .chars()
        .filter(|c| !c.is_ascii_digit() && *c != '[' && *c != ']')
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The allowed-errors set, backed by a JSON array of signature strings.
pub struct AllowedErrors {
    path: PathBuf,
    signatures: BTreeSet<String>,
}

impl AllowedErrors {
    /// Loads the set. A missing file is an empty set; an unreadable or
    /// malformed file is logged and treated as empty.
    pub fn load(path: &Path, logger: &Logger) -> AllowedErrors {
        let signatures = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(entries) => entries.into_iter().collect(),
                Err(e) => {
                    logger.warn(format!(
                        "Ignoring malformed allowed-errors file {}: {}",
                        path.display(),
                        e
                    ));
                    BTreeSet::new()
                }
            },
            Err(_) => BTreeSet::new(),
        };

        AllowedErrors {
            path: path.to_path_buf(),
            signatures,
        }
    }

    pub fn contains(&self, error: &str) -> bool {
        self.signatures.contains(&normalize_signature(error))
    }

    /// Records an error's signature for later persistence.
    pub fn record(&mut self, error: &str) {
        self.signatures.insert(normalize_signature(error));
    }

    /// Overwrites the backing file with the current set.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries: Vec<&String> = self.signatures.iter().collect();
        let json = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, json).with_context(|| {
            format!("Failed to write allowed-errors file: {}", self.path.display())
        })
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
