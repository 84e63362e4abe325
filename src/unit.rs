//! One local directory paired with one remote directory.

use std::path::PathBuf;

use crate::url;

/// Extension of per-unit ledger files
pub const LEDGER_EXTENSION: &str = "recover";

/// A sync unit; identity is `rel_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUnit {
    pub src_base_dir: String,
    pub rel_dir: String,
    pub dest_endpoint: String,
    pub dest_base_dir: String,
}

impl SyncUnit {
    pub fn new(
        src_base_dir: impl Into<String>,
        rel_dir: impl Into<String>,
        dest_endpoint: impl Into<String>,
        dest_base_dir: impl Into<String>,
    ) -> Self {
        Self {
            src_base_dir: src_base_dir.into(),
            rel_dir: rel_dir.into(),
            dest_endpoint: dest_endpoint.into(),
            dest_base_dir: dest_base_dir.into(),
        }
    }

    pub fn local_dir(&self) -> PathBuf {
        PathBuf::from(&self.src_base_dir).join(self.rel_dir.trim_start_matches('/'))
    }

    /// Fully resolved destination directory URI
    pub fn remote_dir(&self) -> String {
        url::unit_dir_uri(&self.dest_endpoint, &self.dest_base_dir, &self.rel_dir)
    }

    pub fn remote_file(&self, name: &str) -> String {
        url::join(&self.remote_dir(), name)
    }

    /// `<relDir>.recover`, with nested path separators flattened to `_`
    pub fn ledger_file_name(&self) -> String {
        let flat: String = self
            .rel_dir
            .trim_matches('/')
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{flat}.{LEDGER_EXTENSION}")
    }

    /// Names of metadata fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.src_base_dir.trim().is_empty() {
            missing.push("srcBaseDir");
        }
        if self.rel_dir.trim_matches('/').is_empty() {
            missing.push("srcDir");
        }
        if self.dest_endpoint.trim().is_empty() && !self.dest_base_dir.starts_with('/') {
            missing.push("destEndpoint");
        }
        if self.dest_base_dir.trim().is_empty() {
            missing.push("destBaseDir");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let u = SyncUnit::new("/home/u/data", "run1", "file://", "/backup");
        assert_eq!(u.local_dir(), PathBuf::from("/home/u/data/run1"));
        assert_eq!(u.remote_dir(), "file:///backup/run1");
        assert_eq!(u.remote_file("a.txt"), "file:///backup/run1/a.txt");
        assert_eq!(u.ledger_file_name(), "run1.recover");
    }

    #[test]
    fn test_nested_rel_dir_ledger_name() {
        let u = SyncUnit::new("/d", "2024/jan/", "file://", "/b");
        assert_eq!(u.ledger_file_name(), "2024_jan.recover");
        assert_eq!(u.remote_dir(), "file:///b/2024/jan");
    }

    #[test]
    fn test_missing_fields() {
        let u = SyncUnit::new("", "x", "gsiftp://se", "");
        assert_eq!(u.missing_fields(), vec!["srcBaseDir", "destBaseDir"]);
        // a bare absolute base needs no endpoint
        let u = SyncUnit::new("/s", "x", "", "/b");
        assert!(u.missing_fields().is_empty());
    }
}
