//! JSON configuration for config-mode runs, plus the run settings shared
//! with recover mode.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::checksum::ChecksumType;
use crate::error::{Result, SyncError};
use crate::unit::SyncUnit;

/// Required keys of a config file
pub const REQUIRED_FIELDS: [&str; 4] = ["srcBaseDir", "destEndpoint", "destBaseDir", "srcItems"];

/// What to do when a unit's ledger already exists in config mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OnExistingLedger {
    /// Load it and skip files already marked done
    #[default]
    Resume,
    /// Discard it and start from an all-idle ledger
    Reinit,
    /// Abort the run
    Fail,
}

fn default_streams() -> u32 {
    2
}

fn default_dir_mode() -> u32 {
    0o755
}

/// Parse a permission mode written as octal digits ("755", "0755", "0o755").
pub fn parse_mode(s: &str) -> std::result::Result<u32, String> {
    let t = s.trim();
    let t = t.strip_prefix("0o").unwrap_or(t);
    let mode = u32::from_str_radix(t, 8).map_err(|_| format!("invalid directory mode '{s}'"))?;
    if mode > 0o7777 {
        return Err(format!("directory mode '{s}' out of range"));
    }
    Ok(mode)
}

fn de_mode<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    // integers are read as octal digits too: 755 means rwxr-xr-x
    let text = match Raw::deserialize(d)? {
        Raw::Num(n) => n.to_string(),
        Raw::Text(s) => s,
    };
    parse_mode(&text).map_err(serde::de::Error::custom)
}

/// Contents of a `--conf` file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub src_base_dir: String,
    pub dest_endpoint: String,
    pub dest_base_dir: String,
    pub src_items: Vec<String>,
    #[serde(default)]
    pub on_existing_ledger: OnExistingLedger,
    #[serde(default)]
    pub checksum: ChecksumType,
    #[serde(default = "default_streams")]
    pub streams: u32,
    #[serde(default = "default_dir_mode", deserialize_with = "de_mode")]
    pub dir_mode: u32,
    #[serde(default)]
    pub ledger_dir: Option<PathBuf>,
}

/// Fail with `MissingField` for the first absent (or null) key.
pub fn check_required(value: &serde_json::Value, fields: &[&'static str], path: &Path) -> Result<()> {
    for &field in fields {
        match value.get(field) {
            None | Some(serde_json::Value::Null) => {
                return Err(SyncError::MissingField {
                    field,
                    path: path.to_path_buf(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SyncError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse config text; `origin` is only used in error messages
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let parse_err = |source| SyncError::ConfigParse {
            path: origin.to_path_buf(),
            source,
        };
        let value: serde_json::Value = serde_json::from_str(text).map_err(parse_err)?;
        check_required(&value, &REQUIRED_FIELDS, origin)?;
        let config: SyncConfig = serde_json::from_value(value).map_err(parse_err)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.src_base_dir.trim().is_empty() {
            return Err(SyncError::Config("srcBaseDir is empty".to_string()));
        }
        if self.dest_base_dir.trim().is_empty() {
            return Err(SyncError::Config("destBaseDir is empty".to_string()));
        }
        if let Some(bad) = self.src_items.iter().find(|i| i.trim_matches('/').is_empty()) {
            return Err(SyncError::Config(format!("srcItems contains an empty entry '{bad}'")));
        }
        if self.streams == 0 {
            return Err(SyncError::Config("streams must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Units in configuration order
    pub fn units(&self) -> Vec<SyncUnit> {
        self.src_items
            .iter()
            .map(|item| {
                SyncUnit::new(
                    self.src_base_dir.clone(),
                    item.clone(),
                    self.dest_endpoint.clone(),
                    self.dest_base_dir.clone(),
                )
            })
            .collect()
    }
}

/// Knobs that apply to a whole run, in either mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub on_existing_ledger: OnExistingLedger,
    pub checksum: ChecksumType,
    pub streams: u32,
    pub dir_mode: u32,
    /// Where config mode keeps `<relDir>.recover` files
    pub ledger_dir: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            on_existing_ledger: OnExistingLedger::default(),
            checksum: ChecksumType::default(),
            streams: default_streams(),
            dir_mode: default_dir_mode(),
            ledger_dir: PathBuf::from("."),
        }
    }
}

/// Command-line values that win over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub on_existing_ledger: Option<OnExistingLedger>,
    pub checksum: Option<ChecksumType>,
    pub streams: Option<u32>,
    pub ledger_dir: Option<PathBuf>,
}

impl RunSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            on_existing_ledger: config.on_existing_ledger,
            checksum: config.checksum,
            streams: config.streams,
            dir_mode: config.dir_mode,
            ledger_dir: config
                .ledger_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn with_overrides(mut self, o: &Overrides) -> Self {
        if let Some(v) = o.on_existing_ledger {
            self.on_existing_ledger = v;
        }
        if let Some(v) = o.checksum {
            self.checksum = v;
        }
        if let Some(v) = o.streams {
            self.streams = v.max(1);
        }
        if let Some(v) = &o.ledger_dir {
            self.ledger_dir = v.clone();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<SyncConfig> {
        SyncConfig::parse(text, Path::new("test.json"))
    }

    #[test]
    fn test_minimal_config_defaults() {
        let c = parse(
            r#"{"srcBaseDir": "/data", "destEndpoint": "file://", "destBaseDir": "/backup",
                "srcItems": ["run1", "run2"]}"#,
        )
        .unwrap();
        assert_eq!(c.on_existing_ledger, OnExistingLedger::Resume);
        assert_eq!(c.checksum, ChecksumType::Adler32);
        assert_eq!(c.streams, 2);
        assert_eq!(c.dir_mode, 0o755);
        let units = c.units();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].remote_dir(), "file:///backup/run2");
    }

    #[test]
    fn test_optional_fields() {
        let c = parse(
            r#"{"srcBaseDir": "/d", "destEndpoint": "file://", "destBaseDir": "/b", "srcItems": ["x"],
                "onExistingLedger": "fail", "checksum": "md5", "streams": 4, "dirMode": "0750",
                "ledgerDir": "/var/lib/gridsync"}"#,
        )
        .unwrap();
        assert_eq!(c.on_existing_ledger, OnExistingLedger::Fail);
        assert_eq!(c.checksum, ChecksumType::Md5);
        assert_eq!(c.streams, 4);
        assert_eq!(c.dir_mode, 0o750);
        assert_eq!(c.ledger_dir.as_deref(), Some(Path::new("/var/lib/gridsync")));

        let c = parse(
            r#"{"srcBaseDir": "/d", "destEndpoint": "", "destBaseDir": "/b", "srcItems": [], "dirMode": 700}"#,
        )
        .unwrap();
        assert_eq!(c.dir_mode, 0o700);
    }

    #[test]
    fn test_missing_field_is_named() {
        let err = parse(r#"{"srcBaseDir": "/d", "destEndpoint": "file://", "srcItems": []}"#)
            .unwrap_err();
        match err {
            SyncError::MissingField { field, .. } => assert_eq!(field, "destBaseDir"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(err_text(r#"{"srcBaseDir": "/d", "destEndpoint": "x", "destBaseDir": "/b"}"#)
            .contains("srcItems"));
    }

    fn err_text(text: &str) -> String {
        parse(text).unwrap_err().to_string()
    }

    #[test]
    fn test_bad_json_and_values() {
        assert!(matches!(parse("{"), Err(SyncError::ConfigParse { .. })));
        assert!(matches!(
            parse(r#"{"srcBaseDir": "/d", "destEndpoint": "x", "destBaseDir": "/b", "srcItems": "run1"}"#),
            Err(SyncError::ConfigParse { .. })
        ));
        assert!(matches!(
            parse(r#"{"srcBaseDir": "/d", "destEndpoint": "x", "destBaseDir": "/b", "srcItems": [""]}"#),
            Err(SyncError::Config(_))
        ));
        assert!(parse(
            r#"{"srcBaseDir": "/d", "destEndpoint": "x", "destBaseDir": "/b", "srcItems": [], "dirMode": "999"}"#
        )
        .is_err());
    }

    #[test]
    fn test_overrides_win() {
        let base = RunSettings::default();
        let o = Overrides {
            on_existing_ledger: Some(OnExistingLedger::Reinit),
            streams: Some(0),
            ..Default::default()
        };
        let s = base.with_overrides(&o);
        assert_eq!(s.on_existing_ledger, OnExistingLedger::Reinit);
        assert_eq!(s.streams, 1);
        assert_eq!(s.checksum, ChecksumType::Adler32);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755").unwrap(), 0o755);
        assert_eq!(parse_mode("0o2775").unwrap(), 0o2775);
        assert!(parse_mode("rwx").is_err());
    }
}
