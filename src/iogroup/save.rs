//! Control snapshots for save/restore
//!
//! A snapshot is a JSON array of `{name, domain, domain_idx, setting}`
//! records, one per restorable control instance.

use crate::error::{AppError, ConfigError, PlatformError};
use crate::topo::Domain;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One saved control instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSetting {
    pub name: String,
    pub domain: Domain,
    pub domain_idx: usize,
    pub setting: f64,
}

/// Anything that can replay a control write
pub trait ControlWriter {
    fn write_control(
        &mut self,
        name: &str,
        domain: Domain,
        domain_idx: usize,
        setting: f64,
    ) -> Result<(), PlatformError>;
}

/// Snapshot of control settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaveControl {
    settings: Vec<ControlSetting>,
}

impl SaveControl {
    pub fn new(settings: Vec<ControlSetting>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &[ControlSetting] {
        &self.settings
    }

    /// Parse a snapshot from JSON text
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize as pretty JSON
    pub fn json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot to `path`
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), AppError> {
        std::fs::write(path, self.json()?)?;
        Ok(())
    }

    /// Load a snapshot from `path`
    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_json(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Replay every record in order
    ///
    /// All records are attempted; the first failure is returned afterwards.
    pub fn restore<W: ControlWriter + ?Sized>(&self, target: &mut W) -> Result<(), PlatformError> {
        let mut first_error = None;
        for s in &self.settings {
            if let Err(e) = target.write_control(&s.name, s.domain, s.domain_idx, s.setting) {
                log::warn!(
                    "Failed to restore {} {} {} = {}: {}",
                    s.name,
                    s.domain,
                    s.domain_idx,
                    s.setting,
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HardwareError;

    #[derive(Default)]
    struct Recorder {
        writes: Vec<(String, Domain, usize, f64)>,
    }

    impl ControlWriter for Recorder {
        fn write_control(
            &mut self,
            name: &str,
            domain: Domain,
            domain_idx: usize,
            setting: f64,
        ) -> Result<(), PlatformError> {
            if name == "BROKEN" {
                return Err(HardwareError::NotSupported(name.to_string()).into());
            }
            self.writes.push((name.to_string(), domain, domain_idx, setting));
            Ok(())
        }
    }

    fn snapshot() -> SaveControl {
        SaveControl::new(vec![
            ControlSetting {
                name: "NVML::GPU_CORE_FREQUENCY_RESET_CONTROL".into(),
                domain: Domain::Gpu,
                domain_idx: 0,
                setting: 0.0,
            },
            ControlSetting {
                name: "NVML::GPU_POWER_LIMIT_CONTROL".into(),
                domain: Domain::Gpu,
                domain_idx: 0,
                setting: 250.0,
            },
        ])
    }

    #[test]
    fn test_json_layout() {
        let json = snapshot().json().unwrap();
        assert!(json.trim_start().starts_with('['));
        assert!(json.contains("\"domain\": \"gpu\""));
        assert_eq!(SaveControl::from_json(&json).unwrap(), snapshot());
    }

    #[test]
    fn test_file_round_trip_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save.json");
        snapshot().write_json(&path).unwrap();

        let loaded = SaveControl::read_json(&path).unwrap();
        let mut recorder = Recorder::default();
        loaded.restore(&mut recorder).unwrap();
        assert_eq!(recorder.writes.len(), 2);
        assert_eq!(recorder.writes[1].3, 250.0);
    }

    #[test]
    fn test_restore_continues_after_failure() {
        let mut settings = snapshot().settings().to_vec();
        settings.insert(
            0,
            ControlSetting {
                name: "BROKEN".into(),
                domain: Domain::Board,
                domain_idx: 0,
                setting: 1.0,
            },
        );
        let mut recorder = Recorder::default();
        assert!(SaveControl::new(settings).restore(&mut recorder).is_err());
        assert_eq!(recorder.writes.len(), 2);
    }

    #[test]
    fn test_read_missing_file() {
        let err = SaveControl::read_json("/nonexistent/save.json").unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::FileNotFound(_))));
    }
}
