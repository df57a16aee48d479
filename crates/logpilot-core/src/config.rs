//! Engine configuration from environment variables.
//!
//! All knobs are read once at startup; the engine never re-reads the
//! environment while running. `NODE_NAME` and the shipper output block are
//! captured here so the rest of the crate treats them as immutable.

use crate::error::{PilotError, Result};
use std::env;

pub const ENV_PILOT_LOG_PREFIX: &str = "PILOT_LOG_PREFIX";
pub const ENV_PILOT_TYPE: &str = "PILOT_TYPE";
pub const ENV_PILOT_CREATE_SYMLINK: &str = "PILOT_CREATE_SYMLINK";
pub const ENV_FLUENTD_OUTPUT: &str = "FLUENTD_OUTPUT";
pub const ENV_FILEBEAT_OUTPUT: &str = "FILEBEAT_OUTPUT";
pub const ENV_NODE_NAME: &str = "NODE_NAME";

const DEFAULT_LOG_PREFIX: &str = "aliyun";

/// The two shipper strategies.
///
/// `Filebeat` streams per-file; `Fluentd` batches and needs a flush grace
/// period before per-container config teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipperKind {
    Filebeat,
    Fluentd,
}

impl ShipperKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ShipperKind::Filebeat => "filebeat",
            ShipperKind::Fluentd => "fluentd",
        }
    }
}

/// Runtime settings for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Label/env prefixes the engine interprets, e.g. `aliyun` matches
    /// `aliyun.logs.*` labels and `aliyun_logs_*` environment entries.
    pub log_prefixes: Vec<String>,
    /// Which shipper variant to control.
    pub shipper: ShipperKind,
    /// Whether to maintain the per-container volume symlink tree.
    pub create_symlink: bool,
    /// Kubernetes node name, exposed as `k8s_node_name` in descriptors.
    pub node_name: String,
    /// Opaque output block handed to the operator template, taken from
    /// `FLUENTD_OUTPUT` or `FILEBEAT_OUTPUT` depending on the variant.
    pub output: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_prefixes: vec![DEFAULT_LOG_PREFIX.to_string()],
            shipper: ShipperKind::Filebeat,
            create_symlink: false,
            node_name: String::new(),
            output: String::new(),
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let log_prefixes = env::var(ENV_PILOT_LOG_PREFIX)
            .ok()
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec![DEFAULT_LOG_PREFIX.to_string()]);

        let shipper = if env::var(ENV_PILOT_TYPE).is_ok_and(|val| val == ShipperKind::Fluentd.as_str())
        {
            ShipperKind::Fluentd
        } else {
            ShipperKind::Filebeat
        };

        let create_symlink = env::var(ENV_PILOT_CREATE_SYMLINK).is_ok_and(|val| val == "true");

        let node_name = env::var(ENV_NODE_NAME).unwrap_or_default();

        let output_var = match shipper {
            ShipperKind::Fluentd => ENV_FLUENTD_OUTPUT,
            ShipperKind::Filebeat => ENV_FILEBEAT_OUTPUT,
        };
        let output = env::var(output_var).unwrap_or_default();

        let settings = Self {
            log_prefixes,
            shipper,
            create_symlink,
            node_name,
            output,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if self.log_prefixes.is_empty() {
            return Err(PilotError::InvalidConfig(
                "at least one log prefix is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.log_prefixes, vec!["aliyun".to_string()]);
        assert_eq!(settings.shipper, ShipperKind::Filebeat);
        assert!(!settings.create_symlink);
    }

    #[test]
    fn test_validate_empty_prefixes() {
        let settings = Settings {
            log_prefixes: vec![],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_shipper_kind_names() {
        assert_eq!(ShipperKind::Filebeat.as_str(), "filebeat");
        assert_eq!(ShipperKind::Fluentd.as_str(), "fluentd");
    }
}
