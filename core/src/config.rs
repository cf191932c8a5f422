//! Launch configuration loading and validation
//!
//! A [`LaunchConfig`] holds the fixed part of a launcher's setup: the identity
//! the child runs as and the directory it starts in. It can be written as TOML
//! or JSON:
//!
//! ```toml
//! uid = 1000
//! gid = 1000
//! workingDirectory = "/srv/app"
//! ```

use crate::process::Identity;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Identity and working directory for launched children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    /// User id the child runs as
    pub uid: u32,
    /// Primary group id the child runs as
    pub gid: u32,
    /// Directory the child is started in
    pub working_directory: PathBuf,
}

impl LaunchConfig {
    pub fn new(uid: u32, gid: u32, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            uid,
            gid,
            working_directory: working_directory.into(),
        }
    }

    /// Configuration that launches as the calling user
    pub fn for_current_user(working_directory: impl Into<PathBuf>) -> Self {
        let me = Identity::current();
        Self::new(me.uid, me.gid, working_directory)
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.uid, self.gid)
    }

    /// Validate the configuration and return `Result<()>` with field-path errors
    ///
    /// A launcher built by hand accepts any directory and fails at spawn time;
    /// loaded configuration is held to a stricter standard.
    pub fn validate(&self) -> Result<()> {
        if self.working_directory.as_os_str().is_empty() {
            return Err(CoreError::ValidationError(
                "workingDirectory: cannot be empty".to_string(),
            ));
        }
        if !self.working_directory.is_absolute() {
            return Err(CoreError::ValidationError(format!(
                "workingDirectory: must be an absolute path, got {:?}",
                self.working_directory
            )));
        }
        Ok(())
    }
}

/// Load a launch config from a TOML string
pub fn load_launch_config_from_toml_str(input: &str) -> Result<LaunchConfig> {
    let cfg: LaunchConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load a launch config from a JSON string
pub fn load_launch_config_from_json_str(input: &str) -> Result<LaunchConfig> {
    let cfg: LaunchConfig = serde_json::from_str(input)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load a launch config from a file, picking the format by extension
///
/// `.json` files are parsed as JSON; anything else is parsed as TOML.
pub fn load_launch_config_from_path(path: impl AsRef<Path>) -> Result<LaunchConfig> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path, e))
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    debug!(
        "Loading launch config from {:?} as {}",
        path,
        if is_json { "JSON" } else { "TOML" }
    );

    if is_json {
        load_launch_config_from_json_str(&data)
    } else {
        load_launch_config_from_toml_str(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_and_validates_toml() {
        let cfg = load_launch_config_from_toml_str(
            r#"
            uid = 1000
            gid = 1001
            workingDirectory = "/srv/app"
            "#,
        )
        .expect("should parse");
        assert_eq!(cfg, LaunchConfig::new(1000, 1001, "/srv/app"));
        assert_eq!(cfg.identity(), Identity::new(1000, 1001));
    }

    #[test]
    fn parses_json() {
        let cfg = load_launch_config_from_json_str(
            r#"{"uid": 0, "gid": 0, "workingDirectory": "/"}"#,
        )
        .expect("should parse");
        assert_eq!(cfg.working_directory, PathBuf::from("/"));
    }

    #[test]
    fn json_parse_errors_are_serialization_errors() {
        let err = load_launch_config_from_json_str(r#"{"uid": 0, "gid": "#).unwrap_err();
        assert!(matches!(err, CoreError::SerializationError(_)));
        assert_eq!(err.code(), "CORE007");
    }

    #[test]
    fn errors_on_missing_field() {
        let err = load_launch_config_from_toml_str("uid = 1\nworkingDirectory = \"/\"").unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
        assert!(err.to_string().contains("gid"));
    }

    #[test]
    fn errors_on_negative_uid() {
        let err = load_launch_config_from_toml_str(
            "uid = -1\ngid = 0\nworkingDirectory = \"/\"",
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
    }

    #[test]
    fn errors_on_empty_working_directory() {
        let err = load_launch_config_from_toml_str("uid = 0\ngid = 0\nworkingDirectory = \"\"")
            .unwrap_err();
        assert!(format!("{}", err).contains("workingDirectory: cannot be empty"));
    }

    #[test]
    fn errors_on_relative_working_directory() {
        let err = load_launch_config_from_json_str(
            r#"{"uid": 0, "gid": 0, "workingDirectory": "srv/app"}"#,
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("must be an absolute path"));
    }

    #[test]
    fn loads_from_path_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");

        let toml_path = dir.path().join("launch.toml");
        let mut f = fs::File::create(&toml_path).expect("create toml");
        writeln!(f, "uid = 5\ngid = 6\nworkingDirectory = \"/tmp\"").expect("write toml");
        let cfg = load_launch_config_from_path(&toml_path).expect("load toml");
        assert_eq!(cfg, LaunchConfig::new(5, 6, "/tmp"));

        let json_path = dir.path().join("launch.JSON");
        fs::write(&json_path, r#"{"uid": 7, "gid": 8, "workingDirectory": "/var"}"#)
            .expect("write json");
        let cfg = load_launch_config_from_path(&json_path).expect("load json");
        assert_eq!(cfg, LaunchConfig::new(7, 8, "/var"));
    }

    #[test]
    fn errors_on_unreadable_path() {
        let err = load_launch_config_from_path("/nonexistent/castoff/launch.toml").unwrap_err();
        assert!(format!("{}", err).contains("Failed to read config"));
    }

    #[test]
    fn current_user_config_matches_process_ids() {
        let cfg = LaunchConfig::for_current_user("/");
        assert_eq!(cfg.identity(), Identity::current());
        assert!(cfg.validate().is_ok());
    }
}
