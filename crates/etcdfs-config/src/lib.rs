mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Invalid endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),

    #[error("Invalid base directory '{0}': {1}")]
    InvalidBaseDir(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EtcdFsConfig {
    /// Parse a configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;

        // An empty document means "all defaults"
        if interpolated.trim().is_empty() {
            return Ok(EtcdFsConfig::default());
        }

        let config: EtcdFsConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
endpoint: http://etcd.internal:2379
"#;

        let config = EtcdFsConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.endpoint, "http://etcd.internal:2379");
        assert_eq!(config.base_dir, "/");
        assert_eq!(config.mount, MountConfig::default());
    }

    #[test]
    fn test_parse_empty_config() {
        let config = EtcdFsConfig::from_yaml("").unwrap();
        assert_eq!(config, EtcdFsConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
endpoint: https://10.0.0.1:2379
base_dir: /apps/web
timeout: 3s
mount:
  uid: 1000
  gid: 100
  mode: "0640"
  write_mode: compare_and_swap
  allow_other: true
  auto_unmount: false
"#;

        let config = EtcdFsConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.base_dir, "/apps/web");
        assert_eq!(
            config.timeout.as_ref().map(|t| t.as_duration()),
            Some(Duration::from_secs(3))
        );
        assert_eq!(config.mount.uid, Some(1000));
        assert_eq!(config.mount.gid, Some(100));
        assert_eq!(config.mount.mode, FileMode(0o640));
        assert_eq!(config.mount.write_mode, WriteMode::CompareAndSwap);
        assert!(config.mount.allow_other);
        assert!(!config.mount.auto_unmount);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("ETCDFS_TEST_BASE_DIR", "/services/api");

        let yaml = r#"
base_dir: ${ETCDFS_TEST_BASE_DIR}
"#;

        let config = EtcdFsConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.base_dir, "/services/api");
    }

    #[test]
    fn test_parse_rejects_bad_mode() {
        let yaml = r#"
mount:
  mode: "rwxr-xr-x"
"#;
        assert!(matches!(
            EtcdFsConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_dir: /from/file").unwrap();

        let config = EtcdFsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.base_dir, "/from/file");
    }

    #[test]
    fn test_from_missing_file() {
        let err = EtcdFsConfig::from_file(Path::new("/nonexistent/etcdfs.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
