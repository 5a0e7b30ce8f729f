use url::Url;

use crate::types::EtcdFsConfig;
use crate::ConfigError;

impl EtcdFsConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        match Url::parse(&self.endpoint) {
            Ok(url) if url.scheme() != "http" && url.scheme() != "https" => {
                errors.push(ConfigError::InvalidEndpoint(
                    self.endpoint.clone(),
                    format!("Unsupported scheme '{}', expected http or https", url.scheme()),
                ));
            }
            Ok(url) if url.host_str().map_or(true, str::is_empty) => {
                errors.push(ConfigError::InvalidEndpoint(
                    self.endpoint.clone(),
                    "Endpoint has no host".to_string(),
                ));
            }
            Ok(_) => {}
            Err(e) => {
                errors.push(ConfigError::InvalidEndpoint(
                    self.endpoint.clone(),
                    format!("{}, expected a URL such as http://127.0.0.1:2379", e),
                ));
            }
        }

        if !self.base_dir.starts_with('/') {
            errors.push(ConfigError::InvalidBaseDir(
                self.base_dir.clone(),
                "Base directory must start with '/'".to_string(),
            ));
        }

        if let Some(timeout) = &self.timeout {
            if timeout.as_duration().is_zero() {
                errors.push(ConfigError::InvalidConfig(
                    "timeout must be greater than zero".to_string(),
                ));
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
