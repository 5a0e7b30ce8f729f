use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default etcd client endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:2379";

/// Default store directory mounted as the filesystem root.
pub const DEFAULT_BASE_DIR: &str = "/";

/// Default permission bits applied to every file.
pub const DEFAULT_FILE_MODE: u16 = 0o644;

/// Top-level etcdfs configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtcdFsConfig {
    /// etcd client URL (scheme, host and port).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Store directory used as the filesystem root.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// Per-request timeout for the store client. No timeout when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<HumanDuration>,

    /// Mount options.
    #[serde(default)]
    pub mount: MountConfig,
}

impl Default for EtcdFsConfig {
    fn default() -> Self {
        EtcdFsConfig {
            endpoint: default_endpoint(),
            base_dir: default_base_dir(),
            timeout: None,
            mount: MountConfig::default(),
        }
    }
}

/// How offset writes and truncation publish the recomputed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Write back unconditionally; concurrent writers may lose updates.
    #[default]
    LastWriterWins,
    /// Condition the write on the version that was read.
    CompareAndSwap,
}

/// Mount configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Owner uid reported for every entry. Defaults to the process uid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,

    /// Owner gid reported for every entry. Defaults to the process gid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,

    /// Permission bits applied to every file and directory.
    #[serde(default)]
    pub mode: FileMode,

    #[serde(default)]
    pub write_mode: WriteMode,

    /// Pass `allow_other` to the FUSE mount.
    #[serde(default)]
    pub allow_other: bool,

    /// Unmount automatically when the process exits.
    #[serde(default = "default_true")]
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            uid: None,
            gid: None,
            mode: FileMode::default(),
            write_mode: WriteMode::default(),
            allow_other: false,
            auto_unmount: true,
        }
    }
}

/// Unix permission bits written in octal digits (e.g., "644", "0640").
///
/// Integers in YAML are read by their digits, so `mode: 644` and
/// `mode: "644"` are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u16);

impl Default for FileMode {
    fn default() -> Self {
        FileMode(DEFAULT_FILE_MODE)
    }
}

impl FileMode {
    pub fn bits(&self) -> u16 {
        self.0
    }
}

impl FromStr for FileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0o")
            .or_else(|| s.strip_prefix("0O"))
            .unwrap_or(s);

        if digits.is_empty() {
            return Err("Empty file mode".to_string());
        }

        let bits = u32::from_str_radix(digits, 8)
            .map_err(|_| format!("Invalid octal file mode: {}", s))?;
        if bits > 0o7777 {
            return Err(format!("File mode out of range: {}", s));
        }

        Ok(FileMode(bits as u16))
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl Serialize for FileMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawMode {
            Digits(u64),
            Text(String),
        }

        let text = match RawMode::deserialize(deserializer)? {
            RawMode::Digits(n) => n.to_string(),
            RawMode::Text(s) => s,
        };
        FileMode::from_str(&text).map_err(serde::de::Error::custom)
    }
}

/// Human-readable duration (e.g., "200ms", "5s", "1m").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl HumanDuration {
    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
            (n, "ms")
        } else if let Some(n) = s.strip_suffix('s') {
            (n, "s")
        } else if let Some(n) = s.strip_suffix('m') {
            (n, "m")
        } else if let Some(n) = s.strip_suffix('h') {
            (n, "h")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => std::time::Duration::from_millis(num),
            "s" => std::time::Duration::from_secs(num),
            "m" => std::time::Duration::from_secs(num * 60),
            _ => std::time::Duration::from_secs(num * 3600),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let secs = self.0.as_secs();

        if millis % 1000 != 0 {
            write!(f, "{}ms", millis)
        } else if secs % 3600 == 0 && secs > 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs % 60 == 0 && secs > 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_base_dir() -> String {
    DEFAULT_BASE_DIR.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_file_mode_parse() {
        assert_eq!(FileMode::from_str("644").unwrap(), FileMode(0o644));
        assert_eq!(FileMode::from_str("0640").unwrap(), FileMode(0o640));
        assert_eq!(FileMode::from_str("0o600").unwrap(), FileMode(0o600));
        assert_eq!(FileMode::from_str(" 755 ").unwrap(), FileMode(0o755));
    }

    #[test]
    fn test_file_mode_rejects_bad_input() {
        assert!(FileMode::from_str("").is_err());
        assert!(FileMode::from_str("689").is_err());
        assert!(FileMode::from_str("rw-r--r--").is_err());
        assert!(FileMode::from_str("17777").is_err());
    }

    #[test]
    fn test_file_mode_display() {
        assert_eq!(FileMode(0o644).to_string(), "0644");
        assert_eq!(FileMode(0o4755).to_string(), "4755");
    }

    #[test]
    fn test_file_mode_yaml_integer_is_octal_digits() {
        let mode: FileMode = serde_yaml::from_str("640").unwrap();
        assert_eq!(mode, FileMode(0o640));
        let mode: FileMode = serde_yaml::from_str("\"0600\"").unwrap();
        assert_eq!(mode, FileMode(0o600));
    }

    #[test]
    fn test_human_duration_parse() {
        assert_eq!(
            HumanDuration::from_str("250ms").unwrap().as_duration(),
            Duration::from_millis(250)
        );
        assert_eq!(
            HumanDuration::from_str("5s").unwrap().as_duration(),
            Duration::from_secs(5)
        );
        assert_eq!(
            HumanDuration::from_str("2m").unwrap().as_duration(),
            Duration::from_secs(120)
        );
        assert!(HumanDuration::from_str("soon").is_err());
        assert!(HumanDuration::from_str("5").is_err());
    }

    #[test]
    fn test_human_duration_display() {
        assert_eq!(HumanDuration(Duration::from_millis(1500)).to_string(), "1500ms");
        assert_eq!(HumanDuration(Duration::from_secs(5)).to_string(), "5s");
        assert_eq!(HumanDuration(Duration::from_secs(120)).to_string(), "2m");
        assert_eq!(HumanDuration(Duration::from_secs(7200)).to_string(), "2h");
    }

    #[test]
    fn test_write_mode_serde() {
        let mode: WriteMode = serde_yaml::from_str("compare_and_swap").unwrap();
        assert_eq!(mode, WriteMode::CompareAndSwap);
        let mode: WriteMode = serde_yaml::from_str("last_writer_wins").unwrap();
        assert_eq!(mode, WriteMode::LastWriterWins);
    }

    #[test]
    fn test_defaults() {
        let config = EtcdFsConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.base_dir, "/");
        assert!(config.timeout.is_none());
        assert_eq!(config.mount.mode, FileMode(0o644));
        assert_eq!(config.mount.write_mode, WriteMode::LastWriterWins);
        assert!(config.mount.auto_unmount);
        assert!(!config.mount.allow_other);
    }
}
