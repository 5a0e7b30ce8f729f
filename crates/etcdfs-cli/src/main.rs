use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use etcdfs_config::{EtcdFsConfig, FileMode, WriteMode};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod errors;

#[derive(Parser, Debug)]
#[command(name = "etcdfs", version, about = "Mount an etcd keyspace as a filesystem")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log every filesystem operation
    #[arg(short, long)]
    verbose: bool,

    /// Also log FUSE protocol traffic
    #[arg(short, long)]
    debug: bool,

    /// Stay in the foreground instead of detaching
    #[arg(short, long)]
    foreground: bool,

    /// etcd endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// etcd directory to mount
    #[arg(long = "basedir")]
    base_dir: Option<String>,

    /// Owner uid reported for every entry
    #[arg(long)]
    uid: Option<u32>,

    /// Owner gid reported for every entry
    #[arg(long)]
    gid: Option<u32>,

    /// Permission bits for files, in octal
    #[arg(long)]
    mode: Option<FileMode>,

    /// Fail concurrent partial writes with ESTALE instead of losing updates
    #[arg(long)]
    compare_and_swap: bool,

    /// Where to mount
    mount_point: PathBuf,
}

/// Default log directives when `RUST_LOG` is not set.
fn default_directives(verbose: bool, debug: bool) -> String {
    let level = if verbose || debug { "debug" } else { "info" };
    let mut directives = format!(
        "warn,etcdfs={level},etcdfs_fuse={level},etcdfs_backends={level},etcdfs_config={level}"
    );
    if debug {
        directives.push_str(",fuser=debug");
    }
    directives
}

fn init_logging(verbose: bool, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, debug)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Load the config file (or defaults) and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<EtcdFsConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => EtcdFsConfig::from_file(path)?,
        None => EtcdFsConfig::default(),
    };

    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(base_dir) = &cli.base_dir {
        config.base_dir = base_dir.clone();
    }
    if let Some(uid) = cli.uid {
        config.mount.uid = Some(uid);
    }
    if let Some(gid) = cli.gid {
        config.mount.gid = Some(gid);
    }
    if let Some(mode) = cli.mode {
        config.mount.mode = mode;
    }
    if cli.compare_and_swap {
        config.mount.write_mode = WriteMode::CompareAndSwap;
    }

    config.validate_or_err()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    info!("etcdfs {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;
    let args = commands::mount::MountArgs {
        mountpoint: cli.mount_point,
        foreground: cli.foreground,
    };
    commands::mount::run(config, args)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(err.exit_code().clamp(0, 255) as u8);
        }
    };

    init_logging(cli.verbose, cli.debug);

    if let Err(e) = run(cli) {
        errors::print_error(e.as_ref());
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("etcdfs").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_flags() {
        let cli = parse(&[
            "-v",
            "-f",
            "--endpoint",
            "http://etcd:2379",
            "--basedir",
            "/apps",
            "--mode",
            "600",
            "--compare-and-swap",
            "/mnt/etcd",
        ]);
        assert!(cli.verbose);
        assert!(cli.foreground);
        assert!(!cli.debug);
        assert_eq!(cli.endpoint.as_deref(), Some("http://etcd:2379"));
        assert_eq!(cli.base_dir.as_deref(), Some("/apps"));
        assert_eq!(cli.mode, Some(FileMode(0o600)));
        assert!(cli.compare_and_swap);
        assert_eq!(cli.mount_point, PathBuf::from("/mnt/etcd"));
    }

    #[test]
    fn test_detaches_by_default() {
        let cli = parse(&["/mnt/etcd"]);
        assert!(!cli.foreground);
        assert!(!cli.verbose);
        assert!(!cli.compare_and_swap);
    }

    #[test]
    fn test_mount_point_required() {
        assert!(Cli::try_parse_from(["etcdfs", "-v"]).is_err());
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(Cli::try_parse_from(["etcdfs", "--mode", "999", "/mnt"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "endpoint: http://from-file:2379\nbase_dir: /file\nmount:\n  uid: 10\n  mode: \"640\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let cli = parse(&["-c", path, "--basedir", "/flag", "--uid", "20", "/mnt"]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.endpoint, "http://from-file:2379");
        assert_eq!(config.base_dir, "/flag");
        assert_eq!(config.mount.uid, Some(20));
        assert_eq!(config.mount.mode, FileMode(0o640));
        assert_eq!(config.mount.write_mode, WriteMode::LastWriterWins);
    }

    #[test]
    fn test_invalid_override_fails_validation() {
        let cli = parse(&["--basedir", "relative", "/mnt"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_default_directives() {
        assert!(default_directives(false, false).contains("etcdfs_fuse=info"));
        assert!(default_directives(true, false).contains("etcdfs_fuse=debug"));
        assert!(!default_directives(true, false).contains("fuser"));
        assert!(default_directives(false, true).ends_with("fuser=debug"));
    }
}
