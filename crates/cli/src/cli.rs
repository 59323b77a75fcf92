use clap::builder::{OsStringValueParser, TypedValueParser};
use clap::{Args, Parser};
use clap_verbosity_flag::{InfoLevel, Verbosity, WarnLevel};
use config::Config;
use guard::MAX_PATTERN_LEN;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use tracing::trace;

const CONFIG_FILE: &str = "/etc/amguard/config.toml";
const CONFIG_DROP_INS: &str = "/etc/amguard/config.d/*.toml";

/// amguardd: pattern based malware filter for a mount point
///
/// amguardd keeps a database of byte patterns and refuses opens of files
/// under the mount point whose content contains any of them. The database is
/// administered at runtime with amguardctl.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// If not provided, the default locations are checked. They are
    /// `/etc/amguard/config.toml` and `/etc/amguard/config.d/*.toml`,
    /// where the latter being a glob pattern. If they don't exist, the default
    /// configuration is used.
    #[arg(short, long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    /// Pattern database to use instead of the configured one.
    ///
    /// A relative path is taken relative to the mount point.
    #[arg(short, long)]
    pub pattern_db: Option<PathBuf>,

    /// Only manage the pattern database, do not intercept file access.
    #[arg(long)]
    pub no_intercept: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Mount point to guard.
    #[arg(value_parser = validate_dir)]
    pub mount_point: PathBuf,
}

impl Cli {
    /// Apply command line overrides to `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.pattern_db {
            config.database.path = path.clone();
        }
        if self.no_intercept {
            config.intercept.enabled = false;
        }
    }
}

/// amguardctl: administer the pattern database of a running amguardd
#[derive(Debug, Parser, Clone)]
#[command(about, version)]
pub struct CtlCli {
    #[command(flatten)]
    pub action: Action,

    /// Directory holding the control sockets. Defaults to the configured one.
    #[arg(long)]
    pub runtime_dir: Option<PathBuf>,

    /// Path to configuration file, used to find the runtime directory.
    #[arg(short, long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Mount point the daemon guards.
    #[arg(value_parser = validate_dir)]
    pub mount_point: PathBuf,
}

#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub struct Action {
    /// List all patterns, one per line.
    #[arg(short, long)]
    pub list: bool,

    /// Add a pattern. Any bytes but a newline are allowed.
    #[arg(short, long, value_name = "PATTERN", value_parser = pattern_parser())]
    pub add: Option<PatternArg>,

    /// Remove a pattern.
    #[arg(short, long, value_name = "PATTERN", value_parser = pattern_parser())]
    pub remove: Option<PatternArg>,
}

/// Pattern bytes given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternArg(pub Vec<u8>);

/// Configuration from `path`, or from the default locations.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => {
            let mut candidates = glob::glob(CONFIG_DROP_INS)?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            candidates.sort();
            candidates.insert(0, CONFIG_FILE.into());
            trace!(?candidates, "config file candidates");
            Config::load_multiple(candidates)?
        }
    };
    Ok(config)
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

/// Check if the directory exists.
#[inline(always)]
fn validate_dir(dir: &str) -> Result<PathBuf, String> {
    let path = Path::new(dir);
    if path.is_dir() {
        Ok(path.to_owned())
    } else {
        Err(format!("Not a directory: {:?}", path))
    }
}

fn pattern_parser() -> impl TypedValueParser<Value = PatternArg> + Clone {
    OsStringValueParser::new().try_map(validate_pattern)
}

/// Validate a pattern before anything is sent to the daemon.
#[inline(always)]
fn validate_pattern(pattern: OsString) -> Result<PatternArg, String> {
    let bytes = pattern.into_vec();
    match bytes.len() {
        0 => Err("pattern must not be empty".to_string()),
        len if len > MAX_PATTERN_LEN => Err(format!(
            "pattern is {len} bytes long, at most {MAX_PATTERN_LEN} are allowed"
        )),
        _ if bytes.contains(&b'\n') => Err("pattern must not contain a newline".to_string()),
        _ => Ok(PatternArg(bytes)),
    }
}
