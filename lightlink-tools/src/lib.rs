use clap::Parser;
use lightlink::link::util;
use lightlink::Connection;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection profile read from a YAML file. Command line options win over
/// the profile.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Seconds to wait for the device.
    pub wait: Option<u64>,
}

#[derive(Debug)]
pub enum ProfileError {
    IO(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileError::IO(err) => write!(f, "cannot read profile: {}", err),
            ProfileError::Yaml(err) => write!(f, "invalid profile: {}", err),
        }
    }
}

impl Profile {
    pub fn parse(text: &str) -> Result<Profile, ProfileError> {
        serde_yaml::from_str(text).map_err(ProfileError::Yaml)
    }

    pub fn load(path: &Path) -> Result<Profile, ProfileError> {
        let text = std::fs::read_to_string(path).map_err(ProfileError::IO)?;
        Profile::parse(&text)
    }
}

pub static DEFAULT_WAIT_SECS: u64 = 5;

#[derive(Parser, Debug, Clone)]
pub struct PanelOpts {
    /// Device host name or address (default: $LIGHTLINK_HOST or ailight.local)
    #[arg(short = 'H', long = "host", global = true)]
    pub host: Option<String>,

    /// Device web server port
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// YAML profile with host, port and wait
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the device
    #[arg(short = 'w', long = "wait", global = true)]
    pub wait: Option<u64>,

    /// Do not ask before restart or reset
    #[arg(short = 'y', long = "yes", global = true)]
    pub yes: bool,

    /// More log output, repeat for debug
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl PanelOpts {
    pub fn profile(&self) -> Result<Profile, ProfileError> {
        match &self.config {
            Some(path) => Profile::load(path),
            None => Ok(Profile::default()),
        }
    }

    /// Host and port, from the options, then the profile, then defaults.
    pub fn target(&self, profile: &Profile) -> (String, u16) {
        let host = self
            .host
            .clone()
            .or_else(|| profile.host.clone())
            .unwrap_or_else(util::default_host);
        let port = self
            .port
            .or(profile.port)
            .unwrap_or(util::DEFAULT_HTTP_PORT);
        (host, port)
    }

    pub fn wait(&self, profile: &Profile) -> Duration {
        Duration::from_secs(self.wait.or(profile.wait).unwrap_or(DEFAULT_WAIT_SECS))
    }

    pub fn connection(&self, profile: &Profile) -> Connection {
        let (host, port) = self.target(profile);
        Connection::new(&host, port)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    }

    /// Sets up `simple_logger`; `RUST_LOG` overrides the verbosity flags.
    pub fn init_logging(&self) {
        if let Err(err) = simple_logger::SimpleLogger::new()
            .with_level(self.log_level())
            .env()
            .init()
        {
            eprintln!("logger: {}", err);
        }
    }
}

/// Splits `field=value`. The value may itself contain `=`.
pub fn parse_assignment(arg: &str) -> Option<(&str, &str)> {
    match arg.split_once('=') {
        Some((field, value)) if !field.is_empty() => Some((field, value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(args: &[&str]) -> PanelOpts {
        PanelOpts::parse_from(std::iter::once("light-panel").chain(args.iter().copied()))
    }

    #[test]
    fn options_override_profile() {
        let profile = Profile::parse("host: kitchen.local\nport: 8080\nwait: 2\n").unwrap();
        assert_eq!(
            opts(&[]).target(&profile),
            ("kitchen.local".to_string(), 8080)
        );
        assert_eq!(
            opts(&["--host", "10.0.0.9"]).target(&profile),
            ("10.0.0.9".to_string(), 8080)
        );
        assert_eq!(opts(&["-w", "7"]).wait(&profile), Duration::from_secs(7));
        assert_eq!(opts(&[]).wait(&profile), Duration::from_secs(2));
    }

    #[test]
    fn partial_profile() {
        let profile = Profile::parse("port: 81\n").unwrap();
        assert_eq!(profile.host, None);
        assert_eq!(opts(&[]).target(&profile).1, 81);
        assert!(Profile::parse("port: [1, 2]").is_err());
    }

    #[test]
    fn verbosity() {
        assert_eq!(opts(&[]).log_level(), log::LevelFilter::Warn);
        assert_eq!(opts(&["-vv"]).log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn assignments() {
        assert_eq!(parse_assignment("hostname=light"), Some(("hostname", "light")));
        assert_eq!(parse_assignment("mqtt_password=a=b"), Some(("mqtt_password", "a=b")));
        assert_eq!(parse_assignment("wifi_psk="), Some(("wifi_psk", "")));
        assert_eq!(parse_assignment("=x"), None);
        assert_eq!(parse_assignment("nothing"), None);
    }
}
