//! Configuration for the netfault harness.
//!
//! Supports command-line arguments and a configuration file (TOML, or JSON
//! when the file name ends in `.json`). CLI arguments take precedence over
//! file values, which take precedence over built-in defaults.

use crate::fault::Faults;
use crate::protocols::http::HttpFaults;
use crate::protocols::udp::DEFAULT_MAX_INFLIGHT;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TLS listeners default to the plain port plus this offset.
pub const TLS_PORT_OFFSET: u16 = 10000;

/// Command-line arguments for the harness
#[derive(Parser, Debug)]
#[command(name = "netfault")]
#[command(version)]
#[command(about = "Network fault-injection test server (TCP, UDP, HTTP, MQTT)", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Address to bind every listener to (default: 0.0.0.0)
    #[arg(long, global = true)]
    pub bind: Option<String>,

    /// PEM certificate chain for TLS listeners (default: cert.pem)
    #[arg(long, global = true)]
    pub cert: Option<PathBuf>,

    /// PEM private key for TLS listeners (default: key.pem)
    #[arg(long, global = true)]
    pub key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start every plain listener, UDP, and TLS listeners if a certificate loads
    ServeAll,
    /// Start every TLS listener plus UDP
    ServeAllTls,
    /// Start the TCP echo server
    Tcp(TcpArgs),
    /// Start the UDP echo server
    Udp(UdpArgs),
    /// Start the HTTP server
    Http(HttpArgs),
    /// Start the MQTT server
    Mqtt(MqttArgs),
    /// Print version
    Version,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct TcpArgs {
    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Wrap connections in TLS
    #[arg(long)]
    pub tls: bool,

    /// Delay before each echo (e.g. 200ms, 1.5s)
    #[arg(long, value_parser = parse_duration)]
    pub delay: Option<Duration>,

    /// Close every connection after this long without echoing
    #[arg(long, value_parser = parse_duration)]
    pub close_after: Option<Duration>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct UdpArgs {
    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Probability of dropping a datagram (0.0 - 1.0)
    #[arg(long)]
    pub drop_rate: Option<f64>,

    /// Delay before each reply
    #[arg(long, value_parser = parse_duration)]
    pub delay: Option<Duration>,

    /// Maximum datagrams handled at once
    #[arg(long)]
    pub max_inflight: Option<usize>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct HttpArgs {
    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Wrap connections in TLS
    #[arg(long)]
    pub tls: bool,

    /// Delay every response by --slow-duration
    #[arg(long)]
    pub slow_response: bool,

    /// How long to delay slow responses
    #[arg(long, value_parser = parse_duration)]
    pub slow_duration: Option<Duration>,

    /// Replace the status code of every response
    #[arg(long)]
    pub error_code: Option<u16>,

    /// Send response bodies with chunked transfer encoding
    #[arg(long)]
    pub chunked: bool,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct MqttArgs {
    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Wrap connections in TLS
    #[arg(long)]
    pub tls: bool,

    /// Keep the last payload published to each topic
    #[arg(short, long)]
    pub retain: bool,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]` section
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub tcp: TcpConfig,
    pub udp: UdpConfig,
    pub http: HttpConfig,
    pub mqtt: MqttConfig,
    pub tls: TlsSection,
}

/// `[server.tls]` section
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TlsSection {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// `[logging]` section
#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub level: Option<String>,
}

/// TCP echo listener settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub port: u16,
    #[serde(skip)]
    pub tls_port: u16,
    #[serde(deserialize_with = "deserialize_duration")]
    pub delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub close_after: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            tls_port: 9000 + TLS_PORT_OFFSET,
            delay: Duration::ZERO,
            close_after: Duration::ZERO,
        }
    }
}

impl TcpConfig {
    pub fn faults(&self) -> Faults {
        Faults::none()
            .with_delay(self.delay)
            .with_close_after(self.close_after)
    }
}

/// UDP echo listener settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub port: u16,
    pub drop_rate: f64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub delay: Duration,
    pub max_inflight: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            port: 9001,
            drop_rate: 0.0,
            delay: Duration::ZERO,
            max_inflight: DEFAULT_MAX_INFLIGHT,
        }
    }
}

impl UdpConfig {
    pub fn faults(&self) -> Faults {
        Faults::none()
            .with_drop_rate(self.drop_rate)
            .with_delay(self.delay)
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    #[serde(skip)]
    pub tls_port: u16,
    pub slow_response: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub slow_duration: Duration,
    pub error_code: u16,
    pub chunked: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            tls_port: 8080 + TLS_PORT_OFFSET,
            slow_response: false,
            slow_duration: Duration::ZERO,
            error_code: 0,
            chunked: false,
        }
    }
}

impl HttpConfig {
    pub fn faults(&self) -> HttpFaults {
        HttpFaults {
            slow_response: self.slow_response,
            slow_duration: self.slow_duration,
            error_code: self.error_code,
            chunked: self.chunked,
        }
    }
}

/// MQTT listener settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub port: u16,
    #[serde(skip)]
    pub tls_port: u16,
    pub retain: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            port: 1883,
            tls_port: 1883 + TLS_PORT_OFFSET,
            retain: false,
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub tcp: TcpConfig,
    pub udp: UdpConfig,
    pub http: HttpConfig,
    pub mqtt: MqttConfig,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tcp: TcpConfig::default(),
            udp: UdpConfig::default(),
            http: HttpConfig::default(),
            mqtt: MqttConfig::default(),
            cert: PathBuf::from("cert.pem"),
            key: PathBuf::from("key.pem"),
            log_level: default_log_level(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from CLI args and the optional config file.
    pub fn load() -> Result<(Self, Command), ConfigError> {
        let cli = CliArgs::parse();
        let config = Self::from_args(&cli)?;
        Ok((config, cli.command))
    }

    /// Resolve parsed CLI args against the config file and defaults.
    pub fn from_args(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };
        let mut config = Self::from_file(file)?;

        if let Some(bind) = &cli.bind {
            config.bind = bind.clone();
        }
        if let Some(cert) = &cli.cert {
            config.cert = cert.clone();
        }
        if let Some(key) = &cli.key {
            config.key = key.clone();
        }
        if let Some(level) = &cli.log_level {
            config.log_level = level.clone();
        }

        match &cli.command {
            Command::Tcp(args) => {
                if let Some(port) = args.port {
                    *listener_port(&mut config.tcp.port, &mut config.tcp.tls_port, args.tls) = port;
                }
                if let Some(delay) = args.delay {
                    config.tcp.delay = delay;
                }
                if let Some(close_after) = args.close_after {
                    config.tcp.close_after = close_after;
                }
            }
            Command::Udp(args) => {
                if let Some(port) = args.port {
                    config.udp.port = port;
                }
                if let Some(rate) = args.drop_rate {
                    config.udp.drop_rate = rate;
                }
                if let Some(delay) = args.delay {
                    config.udp.delay = delay;
                }
                if let Some(max_inflight) = args.max_inflight {
                    config.udp.max_inflight = max_inflight;
                }
            }
            Command::Http(args) => {
                if let Some(port) = args.port {
                    *listener_port(&mut config.http.port, &mut config.http.tls_port, args.tls) = port;
                }
                config.http.slow_response |= args.slow_response;
                if let Some(duration) = args.slow_duration {
                    config.http.slow_duration = duration;
                }
                if let Some(code) = args.error_code {
                    config.http.error_code = code;
                }
                config.http.chunked |= args.chunked;
            }
            Command::Mqtt(args) => {
                if let Some(port) = args.port {
                    *listener_port(&mut config.mqtt.port, &mut config.mqtt.tls_port, args.tls) = port;
                }
                config.mqtt.retain |= args.retain;
            }
            Command::ServeAll | Command::ServeAllTls | Command::Version => {}
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply defaults to a parsed config file.
    ///
    /// A port of 0 in the file means "use the default port". TLS ports are
    /// derived from the resulting plain ports.
    pub fn from_file(file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let server = file.server;

        let mut config = Config {
            bind: server
                .bind
                .filter(|b| !b.is_empty())
                .unwrap_or(defaults.bind),
            tcp: server.tcp,
            udp: server.udp,
            http: server.http,
            mqtt: server.mqtt,
            cert: server.tls.cert.unwrap_or(defaults.cert),
            key: server.tls.key.unwrap_or(defaults.key),
            log_level: file.logging.level.unwrap_or(defaults.log_level),
        };

        if config.tcp.port == 0 {
            config.tcp.port = defaults.tcp.port;
        }
        if config.udp.port == 0 {
            config.udp.port = defaults.udp.port;
        }
        if config.http.port == 0 {
            config.http.port = defaults.http.port;
        }
        if config.mqtt.port == 0 {
            config.mqtt.port = defaults.mqtt.port;
        }
        config.tcp.tls_port = tls_port("tcp", config.tcp.port)?;
        config.http.tls_port = tls_port("http", config.http.port)?;
        config.mqtt.tls_port = tls_port("mqtt", config.mqtt.port)?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.udp.drop_rate) {
            return Err(ConfigError::Invalid(format!(
                "udp drop_rate must be between 0.0 and 1.0, got {}",
                self.udp.drop_rate
            )));
        }
        if self.http.error_code != 0 && !(100..=999).contains(&self.http.error_code) {
            return Err(ConfigError::Invalid(format!(
                "http error_code must be a three-digit status, got {}",
                self.http.error_code
            )));
        }
        if self.udp.max_inflight == 0 {
            return Err(ConfigError::Invalid(
                "udp max_inflight must be at least 1".to_string(),
            ));
        }
        if self.bind.is_empty() {
            return Err(ConfigError::Invalid("bind address is empty".to_string()));
        }
        Ok(())
    }
}

fn listener_port<'a>(port: &'a mut u16, tls_port: &'a mut u16, tls: bool) -> &'a mut u16 {
    if tls {
        tls_port
    } else {
        port
    }
}

fn tls_port(protocol: &str, port: u16) -> Result<u16, ConfigError> {
    port.checked_add(TLS_PORT_OFFSET).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "{} port {} leaves no room for its TLS port (+{})",
            protocol, port, TLS_PORT_OFFSET
        ))
    })
}

/// Read and parse a config file, picking the format from its extension.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&contents).map_err(|e| ConfigError::JsonParse(path.to_path_buf(), e))
    } else {
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }
}

/// Parse a duration such as `300ms`, `1.5s` or `1h2m3s`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut rest = s;
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        nanos += value * scale;
        rest = &rest[unit_len..];
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

/// Accepts a duration string or an integer number of nanoseconds.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Nanos(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Nanos(n) => Ok(Duration::from_nanos(n)),
        Raw::Text(s) if s.trim().is_empty() => Ok(Duration::ZERO),
        Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    JsonParse(PathBuf, serde_json::Error),
    InvalidDuration(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::JsonParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidDuration(s) => write!(f, "Invalid duration: {:?}", s),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["netfault"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_args(&cli(&["serve-all"])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.tcp.port, 9000);
        assert_eq!(config.tcp.tls_port, 19000);
        assert_eq!(config.udp.port, 9001);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.tls_port, 18080);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.tls_port, 11883);
        assert_eq!(config.udp.max_inflight, DEFAULT_MAX_INFLIGHT);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
        assert_eq!(parse_duration(" 5s ").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_duration_invalid() {
        for input in ["", "5", "ms", "-1s", "1.2.3s", "3 s", "4d"] {
            assert!(
                matches!(parse_duration(input), Err(ConfigError::InvalidDuration(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            bind = "127.0.0.1"

            [server.tcp]
            port = 7000
            delay = "250ms"
            close_after = 2000000000

            [server.udp]
            drop_rate = 0.25
            max_inflight = 16

            [server.http]
            slow_response = true
            slow_duration = "1s"
            error_code = 503
            chunked = true

            [server.mqtt]
            retain = true

            [logging]
            level = "debug"
        "#;

        let file: FileConfig = toml::from_str(toml_str).unwrap();
        let config = Config::from_file(file).unwrap();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.tcp.port, 7000);
        assert_eq!(config.tcp.tls_port, 17000);
        assert_eq!(config.tcp.delay, Duration::from_millis(250));
        assert_eq!(config.tcp.close_after, Duration::from_secs(2));
        assert_eq!(config.udp.port, 9001);
        assert_eq!(config.udp.drop_rate, 0.25);
        assert_eq!(config.udp.max_inflight, 16);
        assert!(config.http.slow_response);
        assert_eq!(config.http.slow_duration, Duration::from_secs(1));
        assert_eq!(config.http.error_code, 503);
        assert!(config.http.chunked);
        assert!(config.mqtt.retain);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_json_file() {
        let dir = test_support::temp_dir("config-json");
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{"server": {"bind": "", "tcp": {"port": 0, "delay": 100000000},
                "udp": {"port": 9101, "delay": "50ms"}}}"#,
        )
        .unwrap();

        let config = Config::from_args(&cli(&["serve-all", "--config", path.to_str().unwrap()])).unwrap();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.tcp.port, 9000);
        assert_eq!(config.tcp.delay, Duration::from_millis(100));
        assert_eq!(config.udp.port, 9101);
        assert_eq!(config.udp.delay, Duration::from_millis(50));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = test_support::temp_dir("config-override");
        let path = dir.join("netfault.toml");
        std::fs::write(
            &path,
            "[server]\nbind = \"10.0.0.1\"\n[server.tcp]\nport = 7000\ndelay = \"1s\"\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();

        let config = Config::from_args(&cli(&[
            "tcp",
            "--config",
            path.to_str().unwrap(),
            "--bind",
            "127.0.0.1",
            "-p",
            "7100",
            "--close-after",
            "100ms",
            "--log-level",
            "trace",
        ]))
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.tcp.port, 7100);
        assert_eq!(config.tcp.delay, Duration::from_secs(1));
        assert_eq!(config.tcp.close_after, Duration::from_millis(100));
        assert_eq!(config.log_level, "trace");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tls_port_flag() {
        let config = Config::from_args(&cli(&["mqtt", "--tls", "--port", "8883", "-r"])).unwrap();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.tls_port, 8883);
        assert!(config.mqtt.retain);

        let config = Config::from_args(&cli(&["http", "--tls"])).unwrap();
        assert_eq!(config.http.tls_port, 18080);
    }

    #[test]
    fn test_http_flags() {
        let config = Config::from_args(&cli(&[
            "http",
            "--slow-response",
            "--slow-duration",
            "2s",
            "--error-code",
            "500",
            "--chunked",
        ]))
        .unwrap();
        let faults = config.http.faults();
        assert!(faults.slow_response);
        assert_eq!(faults.slow_duration, Duration::from_secs(2));
        assert_eq!(faults.error_code, 500);
        assert!(faults.chunked);
    }

    #[test]
    fn test_udp_flags_and_validation() {
        let config = Config::from_args(&cli(&["udp", "--drop-rate", "0.5", "--delay", "10ms"])).unwrap();
        assert_eq!(config.udp.faults().drop_rate(), 0.5);
        assert_eq!(config.udp.faults().delay(), Duration::from_millis(10));

        let err = Config::from_args(&cli(&["udp", "--drop-rate", "1.5"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_invalid_error_code() {
        let err = Config::from_args(&cli(&["http", "--error-code", "42"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_duration_flag_rejected() {
        let argv = ["netfault", "tcp", "--delay", "soon"];
        assert!(CliArgs::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_args(&cli(&["serve-all", "--config", "/nonexistent/netfault.toml"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_, _)));
    }

    #[test]
    fn test_tls_port_overflow() {
        let file: FileConfig = toml::from_str("[server.http]\nport = 60000\n").unwrap();
        assert!(matches!(Config::from_file(file), Err(ConfigError::Invalid(_))));
    }
}
