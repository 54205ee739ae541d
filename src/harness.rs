//! Process-level wiring: decide which listeners a mode needs, start each of
//! them as its own task, and wait until they have all returned.
//!
//! Listeners are independent. One failing to bind is logged and the others
//! keep running; `run` only reports an error when nothing could be started.

use crate::config::{Command, Config};
use crate::protocols::http::HttpServer;
use crate::protocols::mqtt::{MqttServer, SessionTable};
use crate::protocols::tcp::EchoServer;
use crate::protocols::udp::UdpEchoServer;
use crate::server::{self, StopSignal};
use crate::tls::{self, TlsError};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
    Mqtt,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
            Protocol::Mqtt => "mqtt",
        };
        f.write_str(name)
    }
}

/// Which set of listeners to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Plain TCP, HTTP and MQTT, UDP, and the TLS variants when a
    /// certificate loads.
    All,
    /// TLS TCP, HTTP and MQTT, plus UDP.
    AllTls,
    /// A single listener.
    Single { protocol: Protocol, tls: bool },
}

impl Mode {
    /// The mode a subcommand asks for, or `None` if it starts no listeners.
    pub fn from_command(command: &Command) -> Option<Mode> {
        let mode = match command {
            Command::ServeAll => Mode::All,
            Command::ServeAllTls => Mode::AllTls,
            Command::Tcp(args) => Mode::Single {
                protocol: Protocol::Tcp,
                tls: args.tls,
            },
            Command::Udp(_) => Mode::Single {
                protocol: Protocol::Udp,
                tls: false,
            },
            Command::Http(args) => Mode::Single {
                protocol: Protocol::Http,
                tls: args.tls,
            },
            Command::Mqtt(args) => Mode::Single {
                protocol: Protocol::Mqtt,
                tls: args.tls,
            },
            Command::Version => return None,
        };
        Some(mode)
    }

    fn wants_tls(&self) -> bool {
        match self {
            Mode::All | Mode::AllTls => true,
            Mode::Single { tls, .. } => *tls,
        }
    }
}

/// One listener to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub protocol: Protocol,
    pub port: u16,
    pub tls: bool,
}

impl Listener {
    fn plain(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            port,
            tls: false,
        }
    }

    fn tls(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            port,
            tls: true,
        }
    }
}

/// The listeners `mode` starts, given whether a TLS acceptor is available.
pub fn plan(config: &Config, mode: Mode, tls_available: bool) -> Vec<Listener> {
    let tls_listeners = [
        Listener::tls(Protocol::Tcp, config.tcp.tls_port),
        Listener::tls(Protocol::Http, config.http.tls_port),
        Listener::tls(Protocol::Mqtt, config.mqtt.tls_port),
    ];
    let udp = Listener::plain(Protocol::Udp, config.udp.port);

    match mode {
        Mode::All => {
            let mut listeners = vec![
                Listener::plain(Protocol::Tcp, config.tcp.port),
                udp,
                Listener::plain(Protocol::Http, config.http.port),
                Listener::plain(Protocol::Mqtt, config.mqtt.port),
            ];
            if tls_available {
                listeners.extend(tls_listeners);
            }
            listeners
        }
        Mode::AllTls => {
            let mut listeners = Vec::new();
            if tls_available {
                listeners.extend(tls_listeners);
            }
            listeners.push(udp);
            listeners
        }
        Mode::Single { protocol, tls } => {
            let listener = match (protocol, tls) {
                (Protocol::Tcp, false) => Listener::plain(protocol, config.tcp.port),
                (Protocol::Tcp, true) => Listener::tls(protocol, config.tcp.tls_port),
                (Protocol::Udp, _) => udp,
                (Protocol::Http, false) => Listener::plain(protocol, config.http.port),
                (Protocol::Http, true) => Listener::tls(protocol, config.http.tls_port),
                (Protocol::Mqtt, false) => Listener::plain(protocol, config.mqtt.port),
                (Protocol::Mqtt, true) => Listener::tls(protocol, config.mqtt.tls_port),
            };
            vec![listener]
        }
    }
}

/// Start every listener of `mode` and wait for all of them to return.
///
/// Listeners return once `stop` is set. A single TLS listener whose
/// certificate cannot be loaded is an error; in the multi-listener modes
/// the TLS listeners are skipped with a warning instead.
pub async fn run(config: Config, mode: Mode, stop: StopSignal) -> Result<(), HarnessError> {
    let acceptor = load_tls(&config, mode)?;
    let listeners = plan(&config, mode, acceptor.is_some());

    info!(
        bind = %config.bind,
        ?mode,
        listeners = listeners.len(),
        "Starting netfault"
    );

    let config = Arc::new(config);
    let sessions = Arc::new(SessionTable::new());
    let mut tasks = JoinSet::new();
    for listener in listeners.iter().copied() {
        let config = Arc::clone(&config);
        let tls = if listener.tls { acceptor.clone() } else { None };
        let sessions = Arc::clone(&sessions);
        let stop = stop.clone();
        tasks.spawn(async move {
            let result = start_listener(&config, listener, tls, sessions, stop).await;
            (listener, result)
        });
    }

    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((listener, Err(e))) => {
                error!(
                    protocol = %listener.protocol,
                    port = listener.port,
                    tls = listener.tls,
                    error = %e,
                    "Listener failed"
                );
                failed += 1;
            }
            Err(e) => {
                error!(error = %e, "Listener task panicked");
                failed += 1;
            }
        }
    }

    if failed == listeners.len() {
        return Err(HarnessError::ListenersFailed(failed));
    }
    info!("All listeners stopped");
    Ok(())
}

fn load_tls(config: &Config, mode: Mode) -> Result<Option<TlsAcceptor>, HarnessError> {
    if !mode.wants_tls() {
        return Ok(None);
    }
    match tls::load_acceptor(&config.cert, &config.key) {
        Ok(acceptor) => Ok(Some(acceptor)),
        Err(e) if matches!(mode, Mode::Single { .. }) => Err(HarnessError::Tls(e)),
        Err(e) => {
            warn!(error = %e, "TLS certificate not loaded, skipping TLS listeners");
            Ok(None)
        }
    }
}

async fn start_listener(
    config: &Config,
    listener: Listener,
    tls: Option<TlsAcceptor>,
    sessions: Arc<SessionTable>,
    stop: StopSignal,
) -> io::Result<()> {
    let addr = server::resolve(&config.bind, listener.port).await?;

    if listener.protocol == Protocol::Udp {
        let socket = server::bind_udp(addr)?;
        return UdpEchoServer::new(config.udp.faults())
            .with_max_inflight(config.udp.max_inflight)
            .serve(socket, stop)
            .await;
    }

    let tcp = server::bind_tcp(addr)?;
    match listener.protocol {
        Protocol::Tcp => {
            EchoServer::new(config.tcp.faults())
                .serve(tcp, tls, stop)
                .await
        }
        Protocol::Http => {
            HttpServer::new(config.http.faults())
                .serve(tcp, tls, stop)
                .await
        }
        Protocol::Mqtt => {
            MqttServer::new(config.mqtt.retain)
                .with_sessions(sessions)
                .serve(tcp, tls, stop)
                .await
        }
        Protocol::Udp => Ok(()),
    }
}

/// Harness startup errors
#[derive(Debug)]
pub enum HarnessError {
    Tls(TlsError),
    ListenersFailed(usize),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Tls(e) => write!(f, "TLS setup failed: {}", e),
            HarnessError::ListenersFailed(n) => write!(f, "{} listener(s) failed to start", n),
        }
    }
}

impl std::error::Error for HarnessError {}

impl From<TlsError> for HarnessError {
    fn from(e: TlsError) -> Self {
        HarnessError::Tls(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MqttArgs, TcpArgs, UdpArgs};
    use crate::test_support;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time;

    fn loopback_config() -> Config {
        let mut config = Config {
            bind: "127.0.0.1".to_string(),
            cert: PathBuf::from("/nonexistent/cert.pem"),
            key: PathBuf::from("/nonexistent/key.pem"),
            ..Config::default()
        };
        config.tcp.port = 0;
        config.tcp.tls_port = 0;
        config.udp.port = 0;
        config.http.port = 0;
        config.http.tls_port = 0;
        config.mqtt.port = 0;
        config.mqtt.tls_port = 0;
        config
    }

    #[test]
    fn test_mode_from_command() {
        assert_eq!(Mode::from_command(&Command::ServeAll), Some(Mode::All));
        assert_eq!(Mode::from_command(&Command::ServeAllTls), Some(Mode::AllTls));
        assert_eq!(Mode::from_command(&Command::Version), None);
        assert_eq!(
            Mode::from_command(&Command::Tcp(TcpArgs {
                tls: true,
                ..TcpArgs::default()
            })),
            Some(Mode::Single {
                protocol: Protocol::Tcp,
                tls: true
            })
        );
        assert_eq!(
            Mode::from_command(&Command::Udp(UdpArgs::default())),
            Some(Mode::Single {
                protocol: Protocol::Udp,
                tls: false
            })
        );
        assert_eq!(
            Mode::from_command(&Command::Mqtt(MqttArgs::default())),
            Some(Mode::Single {
                protocol: Protocol::Mqtt,
                tls: false
            })
        );
    }

    #[test]
    fn test_plan_all() {
        let config = Config::default();
        let plain = plan(&config, Mode::All, false);
        assert_eq!(plain.len(), 4);
        assert!(plain.iter().all(|listener| !listener.tls));

        let with_tls = plan(&config, Mode::All, true);
        assert_eq!(with_tls.len(), 7);
        assert!(with_tls.contains(&Listener::tls(Protocol::Http, 18080)));
        assert!(with_tls.contains(&Listener::plain(Protocol::Mqtt, 1883)));
    }

    #[test]
    fn test_plan_all_tls() {
        let config = Config::default();
        let listeners = plan(&config, Mode::AllTls, true);
        assert_eq!(
            listeners,
            vec![
                Listener::tls(Protocol::Tcp, 19000),
                Listener::tls(Protocol::Http, 18080),
                Listener::tls(Protocol::Mqtt, 11883),
                Listener::plain(Protocol::Udp, 9001),
            ]
        );
        assert_eq!(plan(&config, Mode::AllTls, false).len(), 1);
    }

    #[test]
    fn test_plan_single() {
        let config = Config::default();
        let mode = Mode::Single {
            protocol: Protocol::Mqtt,
            tls: true,
        };
        assert_eq!(
            plan(&config, mode, true),
            vec![Listener::tls(Protocol::Mqtt, 11883)]
        );
        let mode = Mode::Single {
            protocol: Protocol::Tcp,
            tls: false,
        };
        assert_eq!(
            plan(&config, mode, false),
            vec![Listener::plain(Protocol::Tcp, 9000)]
        );
    }

    #[tokio::test]
    async fn test_single_tls_without_certificate() {
        let mode = Mode::Single {
            protocol: Protocol::Http,
            tls: true,
        };
        let result = run(loopback_config(), mode, StopSignal::new()).await;
        assert!(matches!(result, Err(HarnessError::Tls(_))));
    }

    #[tokio::test]
    async fn test_bind_conflict_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = loopback_config();
        config.tcp.port = taken.local_addr().unwrap().port();

        let mode = Mode::Single {
            protocol: Protocol::Tcp,
            tls: false,
        };
        let result = time::timeout(Duration::from_secs(5), run(config, mode, StopSignal::new()))
            .await
            .unwrap();
        assert!(matches!(result, Err(HarnessError::ListenersFailed(1))));
    }

    #[tokio::test]
    async fn test_serve_all_stops() {
        let stop = StopSignal::new();
        let harness = tokio::spawn(run(loopback_config(), Mode::All, stop.clone()));

        time::sleep(Duration::from_millis(200)).await;
        stop.stop();
        let result = time::timeout(Duration::from_secs(5), harness)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_single_tls_with_certificate() {
        let dir = test_support::temp_dir("harness-tls");
        let (cert, key) = test_support::write_pem_files(&dir);
        let mut config = loopback_config();
        config.cert = cert;
        config.key = key;

        let stop = StopSignal::new();
        let mode = Mode::Single {
            protocol: Protocol::Mqtt,
            tls: true,
        };
        let harness = tokio::spawn(run(config, mode, stop.clone()));

        time::sleep(Duration::from_millis(200)).await;
        stop.stop();
        let result = time::timeout(Duration::from_secs(5), harness)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
