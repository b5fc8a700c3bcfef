use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::ProtocolVersion;

/// Options used when establishing a STOMP connection.
///
/// Built with chained setters:
///
/// ```ignore
/// let opts = ConnectOptions::default()
///     .login("guest", "guest")
///     .heartbeats(10_000, 10_000)
///     .header("client-id", "orders");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Versions offered in `accept-version` and accepted from CONNECTED
    pub versions: Vec<ProtocolVersion>,
    /// Client heart-beat proposal `(cx, cy)` in milliseconds
    pub heartbeats: (u64, u64),
    /// Virtual host sent in the `host` header; defaults to the broker host
    pub host: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Extra CONNECT headers, applied after the standard ones
    pub headers: Vec<(String, String)>,
    /// Longest wait for inbound bytes while a frame is expected; `None`
    /// disables the check
    pub read_timeout: Option<Duration>,
    /// Longest wait for queued bytes to make progress; `None` disables the
    /// check
    pub write_timeout: Option<Duration>,
    /// Bound on TCP connect plus TLS handshake
    pub connect_timeout: Option<Duration>,
    /// TLS settings for `stomp+ssl://` brokers; `None` uses
    /// `TlsOptions::default()`
    pub tls: Option<TlsOptions>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            versions: ProtocolVersion::ALL.to_vec(),
            heartbeats: (0, 0),
            host: None,
            login: None,
            passcode: None,
            headers: Vec::new(),
            read_timeout: Some(Duration::from_secs(120)),
            write_timeout: Some(Duration::from_secs(120)),
            connect_timeout: Some(Duration::from_secs(30)),
            tls: None,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn versions(mut self, versions: impl Into<Vec<ProtocolVersion>>) -> Self {
        self.versions = versions.into();
        self
    }

    pub fn heartbeats(mut self, cx: u64, cy: u64) -> Self {
        self.heartbeats = (cx, cy);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn login(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    /// Add an extra CONNECT header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// TLS settings for `stomp+ssl://` brokers.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Verify the broker certificate chain. Disabling this accepts any
    /// certificate.
    pub verify: bool,
    /// PEM file with trusted CA certificates
    pub ca_file: Option<PathBuf>,
    /// Directory of PEM files with trusted CA certificates
    pub ca_dir: Option<PathBuf>,
    /// PEM client certificate chain for mutual TLS
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`
    pub client_key: Option<PathBuf>,
    /// Require the certificate to name the broker host
    pub check_hostname: bool,
    /// SNI name to present instead of the broker host
    pub server_name: Option<String>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify: true,
            ca_file: None,
            ca_dir: None,
            client_cert: None,
            client_key: None,
            check_hostname: true,
            server_name: None,
        }
    }
}

impl TlsOptions {
    /// Accept any certificate. Only for development brokers.
    pub fn insecure() -> Self {
        Self {
            verify: false,
            check_hostname: false,
            ..Self::default()
        }
    }

    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn ca_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_dir = Some(path.into());
        self
    }

    pub fn client_auth(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    pub fn check_hostname(mut self, check: bool) -> Self {
        self.check_hostname = check;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// How the failover client remembers frames for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferStrategy {
    /// Keep frames until they have been written to the socket
    #[default]
    Written,
    /// Keep frames until the broker sends a RECEIPT for them
    Receipts,
}

/// Retry and replay settings of `FailoverClient`.
#[derive(Debug, Clone)]
pub struct FailoverOptions {
    /// Connection attempts before giving up; 0 retries forever
    pub retry_attempts: u32,
    /// Delay after the first failed attempt
    pub retry_delay: Duration,
    pub use_exponential_back_off: bool,
    pub back_off_multiplier: f64,
    /// Upper bound for the exponential delay
    pub max_retry_delay: Duration,
    /// Try brokers in a random order on each pass over the pool
    pub randomize: bool,
    pub buffer: BufferStrategy,
    /// Options handed to every pooled client
    pub connect: ConnectOptions,
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self {
            retry_attempts: 0,
            retry_delay: Duration::from_millis(10),
            use_exponential_back_off: true,
            back_off_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(30),
            randomize: false,
            buffer: BufferStrategy::Written,
            connect: ConnectOptions::default(),
        }
    }
}

impl FailoverOptions {
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn exponential_back_off(mut self, enabled: bool, multiplier: f64, max: Duration) -> Self {
        self.use_exponential_back_off = enabled;
        self.back_off_multiplier = multiplier;
        self.max_retry_delay = max;
        self
    }

    pub fn randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    pub fn buffer(mut self, buffer: BufferStrategy) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn connect(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }
}
