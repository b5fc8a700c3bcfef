use thiserror::Error;

/// Wire-level parse failures. Any of these is fatal to the connection that
/// produced the bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A header line without a `:` separator
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    /// A STOMP 1.1 escape sequence other than `\\`, `\c` or `\n`
    #[error("invalid header escape sequence: {0:?}")]
    InvalidHeaderEscapeSequence(String),
    /// Frame structure violation (terminator mismatch, bad content-length)
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// Command or header bytes that are not UTF-8
    #[error("invalid utf8 in {0}")]
    InvalidUtf8(String),
}

/// Errors returned by `Connection` and `Client` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The broker answered CONNECT with something other than CONNECTED
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// The negotiated version is not one the client accepts
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),
    /// A read or write made no progress within its timeout
    #[error("{0} timeout exceeded")]
    Timeout(&'static str),
    /// The peer closed the socket
    #[error("connection closed")]
    Closed,
    /// No open connection to write to
    #[error("not connected")]
    NotConnected,
    /// The negotiated protocol version has no such command
    #[error("{command} is not supported by STOMP {version}")]
    UnsupportedCommand {
        command: &'static str,
        version: &'static str,
    },
    /// A frame could not be built because a required header is missing
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
    /// Broker URI could not be parsed
    #[error("invalid broker uri: {0}")]
    InvalidUri(String),
    /// TLS configuration or handshake failure
    #[error("tls error: {0}")]
    Tls(String),
}

impl ConnError {
    /// Whether a failover layer should retry after this error. Command
    /// errors are caller mistakes and are not retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnError::UnsupportedCommand { .. }
                | ConnError::MissingHeader(_)
                | ConnError::InvalidUri(_)
        )
    }
}
