pub mod args;
pub mod commands;
pub mod plain;

/// Exit codes for different error conditions
pub mod exit_codes {
    /// Successful execution
    pub const SUCCESS: u8 = 0;
    /// Network/connection error (e.g., host unreachable, retries exhausted)
    pub const NETWORK_ERROR: u8 = 1;
    /// The broker refused the CONNECT frame
    pub const AUTH_ERROR: u8 = 2;
    /// Protocol error (e.g., unexpected server response)
    pub const PROTOCOL_ERROR: u8 = 3;
    /// Bad command line (e.g., unparsable broker URI)
    pub const USAGE_ERROR: u8 = 64;
}
