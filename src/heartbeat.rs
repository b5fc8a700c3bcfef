use std::time::Duration;

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Parameters
/// - `client_out`: how often the client offers to send heartbeats (ms).
/// - `client_in`: how often the client wants to receive heartbeats (ms).
/// - `server_out`: how often the server offers to send heartbeats (ms).
/// - `server_in`: how often the server wants to receive heartbeats (ms).
///
/// Returns `(outgoing, incoming)`. A direction is disabled (`None`) when
/// either side declared `0` for it; otherwise the interval is the larger of
/// the two values.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let policy = HeartbeatPolicy::negotiate((client_out, client_in), (server_out, server_in));
    (policy.client_interval(), policy.broker_interval())
}

/// Negotiated heartbeat intervals and the liveness test derived from them.
///
/// `client_interval` is how often this side must transmit, and
/// `broker_interval` how often the broker promised to. A side is considered
/// alive while the time since its last traffic stays within 110% of its
/// interval; a zero interval means the side is never checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    client_ms: u64,
    broker_ms: u64,
}

impl HeartbeatPolicy {
    /// Combine the client's `(cx, cy)` with the broker's `(sx, sy)`.
    pub fn negotiate(client: (u64, u64), broker: (u64, u64)) -> Self {
        let (cx, cy) = client;
        let (sx, sy) = broker;
        let combine = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                0
            } else {
                ours.max(theirs)
            }
        };
        Self {
            client_ms: combine(cx, sy),
            broker_ms: combine(cy, sx),
        }
    }

    pub fn client_interval(&self) -> Option<Duration> {
        (self.client_ms > 0).then(|| Duration::from_millis(self.client_ms))
    }

    pub fn broker_interval(&self) -> Option<Duration> {
        (self.broker_ms > 0).then(|| Duration::from_millis(self.broker_ms))
    }

    /// Longest silence tolerated from this side.
    pub fn client_limit(&self) -> Option<Duration> {
        limit(self.client_ms)
    }

    /// Longest silence tolerated from the broker.
    pub fn broker_limit(&self) -> Option<Duration> {
        limit(self.broker_ms)
    }

    pub fn client_pulse(&self, since_transmitted: Duration) -> bool {
        self.client_limit().is_none_or(|l| since_transmitted <= l)
    }

    pub fn broker_pulse(&self, since_received: Duration) -> bool {
        self.broker_limit().is_none_or(|l| since_received <= l)
    }

    pub fn pulse(&self, since_transmitted: Duration, since_received: Duration) -> bool {
        self.client_pulse(since_transmitted) && self.broker_pulse(since_received)
    }

    /// Whether heartbeats are enabled in either direction.
    pub fn is_enabled(&self) -> bool {
        self.client_ms > 0 || self.broker_ms > 0
    }
}

fn limit(interval_ms: u64) -> Option<Duration> {
    (interval_ms > 0).then(|| Duration::from_micros(interval_ms.saturating_mul(1100)))
}
