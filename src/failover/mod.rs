//! Failover across a pool of brokers.
//!
//! [`FailoverClient`] connects to one broker of a pool at a time. When the
//! connection is lost it reconnects to the next broker (with back-off) and
//! replays the frames its [`ReplayBuffer`] still holds.

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod pool;

use std::time::Duration;
use thiserror::Error;

use crate::config::{BufferStrategy, FailoverOptions};
use crate::error::ConnError;
use crate::transport::BrokerUri;

pub use backoff::Backoff;
pub use buffer::{ReceiptsBuffer, ReplayBuffer, WrittenBuffer};
pub use client::{FailoverClient, FailoverEvent, FailoverHandler, FailoverState};
pub use pool::{Pool, RoundRobin, Shuffle};

#[derive(Error, Debug)]
pub enum FailoverError {
    /// Every attempt allowed by `retry_attempts` failed
    #[error("maximum retries exceeded after {attempts} attempts")]
    MaximumRetriesExceeded { attempts: u32 },
    /// No broker connection is active
    #[error("not connected")]
    NotConnected,
    /// The pool has no brokers
    #[error("broker pool is empty")]
    EmptyPool,
    #[error(transparent)]
    Client(#[from] ConnError),
    /// Failover URI could not be parsed
    #[error("invalid failover uri: {0}")]
    InvalidUri(String),
}

/// Parse a failover URI into its brokers and options.
///
/// Accepted forms:
///
/// ```text
/// failover:(stomp://a:61613,stomp+ssl://b:61612)?randomize=true
/// failover://(stomp://a,stomp://b)
/// failover:stomp://a,stomp://b?retryAttempts=3
/// stomp://a:61613
/// ```
///
/// Recognised options are `retryAttempts`, `retryDelay` and
/// `maxRetryDelay` (milliseconds), `useExponentialBackOff`,
/// `backOffMultiplier`, `randomize` and `buffer` (`written` or
/// `receipts`).
pub fn parse_failover_uri(uri: &str) -> Result<(Vec<BrokerUri>, FailoverOptions), FailoverError> {
    let uri = uri.trim();
    let Some(rest) = uri.strip_prefix("failover:") else {
        let broker: BrokerUri = uri.parse()?;
        return Ok((vec![broker], FailoverOptions::default()));
    };
    let rest = rest.strip_prefix("//").unwrap_or(rest);

    let (list, query) = if let Some(inner) = rest.strip_prefix('(') {
        let close = inner
            .find(')')
            .ok_or_else(|| FailoverError::InvalidUri(format!("{}: unbalanced parenthesis", uri)))?;
        let tail = &inner[close + 1..];
        let query = match tail {
            "" => None,
            q => Some(
                q.strip_prefix('?')
                    .ok_or_else(|| FailoverError::InvalidUri(format!("{}: unexpected {:?}", uri, q)))?,
            ),
        };
        (&inner[..close], query)
    } else {
        match rest.rsplit_once('?') {
            Some((list, query)) => (list, Some(query)),
            None => (rest, None),
        }
    };

    let brokers = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<BrokerUri>())
        .collect::<Result<Vec<_>, _>>()?;
    if brokers.is_empty() {
        return Err(FailoverError::InvalidUri(format!("{}: no brokers", uri)));
    }

    let mut options = FailoverOptions::default();
    if let Some(query) = query {
        apply_options(&mut options, query)?;
    }
    Ok((brokers, options))
}

fn apply_options(options: &mut FailoverOptions, query: &str) -> Result<(), FailoverError> {
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let bad = || FailoverError::InvalidUri(format!("bad value for {}: {:?}", key, value));
        match key.as_ref() {
            "retryAttempts" => options.retry_attempts = value.parse().map_err(|_| bad())?,
            "retryDelay" => {
                options.retry_delay = Duration::from_millis(value.parse().map_err(|_| bad())?)
            }
            "maxRetryDelay" => {
                options.max_retry_delay = Duration::from_millis(value.parse().map_err(|_| bad())?)
            }
            "useExponentialBackOff" => {
                options.use_exponential_back_off = value.parse().map_err(|_| bad())?
            }
            "backOffMultiplier" => {
                options.back_off_multiplier = value.parse().map_err(|_| bad())?
            }
            "randomize" => options.randomize = value.parse().map_err(|_| bad())?,
            "buffer" => {
                options.buffer = match value.as_ref() {
                    "written" => BufferStrategy::Written,
                    "receipts" => BufferStrategy::Receipts,
                    _ => return Err(bad()),
                }
            }
            other => tracing::warn!(option = other, "ignoring unknown failover option"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parenthesised_list_with_options() {
        let (brokers, opts) = parse_failover_uri(
            "failover:(stomp://a:61613,stomp+ssl://b)?randomize=true&retryAttempts=3&buffer=receipts",
        )
        .unwrap();
        assert_eq!(brokers.len(), 2);
        assert_eq!(brokers[0].host, "a");
        assert!(brokers[1].is_tls());
        assert_eq!(brokers[1].port, 61612);
        assert!(opts.randomize);
        assert_eq!(opts.retry_attempts, 3);
        assert_eq!(opts.buffer, BufferStrategy::Receipts);
    }

    #[test]
    fn bare_list_and_slashes() {
        let (brokers, opts) =
            parse_failover_uri("failover:stomp://a,stomp://b?retryDelay=250").unwrap();
        assert_eq!(brokers.len(), 2);
        assert_eq!(opts.retry_delay, Duration::from_millis(250));

        let (brokers, _) = parse_failover_uri("failover://(stomp://a,stomp://b)").unwrap();
        assert_eq!(brokers[1].host, "b");
    }

    #[test]
    fn plain_broker_uri_is_a_pool_of_one() {
        let (brokers, opts) = parse_failover_uri("stomp://guest:pw@localhost").unwrap();
        assert_eq!(brokers.len(), 1);
        assert_eq!(brokers[0].login.as_deref(), Some("guest"));
        assert_eq!(opts.retry_attempts, 0);
    }

    #[test]
    fn rejects_bad_values_and_empty_lists() {
        assert!(matches!(
            parse_failover_uri("failover:(stomp://a)?retryAttempts=lots"),
            Err(FailoverError::InvalidUri(_))
        ));
        assert!(matches!(
            parse_failover_uri("failover:()"),
            Err(FailoverError::InvalidUri(_))
        ));
        assert!(matches!(
            parse_failover_uri("failover:(stomp://a"),
            Err(FailoverError::InvalidUri(_))
        ));
    }
}
