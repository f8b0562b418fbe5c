//! HTTP probe against a running service.
//!
//! Only connection failures are retried, including a connection the
//! service drops before answering. Once the service answers, its status
//! code and body are returned as-is, whatever the status, so that a
//! misbehaving application is reported instead of masked by a timeout.

use std::error::Error as _;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use shipcheck_common::config::RetryPolicy;
use shipcheck_common::constants::{PROBE_CONNECT_TIMEOUT_MS, PROBE_REQUEST_TIMEOUT_SECS};
use shipcheck_common::error::{HarnessError, Result};
use thiserror::Error;

use crate::retry::{self, Attempt, RetryError};

/// What the service answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// URL that was probed.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Attempts it took to get an answer.
    pub attempts: u32,
}

/// Why a probe produced no answer.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No connection succeeded within the attempt budget.
    #[error("no connection to {url} after {attempts} attempts ({elapsed:?}): {last}")]
    Timeout {
        /// URL that was probed.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Wall-clock time spent.
        elapsed: Duration,
        /// Last connection error.
        last: String,
    },
    /// The connection succeeded but the exchange failed.
    #[error("request to {url} failed: {message}")]
    Request {
        /// URL that was probed.
        url: String,
        /// Diagnostic message.
        message: String,
    },
}

/// Blocking HTTP prober with a bounded retry budget.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::blocking::Client,
    policy: RetryPolicy,
}

impl HttpProbe {
    /// Creates a probe with the given attempt budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_millis(PROBE_CONNECT_TIMEOUT_MS))
            .timeout(Duration::from_secs(PROBE_REQUEST_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HarnessError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, policy })
    }

    /// Probes `http://address:port/path` until a connection succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Timeout`] if no connection succeeds, or
    /// [`ProbeError::Request`] if an established exchange fails.
    pub fn probe(
        &self,
        address: &str,
        port: u16,
        path: &str,
    ) -> std::result::Result<ProbeResult, ProbeError> {
        let url = probe_url(address, port, path);
        tracing::info!(url = %url, max_attempts = self.policy.max_attempts, "probing");

        let result = retry::retry(self.policy, |attempt| self.attempt(&url, attempt));
        match result {
            Ok(retried) => {
                let (status, body) = retried.value;
                tracing::info!(url = %url, status, attempts = retried.attempts, "probe answered");
                Ok(ProbeResult {
                    url,
                    status,
                    body,
                    attempts: retried.attempts,
                })
            }
            Err(RetryError::Exhausted {
                attempts,
                elapsed,
                last,
            }) => Err(ProbeError::Timeout {
                url,
                attempts,
                elapsed,
                last,
            }),
            Err(RetryError::Aborted { error, .. }) => Err(error),
        }
    }

    fn attempt(&self, url: &str, attempt: u32) -> Attempt<(u16, String), ProbeError> {
        let started = Instant::now();
        match self.client.get(url).send() {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text() {
                    Ok(body) => Attempt::Ready((status, body)),
                    Err(e) => Attempt::Abort(ProbeError::Request {
                        url: url.to_string(),
                        message: format!("reading body: {e}"),
                    }),
                }
            }
            Err(e) if e.is_connect() || closed_before_response(&e) => {
                tracing::debug!(url, attempt, elapsed = ?started.elapsed(), error = %e, "connection failed");
                Attempt::Retry(e.to_string())
            }
            Err(e) => Attempt::Abort(ProbeError::Request {
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Returns whether the connection was dropped before any response arrived.
fn closed_before_response(error: &reqwest::Error) -> bool {
    let mut cause = error.source();
    while let Some(err) = cause {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        if err.to_string().contains("connection closed before message completed") {
            return true;
        }
        cause = err.source();
    }
    false
}

/// Formats the probe URL, bracketing IPv6 literals.
#[must_use]
pub fn probe_url(address: &str, port: u16, path: &str) -> String {
    let host = if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]")
    } else {
        address.to_string()
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("http://{host}:{port}{path}")
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn policy(max_attempts: u32, interval_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            interval: Duration::from_millis(interval_ms),
        }
    }

    fn serve_once(listener: TcpListener, status_line: &'static str, body: &'static str) {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0_u8; 2048];
        let _ = stream.read(&mut buf).unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).unwrap();
    }

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn url_formatting() {
        assert_eq!(probe_url("172.17.0.2", 8080, "/"), "http://172.17.0.2:8080/");
        assert_eq!(probe_url("fd00::2", 8080, "health"), "http://[fd00::2]:8080/health");
    }

    #[test]
    fn server_error_is_reported_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || serve_once(listener, "500 Internal Server Error", "boom"));

        let probe = HttpProbe::new(policy(20, 1000)).unwrap();
        let start = Instant::now();
        let result = probe.probe("127.0.0.1", port, "/").unwrap();
        server.join().unwrap();

        assert_eq!(result.status, 500);
        assert_eq!(result.body, "boom");
        assert_eq!(result.attempts, 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn refused_connection_times_out_within_budget() {
        let port = closed_port();
        let p = policy(3, 20);
        let probe = HttpProbe::new(p).unwrap();
        let start = Instant::now();
        let err = probe.probe("127.0.0.1", port, "/").unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { attempts: 3, .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn connection_dropped_before_answer_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0_u8; 2048];
            let _ = stream.read(&mut buf).unwrap();
            drop(stream);
            serve_once(listener, "200 OK", "Hello World");
        });

        let probe = HttpProbe::new(policy(10, 20)).unwrap();
        let result = probe.probe("127.0.0.1", port, "/").unwrap();
        server.join().unwrap();

        assert_eq!(result.status, 200);
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn late_listener_is_eventually_reached() {
        let port = closed_port();
        let server = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
            serve_once(listener, "200 OK", "Hello World");
        });

        let probe = HttpProbe::new(policy(100, 20)).unwrap();
        let result = probe.probe("127.0.0.1", port, "/").unwrap();
        server.join().unwrap();

        assert_eq!(result.status, 200);
        assert_eq!(result.body, "Hello World");
        assert!(result.attempts > 1);
    }
}
