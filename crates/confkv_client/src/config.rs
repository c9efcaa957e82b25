//! Configuration for store connections and the transaction engine.

use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Store endpoints as `host:port`, tried in order.
    pub endpoints: Vec<String>,
    /// Upper bound on establishing a connection, across all endpoints.
    pub dial_timeout: Duration,
    /// Upper bound on a single store round trip.
    pub request_timeout: Duration,
    /// Service name; used as the key namespace when non-empty.
    pub service_name: String,
    /// Transport security.
    pub tls: TlsConfig,
    /// Conflict retry policy for transactions.
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Creates a configuration for the given endpoints.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            dial_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            service_name: String::new(),
            tls: TlsConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Sets the TLS configuration.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

/// Transport security settings.
///
/// When enabled, all three paths are required and must contain PEM material:
/// the client certificate chain, its private key, and the CA bundle used to
/// verify the store.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Whether to use TLS.
    pub enabled: bool,
    /// Client certificate chain (PEM).
    pub cert_path: Option<PathBuf>,
    /// Client private key (PEM).
    pub key_path: Option<PathBuf>,
    /// Trusted CA bundle (PEM).
    pub trusted_ca_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Creates an enabled TLS configuration.
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        trusted_ca_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            enabled: true,
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            trusted_ca_path: Some(trusted_ca_path.into()),
        }
    }

    /// Creates a disabled TLS configuration.
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Configuration for conflict retries.
///
/// Only commit conflicts are retried. `max_attempts` counts every attempt,
/// including the first one.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Retries immediately, without backoff.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            add_jitter: false,
            ..Self::new(max_attempts)
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Negative and NaN values are treated
    /// as 0.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(0.0);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        // Fields are public, so a bad multiplier can still arrive here.
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        if self.add_jitter && delay_secs > 0.0 {
            let jitter = delay_secs * rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}
