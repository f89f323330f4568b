use std::path::PathBuf;
use std::time::Duration;

/// Settings for the bundled [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Limit on each dial attempt.
    pub connect_timeout: Duration,
    /// Limit on sending a request and receiving the response head.
    pub request_timeout: Duration,
    /// PEM file with the trusted roots. The webpki roots are used when unset.
    pub certificate_path: Option<PathBuf>,
    /// Allow insecure server connections.
    pub skip_certificate_validate: bool,
    /// Idle connections kept per `scheme://host:port`. Zero disables reuse.
    pub pool_max_idle_per_host: usize,
    /// Idle connections older than this are closed instead of reused.
    pub pool_idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            certificate_path: None,
            skip_certificate_validate: false,
            pool_max_idle_per_host: 8,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl TransportConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificate_path = Some(path.into());
        self
    }

    pub fn with_skip_certificate_validate(mut self, skip: bool) -> Self {
        self.skip_certificate_validate = skip;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }
}
