//! Dispatch server configuration.

/// Dispatch server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// gRPC server bind address.
    pub bind_addr: String,

    /// HTTP (health/metrics) bind address.
    pub http_bind_addr: String,

    /// Number of worker loops draining the task queue.
    pub worker_count: usize,

    /// Tasks that may wait in the queue before submissions are rejected.
    pub queue_capacity: usize,

    /// Finished task results retained for retrieval.
    pub result_capacity: usize,

    /// Secret used to sign bearer tokens.
    pub token_secret: String,

    /// Bearer token lifetime (seconds).
    pub token_ttl_secs: u64,

    /// Require a valid bearer token on dispatch calls.
    pub require_auth: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "[::1]:50051".to_string(),
            http_bind_addr: "[::1]:9090".to_string(),
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_capacity: 1024,
            result_capacity: 10_000,
            token_secret: String::new(),
            token_ttl_secs: 24 * 3600,
            require_auth: true,
        }
    }
}
