use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;
use tickstone::{
    ALLOCATION_BUFFER_SIZE, AllocatorConfig, DEFAULT_PING_TIMEOUT, DEFAULT_REFILL_ATTEMPTS,
    MAX_REQUEST_RANGE_SIZE, RetryPolicy, ServiceConfig,
};

/// Runtime configuration for the `tickstone-server` binary.
///
/// Every option can be given on the command line or through the environment
/// (including a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tickstone-server",
    version,
    about = "An HTTP timestamp oracle with a durable upper bound"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// File holding the persisted upper bound. Created on first use.
    ///
    /// Environment variable: `STORE_PATH`
    #[arg(long, env = "STORE_PATH", default_value = "tickstone-bound.json")]
    pub store_path: PathBuf,

    /// Timestamps reserved ahead of demand on each refill.
    ///
    /// Environment variable: `BUFFER_SIZE`
    #[arg(long, env = "BUFFER_SIZE", default_value_t = ALLOCATION_BUFFER_SIZE)]
    pub buffer_size: u64,

    /// Largest range a single request may obtain. Larger requests are
    /// clamped. Must not exceed `BUFFER_SIZE`.
    ///
    /// Environment variable: `MAX_REQUEST_RANGE`
    #[arg(long, env = "MAX_REQUEST_RANGE", default_value_t = MAX_REQUEST_RANGE_SIZE)]
    pub max_request_range: u64,

    /// Synchronous refills a request may trigger before it fails.
    ///
    /// Environment variable: `MAX_REFILL_ATTEMPTS`
    #[arg(long, env = "MAX_REFILL_ATTEMPTS", default_value_t = DEFAULT_REFILL_ATTEMPTS)]
    pub max_refill_attempts: u32,

    /// Attempts per store write before it is reported as unavailable.
    ///
    /// Environment variable: `STORE_RETRY_ATTEMPTS`
    #[arg(long, env = "STORE_RETRY_ATTEMPTS", default_value_t = 10)]
    pub store_retry_attempts: u32,

    /// Bound file of a previous oracle to take over on startup. It is
    /// invalidated and this oracle continues strictly above it.
    ///
    /// Environment variable: `MIGRATE_FROM`
    #[arg(long, env = "MIGRATE_FROM")]
    pub migrate_from: Option<PathBuf>,

    /// Timeout in milliseconds for the pre-migration ping.
    ///
    /// Environment variable: `PING_TIMEOUT_MS`
    #[arg(long, env = "PING_TIMEOUT_MS", default_value_t = DEFAULT_PING_TIMEOUT.as_millis() as u64)]
    pub ping_timeout_ms: u64,

    /// Seconds to wait for the service to stop after a shutdown signal.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub store_path: PathBuf,
    pub migrate_from: Option<PathBuf>,
    pub allocator: AllocatorConfig,
    pub service: ServiceConfig,
    pub retry: RetryPolicy,
    pub ping_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.buffer_size == 0 {
            bail!("BUFFER_SIZE must be greater than 0");
        }
        if args.max_request_range == 0 {
            bail!("MAX_REQUEST_RANGE must be greater than 0");
        }
        if args.max_request_range > args.buffer_size {
            bail!(
                "MAX_REQUEST_RANGE ({}) exceeds BUFFER_SIZE ({})",
                args.max_request_range,
                args.buffer_size
            );
        }
        if args.store_retry_attempts == 0 {
            bail!("STORE_RETRY_ATTEMPTS must be greater than 0");
        }
        if args.ping_timeout_ms == 0 {
            bail!("PING_TIMEOUT_MS must be greater than 0");
        }
        if args.migrate_from.as_ref() == Some(&args.store_path) {
            bail!("MIGRATE_FROM must not be the same file as STORE_PATH");
        }

        let retry = RetryPolicy {
            max_attempts: args.store_retry_attempts,
            ..RetryPolicy::default()
        };
        let allocator = AllocatorConfig::default()
            .with_buffer_size(args.buffer_size)
            .with_retry(retry);
        let service = ServiceConfig {
            max_request_range: args.max_request_range,
            max_refill_attempts: args.max_refill_attempts,
            ..ServiceConfig::default()
        };

        Ok(Self {
            server_addr: args.server_addr,
            store_path: args.store_path,
            migrate_from: args.migrate_from,
            allocator,
            service,
            retry,
            ping_timeout: Duration::from_millis(args.ping_timeout_ms),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
