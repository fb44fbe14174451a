use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use seqalloc::{
    AllocatorOptions, DEFAULT_CACHE_THRESHOLD, DEFAULT_EXTERN_PATCH, DEFAULT_IDS_KEY,
    DEFAULT_LOCAL_CAPACITY, DEFAULT_LOCAL_PATCH, DEFAULT_LOCAL_THRESHOLD, DEFAULT_MAX_RETRIES,
    DEFAULT_STATE_KEY, MAX_LOCAL_CAPACITY, RedisKeys,
};

/// Runtime configuration for the `seqalloc-server` binary.
///
/// Every value can be given on the command line or through the environment
/// (a `.env` file is honoured). Defaults match the library defaults, so only
/// the connection URLs usually need setting.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "seqalloc-server",
    version,
    about = "An HTTP service handing out unique sequence IDs"
)]
pub struct CliArgs {
    /// Durable store URL (`sqlite://`, `postgres://` or `mysql://`).
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum pooled database connections.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub database_max_connections: u32,

    /// Name of the counter row to allocate from.
    ///
    /// Environment variable: `COUNTER_NAME`
    #[arg(long, env = "COUNTER_NAME", default_value_t = String::from("short_url"))]
    pub counter_name: String,

    /// First id handed out when the counter row is created. Ignored when
    /// the row already exists.
    ///
    /// Environment variable: `COUNTER_START`
    #[arg(long, env = "COUNTER_START", default_value_t = 1)]
    pub counter_start: u64,

    /// Shared cache URL.
    ///
    /// Environment variable: `REDIS_URL`
    #[arg(long, env = "REDIS_URL", default_value_t = String::from("redis://127.0.0.1:6379/"))]
    pub redis_url: String,

    /// Redis list holding pending ids.
    ///
    /// Environment variable: `REDIS_IDS_KEY`
    #[arg(long, env = "REDIS_IDS_KEY", default_value_t = String::from(DEFAULT_IDS_KEY))]
    pub redis_ids_key: String,

    /// Redis key stamped with the time of the last fill.
    ///
    /// Environment variable: `REDIS_STATE_KEY`
    #[arg(long, env = "REDIS_STATE_KEY", default_value_t = String::from(DEFAULT_STATE_KEY))]
    pub redis_state_key: String,

    /// Bound on each attempt to connect to the shared cache, in milliseconds.
    ///
    /// Environment variable: `REDIS_CONNECT_TIMEOUT_MS`
    #[arg(long, env = "REDIS_CONNECT_TIMEOUT_MS", default_value_t = 1000)]
    pub redis_connect_timeout_ms: u64,

    /// Capacity of the in-process ring buffer.
    ///
    /// Environment variable: `LOCAL_CAPACITY`
    #[arg(long, env = "LOCAL_CAPACITY", default_value_t = DEFAULT_LOCAL_CAPACITY)]
    pub local_capacity: usize,

    /// Upper bound on a single ring buffer operation, in milliseconds.
    ///
    /// Environment variable: `LOCAL_OP_TIMEOUT_MS`
    #[arg(long, env = "LOCAL_OP_TIMEOUT_MS", default_value_t = 100)]
    pub local_op_timeout_ms: u64,

    /// Attempts for retried shared-cache checks.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[arg(long, env = "MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Base backoff between retries, in milliseconds.
    ///
    /// Environment variable: `RETRY_BACKOFF_MS`
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value_t = 50)]
    pub retry_backoff_ms: u64,

    /// Ids reserved when the shared cache runs dry.
    ///
    /// Environment variable: `EXTERN_PATCH`
    #[arg(long, env = "EXTERN_PATCH", default_value_t = DEFAULT_EXTERN_PATCH)]
    pub extern_patch: u64,

    /// Shared cache low-water mark.
    ///
    /// Environment variable: `CACHE_THRESHOLD`
    #[arg(long, env = "CACHE_THRESHOLD", default_value_t = DEFAULT_CACHE_THRESHOLD)]
    pub cache_threshold: usize,

    /// Local buffer low-water mark.
    ///
    /// Environment variable: `LOCAL_THRESHOLD`
    #[arg(long, env = "LOCAL_THRESHOLD", default_value_t = DEFAULT_LOCAL_THRESHOLD)]
    pub local_threshold: usize,

    /// Ids reserved when the local buffer runs dry.
    ///
    /// Environment variable: `LOCAL_PATCH`
    #[arg(long, env = "LOCAL_PATCH", default_value_t = DEFAULT_LOCAL_PATCH)]
    pub local_patch: u64,

    /// Deadline for one `next` request, in milliseconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 1000)]
    pub request_timeout_ms: u64,

    /// Period of the probe and top-up task, in milliseconds.
    ///
    /// Environment variable: `MAINTENANCE_INTERVAL_MS`
    #[arg(long, env = "MAINTENANCE_INTERVAL_MS", default_value_t = 1000)]
    pub maintenance_interval_ms: u64,

    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub counter_name: String,
    pub counter_start: u64,
    pub redis_url: String,
    pub redis_keys: RedisKeys,
    pub redis_connect_timeout: Duration,
    pub local_capacity: usize,
    pub local_op_timeout: Duration,
    pub allocator: AllocatorOptions,
    pub request_timeout: Duration,
    pub maintenance_interval: Duration,
    pub server_addr: String,
}

fn millis(name: &str, value: u64) -> anyhow::Result<Duration> {
    if value == 0 {
        bail!("{name} must be greater than 0");
    }
    Ok(Duration::from_millis(value))
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.database_max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if args.counter_name.is_empty() {
            bail!("COUNTER_NAME must not be empty");
        }
        if args.redis_ids_key.is_empty() || args.redis_state_key.is_empty() {
            bail!("REDIS_IDS_KEY and REDIS_STATE_KEY must not be empty");
        }
        if args.redis_ids_key == args.redis_state_key {
            bail!("REDIS_IDS_KEY and REDIS_STATE_KEY must differ");
        }
        if args.local_capacity == 0 {
            bail!("LOCAL_CAPACITY must be greater than 0");
        }
        if args.local_capacity > MAX_LOCAL_CAPACITY {
            bail!(
                "LOCAL_CAPACITY ({}) exceeds the maximum of {}",
                args.local_capacity,
                MAX_LOCAL_CAPACITY
            );
        }
        if args.extern_patch == 0 || args.local_patch == 0 {
            bail!("EXTERN_PATCH and LOCAL_PATCH must be greater than 0");
        }
        if args.local_threshold > args.local_capacity {
            bail!(
                "LOCAL_THRESHOLD ({}) exceeds LOCAL_CAPACITY ({})",
                args.local_threshold,
                args.local_capacity
            );
        }

        let allocator = AllocatorOptions::default()
            .with_max_retries(args.max_retries)
            .with_retry_backoff(millis("RETRY_BACKOFF_MS", args.retry_backoff_ms)?)
            .with_extern_patch(args.extern_patch)
            .with_cache_threshold(args.cache_threshold)
            .with_local_threshold(args.local_threshold)
            .with_local_patch(args.local_patch);

        // Top-up pushes a whole batch into a buffer holding up to
        // threshold - 1 ids, so both together must fit.
        let effective = allocator.with_defaults();
        let local_patch_limit = args
            .local_capacity
            .saturating_sub(effective.local_threshold.saturating_sub(1))
            as u64;
        if effective.local_patch > local_patch_limit {
            bail!(
                "LOCAL_PATCH ({}) would overflow LOCAL_CAPACITY ({}) above LOCAL_THRESHOLD ({}); at most {} fits",
                effective.local_patch,
                args.local_capacity,
                effective.local_threshold,
                local_patch_limit
            );
        }

        Ok(Self {
            database_url: args.database_url,
            database_max_connections: args.database_max_connections,
            counter_name: args.counter_name,
            counter_start: args.counter_start,
            redis_url: args.redis_url,
            redis_keys: RedisKeys {
                ids: args.redis_ids_key,
                state: args.redis_state_key,
            },
            redis_connect_timeout: millis("REDIS_CONNECT_TIMEOUT_MS", args.redis_connect_timeout_ms)?,
            local_capacity: args.local_capacity,
            local_op_timeout: millis("LOCAL_OP_TIMEOUT_MS", args.local_op_timeout_ms)?,
            allocator,
            request_timeout: millis("REQUEST_TIMEOUT_MS", args.request_timeout_ms)?,
            maintenance_interval: millis("MAINTENANCE_INTERVAL_MS", args.maintenance_interval_ms)?,
            server_addr: args.server_addr,
        })
    }
}
