use super::SequenceCache;
use crate::{
    context::Context,
    error::{Error, Result},
};
use core::time::Duration;
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::OnceCell;

pub const DEFAULT_IDS_KEY: &str = "shortener:sequence:ids";
pub const DEFAULT_STATE_KEY: &str = "shortener:sequence:state";

/// Bound on a single attempt to open the Redis connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Reconnect attempts after the first failed connect.
pub const DEFAULT_CONNECT_RETRIES: usize = 1;

const OP_CONNECT: &str = "redis connect";
const OP_GET: &str = "redis get";
const OP_FILL: &str = "redis fill";
const OP_PING: &str = "redis ping";
const OP_LEN: &str = "redis len";

/// Key names used by [`RedisSequenceCache`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisKeys {
    /// List of pending ids, oldest at the head.
    pub ids: String,
    /// Unix timestamp (seconds) of the last successful fill.
    pub state: String,
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self {
            ids: DEFAULT_IDS_KEY.to_owned(),
            state: DEFAULT_STATE_KEY.to_owned(),
        }
    }
}

impl RedisKeys {
    /// Keys sharing a common `prefix`, e.g. `"{prefix}:ids"`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            ids: format!("{prefix}:ids"),
            state: format!("{prefix}:state"),
        }
    }
}

/// A shared FIFO of ids stored as a Redis list.
///
/// Ids are decimal strings. Reads use `LPOP`; fills `RPUSH` the whole slice
/// and stamp the state key inside one `MULTI`/`EXEC` block, so a fill is
/// either fully visible or not at all.
///
/// The connection is opened lazily on first use and then managed by
/// [`ConnectionManager`], which reconnects on its own. Opening it is bounded
/// by the connect timeout and [`DEFAULT_CONNECT_RETRIES`], so a Redis that is
/// down makes operations fail with [`Error::Cache`] within a few seconds; it
/// never prevents construction. A failed connect is retried on the next
/// operation.
pub struct RedisSequenceCache {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    keys: RedisKeys,
    connect_timeout: Duration,
}

impl core::fmt::Debug for RedisSequenceCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisSequenceCache")
            .field("connected", &self.conn.initialized())
            .field("keys", &self.keys)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisSequenceCache {
    /// Parses `url` without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the URL is not a valid Redis URL.
    pub fn connect(url: &str, keys: RedisKeys) -> Result<Self> {
        let client = Client::open(url).map_err(|e| Error::cache(OP_CONNECT, e))?;
        Ok(Self::from_client(client, keys))
    }

    pub fn from_client(client: Client, keys: RedisKeys) -> Self {
        Self {
            client,
            conn: OnceCell::new(),
            keys,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the bound on each connection attempt. Zero keeps the
    /// current value.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.connect_timeout = timeout;
        }
        self
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.connect_timeout)
                    .set_number_of_retries(DEFAULT_CONNECT_RETRIES);
                let conn = ConnectionManager::new_with_config(self.client.clone(), config)
                    .await
                    .map_err(|e| Error::cache(OP_CONNECT, e))?;
                #[cfg(feature = "tracing")]
                tracing::info!(ids_key = %self.keys.ids, "connected to redis");
                Ok::<_, Error>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    /// Number of ids currently in the list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] or [`Error::Timeout`].
    pub async fn len(&self, ctx: &Context) -> Result<usize> {
        ctx.run(OP_LEN, async {
            let mut conn = self.connection().await?;
            conn.llen(&self.keys.ids)
                .await
                .map_err(|e| Error::cache(OP_LEN, e))
        })
        .await
    }
}

fn parse_id(raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| Error::system(OP_GET, format!("malformed id {raw:?} in shared cache: {e}")))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

impl SequenceCache for RedisSequenceCache {
    async fn get_single_id(&self, ctx: &Context) -> Result<u64> {
        ctx.run(OP_GET, async {
            let mut conn = self.connection().await?;
            let raw: Option<String> = conn
                .lpop(&self.keys.ids, None)
                .await
                .map_err(|e| Error::cache(OP_GET, e))?;
            match raw {
                Some(raw) => parse_id(&raw),
                None => Err(Error::not_found(OP_GET)),
            }
        })
        .await
    }

    async fn fill_ids(&self, ctx: &Context, ids: &[u64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let values: Vec<String> = ids.iter().map(u64::to_string).collect();
        ctx.run(OP_FILL, async {
            let mut conn = self.connection().await?;
            redis::pipe()
                .atomic()
                .rpush(&self.keys.ids, &values)
                .ignore()
                .set(&self.keys.state, unix_now())
                .ignore()
                .exec_async(&mut conn)
                .await
                .map_err(|e| Error::cache(OP_FILL, e))
        })
        .await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(count = ids.len(), first = ids[0], "filled shared cache");
        Ok(ids.len())
    }

    async fn is_ok(&self, ctx: &Context) -> bool {
        let res = ctx
            .run(OP_PING, async {
                let mut conn = self.connection().await?;
                redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .map_err(|e| Error::cache(OP_PING, e))
            })
            .await;
        match res {
            Ok(_) => true,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_e, "shared cache health check failed");
                false
            }
        }
    }

    async fn is_less_than_threshold(&self, ctx: &Context, threshold: usize) -> Result<bool> {
        Ok(self.len(ctx).await? < threshold)
    }
}
