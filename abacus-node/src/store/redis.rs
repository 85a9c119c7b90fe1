// Redis-compatible store client
//
// Speaks just enough RESP2 for the counter protocol. The optimistic fence
// maps onto WATCH: a fence owns a pooled connection whose session carries the
// watch state, and the conditional commit is MULTI / SET / EXEC on that same
// connection. A nil EXEC reply means the watched key changed and the
// transaction was discarded.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use super::resp::{RespCodec, RespValue};
use super::{Commit, SharedStore, StoreStats};
use crate::config::StoreConfig;
use crate::error::{AbacusError, Result};

type Conn = Framed<TcpStream, RespCodec>;

/// Fence over a watched key
///
/// Owns the connection that issued WATCH; the watch lives in that
/// connection's session state, so the fence must carry it to EXEC.
pub struct RedisFence {
    conn: Conn,
}

/// [`SharedStore`] implementation backed by a Redis-compatible server
pub struct RedisStore {
    config: StoreConfig,
    pool: Mutex<Vec<Conn>>,
}

impl RedisStore {
    /// Connect to the store and verify it is reachable
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let store = Self {
            config,
            pool: Mutex::new(Vec::new()),
        };

        let mut conn = store.open_connection().await?;
        let reply = command(&mut conn, &[b"PING"]).await?;
        if !matches!(&reply, RespValue::Simple(s) if s == "PONG") {
            return Err(AbacusError::Protocol(format!(
                "unexpected PING reply: {reply:?}"
            )));
        }
        store.release(conn).await;

        info!(
            host = %store.config.host,
            port = store.config.port,
            db = store.config.db,
            "Connected to shared store"
        );
        Ok(store)
    }

    async fn open_connection(&self) -> Result<Conn> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| AbacusError::StoreUnavailable(format!("connect to {addr} timed out")))??;
        stream.set_nodelay(true)?;

        let mut conn = Framed::new(stream, RespCodec);
        if self.config.db != 0 {
            let db = self.config.db.to_string();
            let reply = command(&mut conn, &[b"SELECT", db.as_bytes()]).await?;
            if !reply.is_ok() {
                return Err(AbacusError::Protocol(format!(
                    "unexpected SELECT reply: {reply:?}"
                )));
            }
        }

        debug!(%addr, "Opened store connection");
        Ok(conn)
    }

    async fn acquire(&self) -> Result<Conn> {
        if let Some(conn) = self.pool.lock().await.pop() {
            return Ok(conn);
        }
        self.open_connection().await
    }

    /// Return a healthy connection to the pool
    ///
    /// Connections that erred mid-exchange are dropped instead of released;
    /// their session state (pending watch, half-sent transaction) is unknown.
    async fn release(&self, conn: Conn) {
        let mut pool = self.pool.lock().await;
        if pool.len() < self.config.pool_size {
            pool.push(conn);
        }
    }
}

/// Send one command and wait for its reply
async fn command(conn: &mut Conn, args: &[&[u8]]) -> Result<RespValue> {
    let frame: Vec<Bytes> = args.iter().map(|arg| Bytes::copy_from_slice(arg)).collect();
    conn.send(frame).await?;

    match conn.next().await {
        Some(Ok(RespValue::Error(msg))) => {
            Err(AbacusError::Protocol(format!("store error reply: {msg}")))
        }
        Some(Ok(reply)) => Ok(reply),
        Some(Err(err)) => Err(err.into()),
        None => Err(AbacusError::StoreUnavailable(
            "connection closed by store".to_string(),
        )),
    }
}

fn parse_counter(raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            AbacusError::Protocol(format!(
                "counter key holds a non-numeric value: {:?}",
                String::from_utf8_lossy(raw)
            ))
        })
}

/// Pull a numeric field out of an INFO dump; absent or malformed reads as 0
fn info_field(info: &str, field: &str) -> u64 {
    info.lines()
        .find_map(|line| {
            line.strip_prefix(field)
                .and_then(|rest| rest.strip_prefix(':'))
        })
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl SharedStore for RedisStore {
    type Fence = RedisFence;

    async fn read(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.acquire().await?;
        let reply = command(&mut conn, &[b"GET", key.as_bytes()]).await?;
        let value = match reply {
            RespValue::Bulk(Some(raw)) => Some(parse_counter(&raw)?),
            RespValue::Bulk(None) => None,
            other => {
                return Err(AbacusError::Protocol(format!(
                    "unexpected GET reply: {other:?}"
                )))
            }
        };
        self.release(conn).await;
        Ok(value)
    }

    async fn watch(&self, key: &str) -> Result<RedisFence> {
        let mut conn = self.acquire().await?;
        let reply = command(&mut conn, &[b"WATCH", key.as_bytes()]).await?;
        if !reply.is_ok() {
            return Err(AbacusError::Protocol(format!(
                "unexpected WATCH reply: {reply:?}"
            )));
        }
        Ok(RedisFence { conn })
    }

    async fn commit_if(&self, fence: RedisFence, key: &str, value: i64) -> Result<Commit> {
        let mut conn = fence.conn;

        let reply = command(&mut conn, &[b"MULTI"]).await?;
        if !reply.is_ok() {
            return Err(AbacusError::Protocol(format!(
                "unexpected MULTI reply: {reply:?}"
            )));
        }

        let value = value.to_string();
        let reply = command(&mut conn, &[b"SET", key.as_bytes(), value.as_bytes()]).await?;
        if !matches!(&reply, RespValue::Simple(s) if s == "QUEUED") {
            return Err(AbacusError::Protocol(format!(
                "unexpected queued-SET reply: {reply:?}"
            )));
        }

        // EXEC clears the watch whether it runs or aborts, so the
        // connection is reusable on both paths.
        let reply = command(&mut conn, &[b"EXEC"]).await?;
        match reply {
            RespValue::Array(Some(_)) => {
                self.release(conn).await;
                Ok(Commit::Committed)
            }
            RespValue::Array(None) => {
                self.release(conn).await;
                Ok(Commit::Conflict)
            }
            other => Err(AbacusError::Protocol(format!(
                "unexpected EXEC reply: {other:?}"
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.acquire().await?;
        let reply = command(&mut conn, &[b"DEL", key.as_bytes()]).await?;
        match reply {
            RespValue::Integer(_) => {
                self.release(conn).await;
                Ok(())
            }
            other => Err(AbacusError::Protocol(format!(
                "unexpected DEL reply: {other:?}"
            ))),
        }
    }

    async fn ping(&self) -> Result<bool> {
        let mut conn = self.acquire().await?;
        let reply = command(&mut conn, &[b"PING"]).await?;
        let alive = matches!(&reply, RespValue::Simple(s) if s == "PONG");
        self.release(conn).await;
        Ok(alive)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut conn = self.acquire().await?;
        let reply = command(&mut conn, &[b"INFO"]).await?;
        let raw = match reply {
            RespValue::Bulk(Some(raw)) => raw,
            other => {
                return Err(AbacusError::Protocol(format!(
                    "unexpected INFO reply: {other:?}"
                )))
            }
        };
        self.release(conn).await;

        let text = String::from_utf8_lossy(&raw);
        Ok(StoreStats {
            connected_clients: info_field(&text, "connected_clients"),
            commands_processed: info_field(&text, "total_commands_processed"),
            memory_used_bytes: info_field(&text, "used_memory"),
        })
    }
}
