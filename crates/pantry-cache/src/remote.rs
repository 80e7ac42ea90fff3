//! Redis-backed cache tier

use async_trait::async_trait;
use pantry_records::EntityType;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::tier::{cache_key, CacheEntry, CacheStats, CacheTier, CachedValue};

const SCAN_BATCH: usize = 500;
/// Bound on establishing the shared connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on each SCAN or DEL round-trip of `flush`/`invalidate_all`
pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache tier stored in Redis as JSON strings with `EX` expiry.
///
/// One multiplexed connection is opened by [`RedisCacheTier::connect`] and
/// shared by every command; it reconnects in the background after an I/O
/// error. Point commands are bounded by `timeout`. Keyspace walks bound each
/// round-trip by `admin_timeout` instead, so a large flush is not cut short
/// by the read budget.
pub struct RedisCacheTier {
    conn: ConnectionManager,
    prefix: String,
    timeout: Duration,
    admin_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl RedisCacheTier {
    pub async fn connect(url: &str, prefix: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Config(format!("invalid redis url: {}", e)))?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(CONNECT_TIMEOUT)
            .set_number_of_retries(2);
        let conn = match tokio::time::timeout(
            CONNECT_TIMEOUT,
            ConnectionManager::new_with_config(client, config),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(CacheError::from(e)),
            Err(_) => return Err(CacheError::Timeout(CONNECT_TIMEOUT)),
        };
        info!("Connected to redis cache");

        Ok(Self {
            conn,
            prefix: prefix.into(),
            timeout,
            admin_timeout: DEFAULT_ADMIN_TIMEOUT,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    /// Per round-trip bound for `flush` and `invalidate_all`
    pub fn with_admin_timeout(mut self, admin_timeout: Duration) -> Self {
        self.admin_timeout = admin_timeout;
        self
    }

    fn key(&self, entity_type: EntityType, identifier: &str) -> String {
        cache_key(&self.prefix, entity_type, identifier)
    }

    /// Run one round-trip on the shared connection under `limit`
    async fn run<T, F, Fut>(&self, limit: Duration, op: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = std::result::Result<T, redis::RedisError>>,
    {
        let result = match timeout(limit, op(self.conn.clone())).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(CacheError::from(e)),
            Err(_) => Err(CacheError::Timeout(limit)),
        };
        if let Err(e) = &result {
            self.errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Redis command failed");
        }
        result
    }

    /// Delete every key matching `pattern`, walking the keyspace with SCAN.
    /// Each SCAN and DEL gets its own `admin_timeout`.
    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run(self.admin_timeout, |mut conn| async move {
                    let page: (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    Ok(page)
                })
                .await?;
            if !keys.is_empty() {
                let removed: u64 = self
                    .run(self.admin_timeout, |mut conn| async move {
                        let removed: u64 = conn.del(&keys).await?;
                        Ok(removed)
                    })
                    .await?;
                deleted += removed;
            }
            if next == 0 {
                return Ok(deleted);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl CacheTier for RedisCacheTier {
    async fn get(&self, entity_type: EntityType, identifier: &str) -> Result<Option<CacheEntry>> {
        let key = self.key(entity_type, identifier);
        let raw: Option<String> = self
            .run(self.timeout, move |mut conn| async move {
                let raw: Option<String> = conn.get(key).await?;
                Ok(raw)
            })
            .await?;

        let entry = match raw {
            Some(json) => {
                let entry: CacheEntry = serde_json::from_str(&json).map_err(|e| {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    CacheError::from(e)
                })?;
                Some(entry).filter(|e| !e.is_expired())
            }
            None => None,
        };

        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(entry)
    }

    async fn put(
        &self,
        entity_type: EntityType,
        identifier: &str,
        value: CachedValue,
        ttl: Duration,
    ) -> Result<()> {
        let key = self.key(entity_type, identifier);
        let json = serde_json::to_string(&CacheEntry::new(value, ttl))?;
        // Redis rejects EX 0; round sub-second TTLs up
        let secs = ttl.as_secs().max(1);
        self.run(self.timeout, move |mut conn| async move {
            let _: () = conn.set_ex(key, json, secs).await?;
            Ok(())
        })
        .await
    }

    async fn invalidate(&self, entity_type: EntityType, identifier: &str) -> Result<()> {
        let key = self.key(entity_type, identifier);
        self.run(self.timeout, move |mut conn| async move {
            let _: u64 = conn.del(key).await?;
            Ok(())
        })
        .await
    }

    async fn invalidate_all(&self, entity_type: EntityType) -> Result<()> {
        let pattern = format!("{}:{}:*", self.prefix, entity_type);
        let deleted = self.delete_matching(&pattern).await?;
        debug!(entity_type = %entity_type, deleted, "Invalidated cached entity type");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let deleted = self.delete_matching(&format!("{}:*", self.prefix)).await?;
        debug!(deleted, "Flushed redis cache");
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            backend: "redis",
            entries: None,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Minimal RESP2 server: enough of CLIENT, GET, SETEX, DEL and SCAN for
    /// the tier. SCAN pages over the keys present at startup, two per call.
    struct StubRedis {
        url: String,
        keys: Arc<Mutex<BTreeMap<String, String>>>,
        connections: Arc<AtomicUsize>,
    }

    async fn stub_redis(keys: &[&str], scan_delay: Duration) -> StubRedis {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}/", listener.local_addr().unwrap());
        let store: BTreeMap<String, String> = keys
            .iter()
            .map(|k| (k.to_string(), "{}".to_string()))
            .collect();
        let initial: Arc<Vec<String>> = Arc::new(store.keys().cloned().collect());
        let keys = Arc::new(Mutex::new(store));
        let connections = Arc::new(AtomicUsize::new(0));

        let (shared, accepted) = (keys.clone(), connections.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let (keys, initial) = (shared.clone(), initial.clone());
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut read = BufReader::new(read);
                    while let Some(args) = read_command(&mut read).await {
                        let reply = answer(&args, &keys, &initial, scan_delay).await;
                        if write.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        StubRedis {
            url,
            keys,
            connections,
        }
    }

    async fn read_command<R: AsyncBufReadExt + Unpin>(read: &mut R) -> Option<Vec<String>> {
        let mut line = String::new();
        read.read_line(&mut line).await.ok()?;
        let count: usize = line.trim().strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            read.read_line(&mut line).await.ok()?;
            let len: usize = line.trim().strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0; len + 2];
            read.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(String::from_utf8(buf).ok()?);
        }
        Some(args)
    }

    fn bulk(s: &str) -> String {
        format!("${}\r\n{}\r\n", s.len(), s)
    }

    async fn answer(
        args: &[String],
        keys: &Mutex<BTreeMap<String, String>>,
        initial: &[String],
        scan_delay: Duration,
    ) -> String {
        match args[0].to_uppercase().as_str() {
            "CLIENT" => "+OK\r\n".to_string(),
            "GET" => match keys.lock().unwrap().get(&args[1]) {
                Some(v) => bulk(v),
                None => "$-1\r\n".to_string(),
            },
            "SETEX" => {
                keys.lock().unwrap().insert(args[1].clone(), args[3].clone());
                "+OK\r\n".to_string()
            }
            "DEL" => {
                let mut keys = keys.lock().unwrap();
                let removed = args[1..].iter().filter(|k| keys.remove(*k).is_some()).count();
                format!(":{}\r\n", removed)
            }
            "SCAN" => {
                tokio::time::sleep(scan_delay).await;
                let cursor: usize = args[1].parse().unwrap();
                let prefix = args[3].trim_end_matches('*');
                let matching: Vec<&String> =
                    initial.iter().filter(|k| k.starts_with(prefix)).collect();
                let page: Vec<&String> = matching.iter().skip(cursor).take(2).copied().collect();
                let next = if cursor + 2 >= matching.len() { 0 } else { cursor + 2 };
                let mut reply = format!("*2\r\n{}*{}\r\n", bulk(&next.to_string()), page.len());
                for key in page {
                    reply.push_str(&bulk(key));
                }
                reply
            }
            _ => "-ERR unknown command\r\n".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_url() {
        let err = RedisCacheTier::connect("not a url", "pantry", Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error_not_a_panic() {
        // Port 1 is never a redis server
        let result =
            RedisCacheTier::connect("redis://127.0.0.1:1/", "test", Duration::from_millis(200))
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_commands_share_one_connection() {
        let server = stub_redis(&[], Duration::ZERO).await;
        let tier = RedisCacheTier::connect(&server.url, "test", Duration::from_millis(500))
            .await
            .unwrap();

        tier.put(
            EntityType::PricePoint,
            "7",
            CachedValue::Negative,
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        let entry = tier.get(EntityType::PricePoint, "7").await.unwrap();
        assert_eq!(entry.map(|e| e.value), Some(CachedValue::Negative));
        tier.invalidate(EntityType::PricePoint, "7").await.unwrap();
        assert!(tier.get(EntityType::PricePoint, "7").await.unwrap().is_none());

        assert_eq!(server.connections.load(Ordering::SeqCst), 1);
        assert_eq!(tier.stats().hits, 1);
        assert_eq!(tier.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_flush_outlasts_point_command_timeout() {
        let keys = [
            "test:establishment:1",
            "test:establishment:2",
            "test:establishment:3",
            "test:nutrition_fact:5000112637922",
            "test:price_point:7",
            "test:price_point:8",
            "other:price_point:9",
        ];
        // Three SCAN pages at 40ms each take longer than the 50ms point timeout
        let server = stub_redis(&keys, Duration::from_millis(40)).await;
        let tier = RedisCacheTier::connect(&server.url, "test", Duration::from_millis(50))
            .await
            .unwrap();

        tier.flush().await.unwrap();

        let left: Vec<String> = server.keys.lock().unwrap().keys().cloned().collect();
        assert_eq!(left, vec!["other:price_point:9".to_string()]);
        assert_eq!(tier.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_invalidate_all_only_touches_one_entity_type() {
        let keys = ["test:establishment:1", "test:establishment:2", "test:price_point:7"];
        let server = stub_redis(&keys, Duration::ZERO).await;
        let tier = RedisCacheTier::connect(&server.url, "test", Duration::from_millis(500))
            .await
            .unwrap();

        tier.invalidate_all(EntityType::Establishment).await.unwrap();

        let left: Vec<String> = server.keys.lock().unwrap().keys().cloned().collect();
        assert_eq!(left, vec!["test:price_point:7".to_string()]);
    }

    #[tokio::test]
    async fn test_slow_round_trip_hits_admin_timeout() {
        let server = stub_redis(&["test:establishment:1"], Duration::from_millis(300)).await;
        let tier = RedisCacheTier::connect(&server.url, "test", Duration::from_millis(500))
            .await
            .unwrap()
            .with_admin_timeout(Duration::from_millis(50));

        let err = tier.flush().await.unwrap_err();
        assert!(matches!(err, CacheError::Timeout(_)));
        assert_eq!(tier.stats().errors, 1);
    }
}
