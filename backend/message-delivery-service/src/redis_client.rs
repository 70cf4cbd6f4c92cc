use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};

/// Open a reconnecting connection to Redis.
///
/// Each caller gets its own connection; the delivery worker's blocking reads
/// must not share one with the request path.
pub async fn connect(url: &str) -> RedisResult<ConnectionManager> {
    let client = Client::open(url)?;
    ConnectionManager::new(client).await
}
