//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! - **Stream per channel**: `<prefix>:<channel>`, appended with `XADD`
//! - **Consumer group per subscription**: created with `XGROUP CREATE … 0 MKSTREAM`
//!   so a new group starts from the beginning of the stream
//! - **Consumers**: one named consumer per [`Subscription`] handle; several
//!   handles on one group compete for entries
//! - **Redelivery**: entries left pending longer than the claim timeout
//!   (nacked, or owned by a crashed consumer) are taken over with `XCLAIM`;
//!   the attempt number comes from the entry's delivery count
//! - **Dead-letter queue**: `<prefix>:<channel>:dlq`, with reason, attempts
//!   and failure time
//!
//! Entry fields: `message_type`, `payload` (raw bytes) and `metadata` (JSON
//! object of string → string).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamReadReply};
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

use courier_events::{Acknowledger, Broker, BrokerError, Delivery, Envelope, Subscription};

/// Default key prefix for streams.
const DEFAULT_PREFIX: &str = "courier";

/// Pending entries idle longer than this are claimed for redelivery.
const DEFAULT_CLAIM_IDLE_MS: u64 = 60_000;

/// How long one `XREADGROUP` blocks waiting for new entries.
const DEFAULT_BLOCK_MS: u64 = 1_000;

const DEFAULT_BATCH: usize = 10;

/// Pause after a failed read before trying again.
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<RedisStreamsError> for BrokerError {
    fn from(err: RedisStreamsError) -> Self {
        match err {
            RedisStreamsError::Connection(e) => BrokerError::Unavailable(e),
            other => BrokerError::Settle(other.to_string()),
        }
    }
}

fn command_error(op: &str, e: redis::RedisError) -> RedisStreamsError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        RedisStreamsError::Connection(format!("{op}: {e}"))
    } else {
        RedisStreamsError::Command(format!("{op} failed: {e}"))
    }
}

#[derive(Debug)]
struct Inner {
    client: redis::Client,
    /// Shared connection for publishes; subscriptions open their own.
    publisher: OnceCell<MultiplexedConnection>,
    prefix: String,
    consumer_prefix: String,
    next_consumer: AtomicU64,
    claim_idle_ms: u64,
    block_ms: u64,
    batch: usize,
}

impl Inner {
    fn stream_key(&self, channel: &str) -> String {
        format!("{}:{}", self.prefix, channel)
    }

    fn dlq_key(&self, channel: &str) -> String {
        format!("{}:{}:dlq", self.prefix, channel)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisStreamsError> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, RedisStreamsError> {
        self.publisher
            .get_or_try_init(|| self.connection())
            .await
            .cloned()
    }
}

/// [`Broker`] over Redis Streams consumer groups.
#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    inner: Arc<Inner>,
}

impl RedisStreamsBroker {
    /// Validate `redis_url`; connections are opened on first use.
    ///
    /// `name` prefixes the consumer names registered in each group.
    pub fn open(redis_url: &str, name: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                publisher: OnceCell::new(),
                prefix: DEFAULT_PREFIX.to_string(),
                consumer_prefix: format!("{}-{}", name, std::process::id()),
                next_consumer: AtomicU64::new(0),
                claim_idle_ms: DEFAULT_CLAIM_IDLE_MS,
                block_ms: DEFAULT_BLOCK_MS,
                batch: DEFAULT_BATCH,
            }),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.prefix = prefix.into();
        }
        self
    }

    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.claim_idle_ms = idle.as_millis() as u64;
        }
        self
    }

    /// Ensure a consumer group exists (idempotent).
    async fn ensure_consumer_group(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
        group: &str,
    ) -> Result<(), RedisStreamsError> {
        // "0": a new group starts from the beginning of the stream.
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let metadata = serde_json::to_string(&envelope.metadata())
            .map_err(|e| BrokerError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        let mut conn = self.inner.publisher().await?;

        let _: String = redis::cmd("XADD")
            .arg(self.inner.stream_key(channel))
            .arg("*")
            .arg("message_type")
            .arg(envelope.message_type())
            .arg("payload")
            .arg(envelope.payload())
            .arg("metadata")
            .arg(&metadata)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Publish {
                channel: channel.to_string(),
                reason: command_error("XADD", e).to_string(),
            })?;

        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        subscription: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let subscribe_error = |e: RedisStreamsError| BrokerError::Subscribe {
            channel: channel.to_string(),
            subscription: subscription.to_string(),
            reason: e.to_string(),
        };

        let key = self.inner.stream_key(channel);
        // Own connection: XREADGROUP BLOCK must not stall publishers.
        let mut conn = self.inner.connection().await.map_err(subscribe_error)?;
        self.ensure_consumer_group(&mut conn, &key, subscription)
            .await
            .map_err(subscribe_error)?;

        let consumer = format!(
            "{}-{}",
            self.inner.consumer_prefix,
            self.inner.next_consumer.fetch_add(1, Ordering::Relaxed)
        );
        debug!(%key, group = subscription, %consumer, "joined consumer group");

        Ok(Box::new(RedisStreamsSubscription {
            inner: Arc::clone(&self.inner),
            conn,
            dlq_key: self.inner.dlq_key(channel),
            key,
            group: subscription.to_string(),
            consumer,
            buffer: VecDeque::new(),
            closed: false,
        }))
    }
}

/// Target of a settlement call.
#[derive(Debug, Clone)]
struct EntryRef {
    conn: MultiplexedConnection,
    key: String,
    dlq_key: String,
    group: String,
    entry_id: String,
}

struct RedisStreamsSubscription {
    inner: Arc<Inner>,
    conn: MultiplexedConnection,
    key: String,
    dlq_key: String,
    group: String,
    consumer: String,
    buffer: VecDeque<Delivery>,
    closed: bool,
}

impl RedisStreamsSubscription {
    /// Claim entries idle too long (redelivery after nack or consumer loss).
    async fn claim_stale(&mut self) -> Result<usize, RedisStreamsError> {
        // XPENDING key group IDLE ms - + count → [id, consumer, idle, deliveries]
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.inner.claim_idle_ms)
            .arg("-")
            .arg("+")
            .arg(self.inner.batch)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XPENDING", e))?;

        if pending.is_empty() {
            return Ok(0);
        }

        let deliveries: BTreeMap<String, u64> = pending
            .iter()
            .map(|(id, _, _, count)| (id.clone(), *count))
            .collect();
        let ids: Vec<String> = deliveries.keys().cloned().collect();

        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.inner.claim_idle_ms)
            .arg(&ids)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XCLAIM", e))?;

        let mut count = 0;
        for entry in claimed.ids {
            // XCLAIM bumps the delivery counter; this delivery is the next one.
            let previous = deliveries.get(&entry.id).copied().unwrap_or(0);
            let attempt = u32::try_from(previous + 1).unwrap_or(u32::MAX);
            if self.buffer_entry(entry, attempt).await {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn read_new(&mut self) -> Result<usize, RedisStreamsError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.inner.batch)
            .arg("BLOCK")
            .arg(self.inner.block_ms)
            .arg("STREAMS")
            .arg(&self.key)
            .arg(">")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        let mut count = 0;
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                if self.buffer_entry(entry, 1).await {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Queue a parsed entry; unparsable entries go straight to the DLQ.
    async fn buffer_entry(&mut self, entry: StreamId, attempt: u32) -> bool {
        let target = EntryRef {
            conn: self.conn.clone(),
            key: self.key.clone(),
            dlq_key: self.dlq_key.clone(),
            group: self.group.clone(),
            entry_id: entry.id.clone(),
        };

        match parse_entry(&entry) {
            Ok(envelope) => {
                let acker = RedisStreamsAcker {
                    target,
                    envelope: envelope.clone(),
                    attempt,
                    settled: AtomicBool::new(false),
                };
                self.buffer
                    .push_back(Delivery::new(envelope, attempt, Arc::new(acker)));
                true
            }
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "unparsable stream entry");
                let raw = entry
                    .get::<Vec<u8>>("payload")
                    .unwrap_or_default();
                if let Err(e) = dead_letter_raw(&target, &raw, None, attempt, &e.to_string()).await {
                    error!(entry_id = %entry.id, error = %e, "failed to dead-letter entry");
                }
                false
            }
        }
    }
}

#[async_trait]
impl Subscription for RedisStreamsSubscription {
    async fn next(&mut self) -> Option<Delivery> {
        loop {
            if self.closed {
                return None;
            }
            if let Some(delivery) = self.buffer.pop_front() {
                return Some(delivery);
            }

            let read = match self.claim_stale().await {
                Ok(0) => self.read_new().await,
                other => other,
            };
            if let Err(e) = read {
                error!(key = %self.key, group = %self.group, error = %e, "failed to read from stream");
                tokio::time::sleep(READ_RETRY_DELAY).await;
            }
        }
    }

    async fn close(&mut self) {
        // Buffered entries stay pending in the group and are claimed later.
        self.closed = true;
        self.buffer.clear();
    }
}

fn parse_entry(entry: &StreamId) -> Result<Envelope, RedisStreamsError> {
    let message_type: String = entry
        .get("message_type")
        .ok_or_else(|| RedisStreamsError::Deserialization("missing message_type field".into()))?;
    let payload: Vec<u8> = entry
        .get("payload")
        .ok_or_else(|| RedisStreamsError::Deserialization("missing payload field".into()))?;
    let metadata: String = entry
        .get("metadata")
        .ok_or_else(|| RedisStreamsError::Deserialization("missing metadata field".into()))?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)
        .map_err(|e| RedisStreamsError::Deserialization(format!("metadata: {e}")))?;

    Envelope::from_wire(message_type, payload, metadata)
        .map_err(|e| RedisStreamsError::Deserialization(e.to_string()))
}

/// Park an entry in the DLQ, then remove it from the group's pending list.
async fn dead_letter_raw(
    target: &EntryRef,
    payload: &[u8],
    envelope: Option<&Envelope>,
    attempts: u32,
    reason: &str,
) -> Result<(), RedisStreamsError> {
    let mut conn = target.conn.clone();

    let mut cmd = redis::cmd("XADD");
    cmd.arg(&target.dlq_key)
        .arg("*")
        .arg("original_entry_id")
        .arg(&target.entry_id)
        .arg("group")
        .arg(&target.group)
        .arg("reason")
        .arg(reason)
        .arg("attempts")
        .arg(attempts)
        .arg("failed_at")
        .arg(chrono::Utc::now().to_rfc3339())
        .arg("payload")
        .arg(payload);
    if let Some(envelope) = envelope {
        let metadata = serde_json::to_string(&envelope.metadata())
            .map_err(|e| RedisStreamsError::Deserialization(e.to_string()))?;
        cmd.arg("message_type")
            .arg(envelope.message_type())
            .arg("metadata")
            .arg(metadata);
    }
    let _: String = cmd
        .query_async(&mut conn)
        .await
        .map_err(|e| command_error("DLQ XADD", e))?;

    acknowledge(target).await
}

async fn acknowledge(target: &EntryRef) -> Result<(), RedisStreamsError> {
    let mut conn = target.conn.clone();
    let _: u64 = redis::cmd("XACK")
        .arg(&target.key)
        .arg(&target.group)
        .arg(&target.entry_id)
        .query_async(&mut conn)
        .await
        .map_err(|e| command_error("XACK", e))?;
    Ok(())
}

struct RedisStreamsAcker {
    target: EntryRef,
    envelope: Envelope,
    attempt: u32,
    settled: AtomicBool,
}

impl RedisStreamsAcker {
    fn first_settlement(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }
}

#[async_trait]
impl Acknowledger for RedisStreamsAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        if !self.first_settlement() {
            return Ok(());
        }
        acknowledge(&self.target).await?;
        Ok(())
    }

    async fn nack(&self, reason: &str) -> Result<(), BrokerError> {
        if !self.first_settlement() {
            return Ok(());
        }
        // Left pending on purpose: claimed again once idle long enough.
        debug!(entry_id = %self.target.entry_id, reason, "entry left pending for redelivery");
        Ok(())
    }

    async fn dead_letter(&self, reason: &str) -> Result<(), BrokerError> {
        if !self.first_settlement() {
            return Ok(());
        }
        dead_letter_raw(
            &self.target,
            self.envelope.payload(),
            Some(&self.envelope),
            self.attempt,
            reason,
        )
        .await?;
        warn!(
            entry_id = %self.target.entry_id,
            attempts = self.attempt,
            "message sent to dead-letter queue"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{CorrelationId, MessageId};
    use redis::Value;
    use std::collections::HashMap;

    fn entry(fields: &[(&str, &[u8])]) -> StreamId {
        let map: HashMap<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Data(v.to_vec())))
            .collect();
        StreamId {
            id: "1-0".to_string(),
            map,
        }
    }

    #[test]
    fn parses_an_entry_written_by_publish() {
        let id = MessageId::new();
        let envelope = Envelope::new(
            id,
            CorrelationId::root(id),
            None,
            "test.Ping",
            chrono::Utc::now(),
            br#"{"seq":1}"#.to_vec(),
        );
        let metadata = serde_json::to_string(&envelope.metadata()).unwrap();

        let parsed = parse_entry(&entry(&[
            ("message_type", b"test.Ping".as_slice()),
            ("payload", envelope.payload()),
            ("metadata", metadata.as_bytes()),
        ]))
        .unwrap();

        assert_eq!(parsed.message_id(), id);
        assert_eq!(parsed.message_type(), "test.Ping");
        assert_eq!(parsed.payload(), envelope.payload());
    }

    #[test]
    fn missing_fields_are_rejected() {
        let err = parse_entry(&entry(&[("message_type", b"test.Ping".as_slice())])).unwrap_err();
        assert!(matches!(err, RedisStreamsError::Deserialization(msg) if msg.contains("payload")));
    }

    #[test]
    fn open_rejects_non_redis_urls() {
        assert!(RedisStreamsBroker::open("http://localhost", "test").is_err());
        assert!(RedisStreamsBroker::open("redis://localhost:6379", "test").is_ok());
    }
}
