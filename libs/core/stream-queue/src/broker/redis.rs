use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, RedisResult, Script};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::StreamBroker;
use crate::entry::{Fields, StreamEntry, delayed_key};
use crate::error::QueueError;

type RawEntries = Vec<(String, Vec<(String, String)>)>;
type ReadReply = Vec<(String, RawEntries)>;

/// Moves due members from `KEYS[1]` (sorted set) onto `KEYS[2]` (stream).
///
/// ARGV: now_ms, limit, maxlen. Each member is removed only after its XADD
/// succeeded; an XADD error aborts the script and leaves the rest deferred.
/// Members that are not a valid envelope are appended verbatim as the `job`
/// field so the worker dead-letters them instead of losing them.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local ids = {}
for _, member in ipairs(due) do
  local ok, env = pcall(cjson.decode, member)
  local id
  if ok and type(env) == 'table' and type(env['job']) == 'string' then
    id = redis.call('XADD', KEYS[2], 'MAXLEN', '~', ARGV[3], '*',
      'job', env['job'],
      'job_key', tostring(env['key'] or ''),
      'enqueued_at', tostring(env['enqueued_at'] or ''),
      'due_at', tostring(env['due_at'] or ''))
  else
    id = redis.call('XADD', KEYS[2], 'MAXLEN', '~', ARGV[3], '*', 'job', member)
  end
  redis.call('ZREM', KEYS[1], member)
  table.insert(ids, id)
end
return ids
"#;

/// Redis Streams backend.
#[derive(Clone)]
pub struct RedisBroker {
    redis: Arc<ConnectionManager>,
    max_length: usize,
}

impl RedisBroker {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis: Arc::new(redis),
            max_length: 100_000,
        }
    }

    /// Approximate `MAXLEN` applied to every append and promotion.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    fn conn(&self) -> ConnectionManager {
        (*self.redis).clone()
    }

    fn xadd(&self, queue: &str, fields: &[(String, String)]) -> redis::Cmd {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(queue)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*");
        for (k, v) in fields {
            cmd.arg(k).arg(v);
        }
        cmd
    }

    /// XCLAIM `ids` for `consumer`. `deliveries` holds the counts reported by
    /// XPENDING, which XCLAIM increments by one.
    async fn claim(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        pending: Vec<(String, String, u64, u64)>,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(queue)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64);
        for (id, _, _, _) in &pending {
            cmd.arg(id);
        }

        let mut conn = self.conn();
        let claimed: Vec<Option<(String, Vec<(String, String)>)>> =
            cmd.query_async(&mut conn).await.map_err(|e| map_group_err(e, queue, group))?;

        Ok(claimed
            .into_iter()
            .flatten()
            .map(|(id, fields)| {
                let deliveries = pending
                    .iter()
                    .find(|(pid, _, _, _)| *pid == id)
                    .map(|(_, _, _, count)| count + 1)
                    .unwrap_or(1);
                StreamEntry::new(id, fields).with_delivery_count(deliveries)
            })
            .collect())
    }

    async fn pending_entries(
        &self,
        queue: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
        consumer: Option<&str>,
    ) -> Result<Vec<(String, String, u64, u64)>, QueueError> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(queue)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle.as_millis() as u64)
            .arg("-")
            .arg("+")
            .arg(count);
        if let Some(consumer) = consumer {
            cmd.arg(consumer);
        }

        let mut conn = self.conn();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| map_group_err(e, queue, group))
    }
}

fn map_group_err(err: RedisError, queue: &str, group: &str) -> QueueError {
    if err.to_string().contains("NOGROUP") {
        QueueError::NoGroup {
            queue: queue.to_string(),
            group: group.to_string(),
        }
    } else {
        QueueError::from(err)
    }
}

fn to_entries(raw: RawEntries) -> Vec<StreamEntry> {
    raw.into_iter()
        .map(|(id, fields)| StreamEntry::new(id, fields))
        .collect()
}

#[async_trait]
impl StreamBroker for RedisBroker {
    async fn append(&self, queue: &str, fields: &[(String, String)]) -> Result<String, QueueError> {
        let mut conn = self.conn();
        let id: String = self.xadd(queue, fields).query_async(&mut conn).await?;
        Ok(id)
    }

    async fn append_batch(
        &self,
        queue: &str,
        entries: &[Fields],
    ) -> Result<Vec<String>, QueueError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for fields in entries {
            pipe.add_command(self.xadd(queue, fields));
        }

        let mut conn = self.conn();
        let ids: Vec<String> = pipe.query_async(&mut conn).await?;
        Ok(ids)
    }

    async fn ensure_group(&self, queue: &str, group: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(queue = %queue, group = %group, "Created consumer group");
                Ok(true)
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(queue = %queue, group = %group, "Consumer group already exists");
                Ok(false)
            }
            Err(e) => Err(QueueError::from(e)),
        }
    }

    async fn read_new(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("COUNT").arg(count).arg("STREAMS").arg(queue).arg(">");

        let mut conn = self.conn();
        let reply: Option<ReadReply> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| map_group_err(e, queue, group))?;

        Ok(reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_, entries)| to_entries(entries))
            .map(|entry| entry.with_delivery_count(1))
            .collect())
    }

    async fn read_owned(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let pending = self
            .pending_entries(queue, group, min_idle, count, Some(consumer))
            .await?;
        self.claim(queue, group, consumer, min_idle, pending).await
    }

    async fn claim_idle(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let pending = self
            .pending_entries(queue, group, min_idle, count, None)
            .await?;
        self.claim(queue, group, consumer, min_idle, pending).await
    }

    async fn ack(&self, queue: &str, group: &str, id: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn();
        let acked: u64 = redis::cmd("XACK")
            .arg(queue)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_group_err(e, queue, group))?;
        Ok(acked)
    }

    async fn schedule(&self, queue: &str, member: &str, due_at_ms: i64) -> Result<(), QueueError> {
        let mut conn = self.conn();
        let _: i64 = conn.zadd(delayed_key(queue), member, due_at_ms).await?;
        Ok(())
    }

    async fn promote_due(
        &self,
        queue: &str,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn();
        let ids: Vec<String> = Script::new(PROMOTE_SCRIPT)
            .key(delayed_key(queue))
            .key(queue)
            .arg(now_ms)
            .arg(limit)
            .arg(self.max_length)
            .invoke_async(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn deferred_len(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn();
        let len: u64 = conn.zcard(delayed_key(queue)).await?;
        Ok(len)
    }

    async fn len(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn();
        let len: u64 = conn.xlen(queue).await?;
        Ok(len)
    }

    async fn pending_count(&self, queue: &str, group: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn();
        type Summary = (u64, Option<String>, Option<String>, Option<Vec<(String, String)>>);
        let summary: RedisResult<Summary> =
            redis::cmd("XPENDING")
                .arg(queue)
                .arg(group)
                .query_async(&mut conn)
                .await;

        match summary {
            Ok((count, _, _, _)) => Ok(count),
            Err(e) if e.to_string().contains("NOGROUP") => Ok(0),
            Err(e) => Err(QueueError::from(e)),
        }
    }

    async fn range(
        &self,
        queue: &str,
        start: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let mut conn = self.conn();
        let raw: RawEntries = redis::cmd("XRANGE")
            .arg(queue)
            .arg(start)
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(to_entries(raw))
    }

    async fn delete(&self, queue: &str, id: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn();
        let deleted: u64 = redis::cmd("XDEL")
            .arg(queue)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
