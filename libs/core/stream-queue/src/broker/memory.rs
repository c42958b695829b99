use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::StreamBroker;
use crate::entry::{DeferredJob, EntryField, Fields, StreamEntry};
use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    fn parse(raw: &str) -> Option<Self> {
        let (ms, seq) = match raw.split_once('-') {
            Some((ms, seq)) => (ms.parse().ok()?, seq.parse().ok()?),
            None => (raw.parse().ok()?, 0),
        };
        Some(Self { ms, seq })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

struct Pending {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Default)]
struct Group {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, Pending>,
}

#[derive(Default)]
struct Stream {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: HashMap<String, Group>,
}

impl Stream {
    fn next_id(&mut self) -> EntryId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = if now > self.last_id.ms {
            EntryId { ms: now, seq: 0 }
        } else {
            EntryId {
                ms: self.last_id.ms,
                seq: self.last_id.seq + 1,
            }
        };
        self.last_id = id;
        id
    }

    fn push(&mut self, fields: Fields, max_length: usize) -> EntryId {
        let id = self.next_id();
        self.entries.insert(id, fields);
        while self.entries.len() > max_length {
            self.entries.pop_first();
        }
        id
    }
}

#[derive(Default)]
struct State {
    streams: HashMap<String, Stream>,
    deferred: HashMap<String, BTreeSet<(i64, String)>>,
}

impl State {
    fn group_mut(
        &mut self,
        queue: &str,
        group: &str,
    ) -> Result<(&mut Group, &BTreeMap<EntryId, Fields>), QueueError> {
        let no_group = || QueueError::NoGroup {
            queue: queue.to_string(),
            group: group.to_string(),
        };
        let stream = self.streams.get_mut(queue).ok_or_else(no_group)?;
        let Stream { entries, groups, .. } = stream;
        let group = groups.get_mut(group).ok_or_else(no_group)?;
        Ok((group, entries))
    }
}

fn invalid_id(id: &str) -> QueueError {
    QueueError::Unavailable(format!("Invalid stream ID '{}'", id))
}

/// In-process broker with Redis Streams consumer-group semantics.
///
/// Stream ids, pending lists, idle-time claiming, blocking reads and
/// atomic promotion all behave like the Redis backend, so worker and queue
/// logic can be tested without a server. Trimming is exact rather than
/// approximate.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    appended: Arc<Notify>,
    max_length: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            appended: Arc::new(Notify::new()),
            max_length: 100_000,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_read_new(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let mut state = self.lock();
        let (group_state, entries) = state.group_mut(queue, group)?;

        let now = Instant::now();
        let mut out = Vec::new();
        let start = group_state.last_delivered;
        for (id, fields) in entries
            .range((std::ops::Bound::Excluded(start), std::ops::Bound::Unbounded))
            .take(count)
        {
            group_state.last_delivered = *id;
            group_state.pending.insert(
                *id,
                Pending {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            out.push(StreamEntry::new(id.to_string(), fields.clone()).with_delivery_count(1));
        }
        Ok(out)
    }

    /// Claim pending entries matching `filter` for `consumer`. Entries deleted
    /// from the stream are dropped from the pending list, like Redis 7 does.
    fn claim_where(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
        filter: impl Fn(&Pending, Instant) -> bool,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let mut state = self.lock();
        let (group_state, entries) = state.group_mut(queue, group)?;

        let now = Instant::now();
        let candidates: Vec<EntryId> = group_state
            .pending
            .iter()
            .filter(|(_, p)| filter(p, now))
            .map(|(id, _)| *id)
            .take(count)
            .collect();

        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(fields) = entries.get(&id) else {
                group_state.pending.remove(&id);
                continue;
            };
            if let Some(p) = group_state.pending.get_mut(&id) {
                p.consumer = consumer.to_string();
                p.delivered_at = now;
                p.delivery_count += 1;
                out.push(
                    StreamEntry::new(id.to_string(), fields.clone())
                        .with_delivery_count(p.delivery_count),
                );
            }
        }
        Ok(out)
    }

    /// Consumer currently owning the pending entry `id`.
    pub fn owner_of(&self, queue: &str, group: &str, id: &str) -> Option<String> {
        let id = EntryId::parse(id)?;
        let state = self.lock();
        state
            .streams
            .get(queue)?
            .groups
            .get(group)?
            .pending
            .get(&id)
            .map(|p| p.consumer.clone())
    }
}

#[async_trait]
impl StreamBroker for MemoryBroker {
    async fn append(&self, queue: &str, fields: &[(String, String)]) -> Result<String, QueueError> {
        let id = {
            let mut state = self.lock();
            let stream = state.streams.entry(queue.to_string()).or_default();
            stream.push(fields.to_vec(), self.max_length)
        };
        self.appended.notify_waiters();
        Ok(id.to_string())
    }

    async fn ensure_group(&self, queue: &str, group: &str) -> Result<bool, QueueError> {
        let mut state = self.lock();
        let stream = state.streams.entry(queue.to_string()).or_default();
        if stream.groups.contains_key(group) {
            return Ok(false);
        }
        let last = stream.last_id;
        stream.groups.insert(
            group.to_string(),
            Group {
                last_delivered: last,
                pending: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn read_new(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let Some(block) = block else {
            return self.try_read_new(queue, group, consumer, count);
        };

        let deadline = Instant::now() + block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.try_read_new(queue, group, consumer, count)?;
            if !entries.is_empty() {
                return Ok(entries);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn read_owned(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        self.claim_where(queue, group, consumer, count, |p, now| {
            p.consumer == consumer && now.saturating_duration_since(p.delivered_at) >= min_idle
        })
    }

    async fn claim_idle(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        self.claim_where(queue, group, consumer, count, |p, now| {
            now.saturating_duration_since(p.delivered_at) >= min_idle
        })
    }

    async fn ack(&self, queue: &str, group: &str, id: &str) -> Result<u64, QueueError> {
        let Some(id) = EntryId::parse(id) else {
            return Ok(0);
        };
        let mut state = self.lock();
        let (group_state, _) = state.group_mut(queue, group)?;
        Ok(u64::from(group_state.pending.remove(&id).is_some()))
    }

    async fn schedule(&self, queue: &str, member: &str, due_at_ms: i64) -> Result<(), QueueError> {
        let mut state = self.lock();
        let set = state.deferred.entry(queue.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        set.insert((due_at_ms, member.to_string()));
        Ok(())
    }

    async fn promote_due(
        &self,
        queue: &str,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<String>, QueueError> {
        let ids = {
            let mut state = self.lock();
            let due: Vec<(i64, String)> = match state.deferred.get(queue) {
                Some(set) => set
                    .iter()
                    .take_while(|(score, _)| *score <= now_ms)
                    .take(limit)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };

            let mut ids = Vec::with_capacity(due.len());
            for (score, member) in due {
                let fields = match serde_json::from_str::<DeferredJob>(&member) {
                    Ok(envelope) => envelope.into_fields(),
                    Err(_) => vec![(EntryField::Job.to_string(), member.clone())],
                };
                let stream = state.streams.entry(queue.to_string()).or_default();
                ids.push(stream.push(fields, self.max_length).to_string());
                if let Some(set) = state.deferred.get_mut(queue) {
                    set.remove(&(score, member));
                }
            }
            ids
        };
        if !ids.is_empty() {
            self.appended.notify_waiters();
        }
        Ok(ids)
    }

    async fn deferred_len(&self, queue: &str) -> Result<u64, QueueError> {
        let state = self.lock();
        Ok(state.deferred.get(queue).map_or(0, |s| s.len() as u64))
    }

    async fn len(&self, queue: &str) -> Result<u64, QueueError> {
        let state = self.lock();
        Ok(state.streams.get(queue).map_or(0, |s| s.entries.len() as u64))
    }

    async fn pending_count(&self, queue: &str, group: &str) -> Result<u64, QueueError> {
        let state = self.lock();
        Ok(state
            .streams
            .get(queue)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len() as u64))
    }

    async fn range(
        &self,
        queue: &str,
        start: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        use std::ops::Bound;

        let lower = if start == "-" {
            Bound::Unbounded
        } else if let Some(exclusive) = start.strip_prefix('(') {
            let id = EntryId::parse(exclusive).ok_or_else(|| invalid_id(start))?;
            Bound::Excluded(id)
        } else {
            let id = EntryId::parse(start).ok_or_else(|| invalid_id(start))?;
            Bound::Included(id)
        };

        let state = self.lock();
        Ok(state
            .streams
            .get(queue)
            .map(|s| {
                s.entries
                    .range((lower, Bound::Unbounded))
                    .take(count)
                    .map(|(id, fields)| StreamEntry::new(id.to_string(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, queue: &str, id: &str) -> Result<u64, QueueError> {
        let Some(id) = EntryId::parse(id) else {
            return Ok(0);
        };
        let mut state = self.lock();
        Ok(state
            .streams
            .get_mut(queue)
            .map_or(0, |s| u64::from(s.entries.remove(&id).is_some())))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
