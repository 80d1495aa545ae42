//! In-process loopback transport
//!
//! Keeps a bounded log per topic partition and distributes partitions among
//! the members of each consumer group. It implements just enough broker
//! behavior for the pipeline to run in one process: round-robin publishing,
//! consumer group rebalances with revoke/assign events, offset commits on
//! fetch, end-of-partition events and watermark queries.
//!
//! Retention is a record count per partition; older records fall off the
//! front and raise the low watermark.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::{
    now_ms, BrokerError, BrokerEvent, ConsumerTransport, FramePublisher, PartitionOffset, Record,
    TopicPartition, Watermarks,
};

/// Default number of records kept per partition
pub const DEFAULT_RETENTION: usize = 64;

#[derive(Debug)]
struct StoredRecord {
    payload: Bytes,
    timestamp_ms: i64,
}

#[derive(Debug, Default)]
struct PartitionLog {
    /// Offset of the first retained record
    base: i64,
    records: VecDeque<StoredRecord>,
}

impl PartitionLog {
    fn high(&self) -> i64 {
        self.base + self.records.len() as i64
    }

    fn get(&self, offset: i64) -> Option<&StoredRecord> {
        if offset < self.base {
            return None;
        }
        self.records.get((offset - self.base) as usize)
    }

    fn watermarks(&self) -> Watermarks {
        Watermarks {
            low: self.base,
            high: self.high(),
        }
    }
}

struct Member {
    id: u64,
    topics: Vec<String>,
    owned: Vec<TopicPartition>,
    events: mpsc::UnboundedSender<BrokerEvent>,
}

#[derive(Default)]
struct Group {
    members: Vec<Member>,
    committed: HashMap<TopicPartition, i64>,
}

struct State {
    topics: HashMap<String, Vec<PartitionLog>>,
    groups: HashMap<String, Group>,
    next_member_id: u64,
    retention: usize,
}

impl State {
    fn log(&self, tp: &TopicPartition) -> Result<&PartitionLog, BrokerError> {
        self.topics
            .get(&tp.topic)
            .ok_or_else(|| BrokerError::UnknownTopic(tp.topic.clone()))?
            .get(tp.partition as usize)
            .ok_or_else(|| BrokerError::UnknownPartition(tp.clone()))
    }

    /// Revoke everything from every member, then redistribute
    fn rebalance(&mut self, group_name: &str) {
        let State { topics, groups, .. } = self;
        let Some(group) = groups.get_mut(group_name) else {
            return;
        };

        for member in &mut group.members {
            if !member.owned.is_empty() {
                let revoked = std::mem::take(&mut member.owned);
                let _ = member.events.send(BrokerEvent::PartitionsRevoked(revoked));
            }
        }

        let mut wanted: Vec<TopicPartition> = group
            .members
            .iter()
            .flat_map(|m| m.topics.iter())
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|topic| topics.get(topic).map(|logs| (topic, logs.len())))
            .flat_map(|(topic, count)| {
                (0..count as i32).map(move |p| TopicPartition::new(topic.clone(), p))
            })
            .collect();
        wanted.sort();

        let mut per_topic: HashMap<String, usize> = HashMap::new();
        for tp in wanted {
            let eligible: Vec<usize> = group
                .members
                .iter()
                .enumerate()
                .filter(|(_, m)| m.topics.contains(&tp.topic))
                .map(|(i, _)| i)
                .collect();
            if eligible.is_empty() {
                continue;
            }
            let turn = per_topic.entry(tp.topic.clone()).or_insert(0);
            let idx = eligible[*turn % eligible.len()];
            *turn += 1;
            group.members[idx].owned.push(tp);
        }

        for member in &group.members {
            if member.owned.is_empty() {
                continue;
            }
            let assigned = member
                .owned
                .iter()
                .map(|tp| PartitionOffset::new(tp.clone(), group.committed.get(tp).copied()))
                .collect();
            let _ = member.events.send(BrokerEvent::PartitionsAssigned(assigned));
        }

        tracing::debug!(
            group = group_name,
            members = group.members.len(),
            "Loopback group rebalanced"
        );
    }
}

struct Shared {
    state: Mutex<State>,
    data_ready: Notify,
}

impl Shared {
    fn append(
        &self,
        tp: &TopicPartition,
        payload: Bytes,
        timestamp_ms: i64,
    ) -> Result<i64, BrokerError> {
        let offset = {
            let mut state = self.state.lock();
            let retention = state.retention;
            let log = state
                .topics
                .get_mut(&tp.topic)
                .ok_or_else(|| BrokerError::UnknownTopic(tp.topic.clone()))?
                .get_mut(tp.partition as usize)
                .ok_or_else(|| BrokerError::UnknownPartition(tp.clone()))?;

            let offset = log.high();
            log.records.push_back(StoredRecord {
                payload,
                timestamp_ms,
            });
            while log.records.len() > retention {
                log.records.pop_front();
                log.base += 1;
            }
            offset
        };

        self.data_ready.notify_waiters();
        Ok(offset)
    }
}

/// In-process broker shared by producers and consumers
#[derive(Clone)]
pub struct LoopbackBroker {
    shared: Arc<Shared>,
}

impl LoopbackBroker {
    /// Create a broker with the default retention
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a broker keeping at most `retention` records per partition
    pub fn with_retention(retention: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    topics: HashMap::new(),
                    groups: HashMap::new(),
                    next_member_id: 1,
                    retention: retention.max(1),
                }),
                data_ready: Notify::new(),
            }),
        }
    }

    /// Create a topic, or grow an existing one to `partitions`
    pub fn create_topic(&self, name: &str, partitions: i32) {
        let mut state = self.shared.state.lock();
        let logs = state.topics.entry(name.to_string()).or_default();
        while logs.len() < partitions.max(1) as usize {
            logs.push(PartitionLog::default());
        }
    }

    /// Create a producer for `topic`
    pub fn producer(&self, topic: &str) -> Result<LoopbackProducer, BrokerError> {
        let partitions = {
            let state = self.shared.state.lock();
            state
                .topics
                .get(topic)
                .map(Vec::len)
                .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?
        };

        Ok(LoopbackProducer {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            partitions,
            next_partition: AtomicUsize::new(0),
        })
    }

    /// Join `group` subscribed to `topics`
    ///
    /// Triggers a rebalance of the whole group.
    pub fn consumer(&self, group: &str, topics: &[&str]) -> Result<LoopbackConsumer, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let member_id = {
            let mut state = self.shared.state.lock();
            for topic in topics {
                if !state.topics.contains_key(*topic) {
                    return Err(BrokerError::UnknownTopic(topic.to_string()));
                }
            }

            let member_id = state.next_member_id;
            state.next_member_id += 1;

            state
                .groups
                .entry(group.to_string())
                .or_default()
                .members
                .push(Member {
                    id: member_id,
                    topics: topics.iter().map(|t| t.to_string()).collect(),
                    owned: Vec::new(),
                    events: tx,
                });
            state.rebalance(group);
            member_id
        };

        tracing::debug!(group = group, member_id = member_id, "Loopback consumer joined");

        Ok(LoopbackConsumer {
            shared: Arc::clone(&self.shared),
            group: group.to_string(),
            member_id,
            events: rx,
            positions: Vec::new(),
            at_eof: HashSet::new(),
            cursor: 0,
        })
    }

    /// Append a raw payload to a specific partition, returning its offset
    pub fn append(&self, tp: &TopicPartition, payload: Bytes) -> Result<i64, BrokerError> {
        self.shared.append(tp, payload, now_ms())
    }

    /// Force a revoke-then-reassign cycle on every member of `group`
    pub fn rebalance(&self, group: &str) {
        self.shared.state.lock().rebalance(group);
    }

    /// Deliver an error event to every member of `group`
    pub fn inject_error(&self, group: &str, message: &str) {
        let state = self.shared.state.lock();
        if let Some(group) = state.groups.get(group) {
            for member in &group.members {
                let _ = member.events.send(BrokerEvent::Error(BrokerError::Transport(
                    message.to_string(),
                )));
            }
        }
    }

    /// Current watermarks of a partition
    pub fn watermarks(&self, tp: &TopicPartition) -> Result<Watermarks, BrokerError> {
        Ok(self.shared.state.lock().log(tp)?.watermarks())
    }

    /// Offset committed by `group` for a partition
    pub fn committed(&self, group: &str, tp: &TopicPartition) -> Option<i64> {
        let state = self.shared.state.lock();
        state.groups.get(group)?.committed.get(tp).copied()
    }

    /// Disconnect every consumer; their `next_event` returns `None`
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.groups.clear();
    }
}

impl Default for LoopbackBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes to a loopback topic, spreading records over its partitions
pub struct LoopbackProducer {
    shared: Arc<Shared>,
    topic: String,
    partitions: usize,
    next_partition: AtomicUsize,
}

impl FramePublisher for LoopbackProducer {
    async fn publish(&self, payload: Bytes, timestamp_ms: i64) -> Result<(), BrokerError> {
        let partition = self.next_partition.fetch_add(1, Ordering::Relaxed) % self.partitions;
        let tp = TopicPartition::new(self.topic.clone(), partition as i32);
        self.shared.append(&tp, payload, timestamp_ms)?;
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// A consumer group member on the loopback broker
pub struct LoopbackConsumer {
    shared: Arc<Shared>,
    group: String,
    member_id: u64,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    positions: Vec<(TopicPartition, i64)>,
    at_eof: HashSet<TopicPartition>,
    cursor: usize,
}

impl LoopbackConsumer {
    /// Member id within the group
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    /// Partitions currently being read with their next offsets
    pub fn positions(&self) -> &[(TopicPartition, i64)] {
        &self.positions
    }

    /// Fetch the next record or end-of-partition event, round-robin
    fn poll_fetch(&mut self) -> Option<BrokerEvent> {
        let count = self.positions.len();
        if count == 0 {
            return None;
        }

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        for step in 0..count {
            let idx = (self.cursor + step) % count;
            let (tp, pos) = &mut self.positions[idx];

            let Ok(log) = state.log(tp) else {
                continue;
            };
            if *pos < log.base {
                *pos = log.base;
            }

            if let Some(stored) = log.get(*pos) {
                let record = Record {
                    tp: tp.clone(),
                    offset: *pos,
                    payload: stored.payload.clone(),
                    timestamp_ms: Some(stored.timestamp_ms),
                };
                *pos += 1;

                if let Some(group) = state.groups.get_mut(&self.group) {
                    group.committed.insert(tp.clone(), *pos);
                }
                self.at_eof.remove(&record.tp);
                self.cursor = (idx + 1) % count;
                return Some(BrokerEvent::Message(record));
            }

            if self.at_eof.insert(tp.clone()) {
                self.cursor = (idx + 1) % count;
                return Some(BrokerEvent::PartitionEof(tp.clone()));
            }
        }

        None
    }
}

impl ConsumerTransport for LoopbackConsumer {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        let shared = Arc::clone(&self.shared);

        loop {
            let notified = shared.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Rebalance and error events take priority over records
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(mpsc::error::TryRecvError::Disconnected) => return None,
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            if let Some(event) = self.poll_fetch() {
                return Some(event);
            }

            tokio::select! {
                event = self.events.recv() => return event,
                _ = &mut notified => {}
            }
        }
    }

    fn assign(&mut self, partitions: &[PartitionOffset]) -> Result<(), BrokerError> {
        let state = self.shared.state.lock();
        let group = state.groups.get(&self.group);

        let mut positions = Vec::with_capacity(partitions.len());
        for assignment in partitions {
            let log = state.log(&assignment.tp)?;
            // No explicit offset: committed position, else the live edge
            let offset = assignment
                .offset
                .or_else(|| group.and_then(|g| g.committed.get(&assignment.tp).copied()))
                .unwrap_or_else(|| log.high());
            positions.push((assignment.tp.clone(), offset));
        }

        self.positions = positions;
        self.at_eof.clear();
        self.cursor = 0;
        Ok(())
    }

    fn unassign(&mut self) -> Result<(), BrokerError> {
        self.positions.clear();
        self.at_eof.clear();
        self.cursor = 0;
        Ok(())
    }

    async fn watermarks(&self, tp: &TopicPartition) -> Result<Watermarks, BrokerError> {
        Ok(self.shared.state.lock().log(tp)?.watermarks())
    }
}

impl Drop for LoopbackConsumer {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        let Some(group) = state.groups.get_mut(&self.group) else {
            return;
        };
        group.members.retain(|m| m.id != self.member_id);
        if !group.members.is_empty() {
            state.rebalance(&self.group);
        }
    }
}
