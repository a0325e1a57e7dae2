use crate::library::communication::{
    partition_for_key, ConsumerGroupDescriptor, QueueRecord, RecordEntry, RecordProducer,
    RecordStreamProvider, TopicDescriptor,
};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// In-memory bus mirroring the partitioned, keyed, consumer-group contract
///
/// Produced records are captured per topic so tests can assert on side-topic
/// publishes, commits are recorded per topic, and a single produce failure can
/// be injected. Partition streams end once all buffered records have been
/// drained after [`close_after_drain`](MemoryBus::close_after_drain) was called.
#[derive(Clone)]
pub struct MemoryBus {
    partitions: u32,
    state: Arc<Mutex<MemoryBusState>>,
    fail_next_produce: Arc<AtomicBool>,
}

#[derive(Default)]
struct MemoryBusState {
    topics: HashMap<String, TopicState>,
    produced: HashMap<String, Vec<QueueRecord>>,
    committed: HashMap<String, Vec<QueueRecord>>,
}

struct TopicState {
    senders: Vec<Option<UnboundedSender<QueueRecord>>>,
    receivers: Vec<Option<UnboundedReceiver<QueueRecord>>>,
}

impl TopicState {
    fn new(partitions: u32) -> Self {
        let mut senders = Vec::with_capacity(partitions as usize);
        let mut receivers = Vec::with_capacity(partitions as usize);

        for _ in 0..partitions {
            let (tx, rx) = unbounded_channel();
            senders.push(Some(tx));
            receivers.push(Some(rx));
        }

        Self { senders, receivers }
    }
}

impl MemoryBus {
    /// Creates a new bus spreading each topic over the given partition count
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Arc::new(Mutex::new(MemoryBusState::default())),
            fail_next_produce: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes the next produce call fail with an injected error
    pub fn fail_next_produce(&self) {
        self.fail_next_produce.store(true, Ordering::SeqCst);
    }

    /// Ends every partition stream once its buffered records are drained
    pub fn close_after_drain(&self) {
        let mut state = self.state.lock().unwrap();
        for topic in state.topics.values_mut() {
            for sender in topic.senders.iter_mut() {
                sender.take();
            }
        }
    }

    /// All records produced to the given topic, in produce order
    pub fn produced(&self, topic: &TopicDescriptor) -> Vec<QueueRecord> {
        self.state
            .lock()
            .unwrap()
            .produced
            .get(topic.name())
            .cloned()
            .unwrap_or_default()
    }

    /// All records committed on the given topic, in commit order
    pub fn committed(&self, topic: &TopicDescriptor) -> Vec<QueueRecord> {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(topic.name())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordProducer for MemoryBus {
    async fn produce(&self, topic: &TopicDescriptor, record: QueueRecord) -> EmptyResult {
        if self.fail_next_produce.swap(false, Ordering::SeqCst) {
            return Err("injected produce failure".into());
        }

        let partitions = self.partitions;
        let mut state = self.state.lock().unwrap();

        state
            .produced
            .entry(topic.name().to_owned())
            .or_default()
            .push(record.clone());

        let topic_state = state
            .topics
            .entry(topic.name().to_owned())
            .or_insert_with(|| TopicState::new(partitions));

        let partition = partition_for_key(&record.key, partitions) as usize;
        if let Some(sender) = &topic_state.senders[partition] {
            sender.send(record).ok();
        }

        Ok(())
    }
}

/// Entry handed out by the [`MemoryBus`]
pub struct MemoryEntry {
    topic: String,
    record: QueueRecord,
    state: Arc<Mutex<MemoryBusState>>,
}

#[async_trait]
impl RecordEntry for MemoryEntry {
    fn record(&self) -> &QueueRecord {
        &self.record
    }

    async fn commit(&mut self) -> EmptyResult {
        self.state
            .lock()
            .unwrap()
            .committed
            .entry(self.topic.clone())
            .or_default()
            .push(self.record.clone());

        Ok(())
    }
}

#[async_trait]
impl RecordStreamProvider for MemoryBus {
    type Entry = MemoryEntry;

    async fn streams(
        &self,
        topic: &TopicDescriptor,
        _group: &ConsumerGroupDescriptor,
        _consumer: &str,
    ) -> Result<Vec<BoxStream<'static, Result<Self::Entry, BoxedError>>>, BoxedError> {
        let partitions = self.partitions;
        let mut state = self.state.lock().unwrap();

        let topic_state = state
            .topics
            .entry(topic.name().to_owned())
            .or_insert_with(|| TopicState::new(partitions));

        let receivers: Vec<UnboundedReceiver<QueueRecord>> = topic_state
            .receivers
            .iter_mut()
            .map(|slot| slot.take().ok_or("topic is already being consumed"))
            .collect::<Result<_, _>>()?;

        let shared = self.state.clone();
        let topic_name = topic.name().to_owned();

        let streams = receivers
            .into_iter()
            .map(|receiver| {
                let shared = shared.clone();
                let topic_name = topic_name.clone();

                stream::unfold(receiver, |mut receiver| async move {
                    receiver.recv().await.map(|record| (record, receiver))
                })
                .map(move |record| {
                    Ok(MemoryEntry {
                        topic: topic_name.clone(),
                        record,
                        state: shared.clone(),
                    })
                })
                .boxed()
            })
            .collect();

        Ok(streams)
    }
}
