use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

const RETRY_EXTENSION: &str = "retry";
const DEAD_LETTER_EXTENSION: &str = "dlq";

/// Header stamped onto every record republished to a side topic,
/// carrying the republish time as RFC3339 UTC
pub const RETRY_AT_HEADER: &str = "x-retry-at";

/// Describes a record topic and its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    name: String,
    limit: usize,
}

impl TopicDescriptor {
    /// Creates a new instance from raw parts
    pub fn new(name: String, limit: usize) -> Self {
        Self { name, limit }
    }

    /// Value which may be used by queue implementations to identify the topic
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of records to be retained per partition of the topic
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Side topic onto which records are republished for delayed reprocessing
    pub fn retry(&self) -> TopicDescriptor {
        self.with_extension(RETRY_EXTENSION)
    }

    /// Side topic onto which records are parked after processing has been given up on
    pub fn dead_letter(&self) -> TopicDescriptor {
        self.with_extension(DEAD_LETTER_EXTENSION)
    }

    fn with_extension(&self, extension: &str) -> TopicDescriptor {
        TopicDescriptor {
            name: format!("{}.{}", self.name, extension),
            limit: self.limit,
        }
    }
}

/// Headers attached to a [`QueueRecord`], preserved verbatim across republishes
pub type RecordHeaders = BTreeMap<String, String>;

/// Single entry travelling through a record queue
///
/// The key is authoritative for partition assignment; payloads deliberately
/// do not repeat it. The timestamp is assigned once by the original producer
/// and carried through retries unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    /// Partition key; equal keys are guaranteed to be processed in order
    pub key: String,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Headers travelling alongside the payload
    pub headers: RecordHeaders,
    /// Wall-clock time at which the record was first produced
    pub timestamp: DateTime<Utc>,
}

impl QueueRecord {
    /// Creates a new record with the given key and payload, no headers and a timestamp of now
    pub fn new(key: String, payload: Vec<u8>) -> Self {
        Self {
            key,
            payload,
            headers: RecordHeaders::new(),
            timestamp: Utc::now(),
        }
    }

    /// Retrieves a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Assigns a partition to a record key
///
/// Uses FNV-1a so the assignment is stable across processes and restarts.
/// The std hasher is seeded per-process and must not be used here.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }

    (hash % u64::from(partitions.max(1))) as u32
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn derive_side_topics() {
        let topic = TopicDescriptor::new("messages".into(), 42);

        assert_eq!(topic.retry().name(), "messages.retry");
        assert_eq!(topic.dead_letter().name(), "messages.dlq");
        assert_eq!(topic.retry().limit(), 42);
    }

    #[test]
    fn assign_equal_keys_to_equal_partitions() {
        let a = partition_for_key("conversation-1", 8);
        let b = partition_for_key("conversation-1", 8);

        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn spread_keys_across_partitions() {
        let assigned: std::collections::HashSet<u32> = (0..64)
            .map(|i| partition_for_key(&format!("conversation-{}", i), 8))
            .collect();

        // With 64 keys over 8 partitions at least a few have to differ
        assert!(assigned.len() > 1);
    }

    #[test]
    fn survive_zero_partition_count() {
        assert_eq!(partition_for_key("anything", 0), 0);
    }
}
