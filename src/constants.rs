//! Well-known values shared by all services

/// Approximate number of records retained per topic partition
pub const QUEUE_SIZE_MESSAGES: usize = 100_000;

/// Number of partitions a topic is spread across when no deployment-specific
/// count is configured. Records with equal keys always land on the same
/// partition.
pub const TOPIC_PARTITIONS: u32 = 8;

/// Page size used when a history read does not request one
pub const DEFAULT_PAGE_SIZE: usize = 10;
