/// Counter for messages delivered to the application handler
pub const CONSUMER_MESSAGES_DELIVERED: &str = "kafka_consumer_messages_delivered_total";

/// Counter for polls that came up empty
pub const CONSUMER_EMPTY_POLLS: &str = "kafka_consumer_empty_polls_total";

/// Counter for handler invocations that failed
pub const CONSUMER_HANDLER_FAILURES: &str = "kafka_consumer_handler_failures_total";
