pub mod feed_client;
pub mod resolver;
pub mod rule_sync;
pub mod stream;
