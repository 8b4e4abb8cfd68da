pub mod coordinator;
pub mod market_cache;
