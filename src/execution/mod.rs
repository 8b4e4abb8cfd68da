pub mod dispatcher;
pub mod exchange_auth;
pub mod exchange_client;
pub mod idempotency;
pub mod paper;
