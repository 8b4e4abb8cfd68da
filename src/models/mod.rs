pub mod event;
pub mod order;
pub mod rule;
pub mod signal;
