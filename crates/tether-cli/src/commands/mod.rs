pub mod cache;
pub mod common;
pub mod config;
pub mod conflicts;
pub mod queue;
pub mod status;
pub mod sync;
