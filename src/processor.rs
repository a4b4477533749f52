//! Incremental polling engine: per-log cursors, page sizing, the poller loop,
//! entry extraction, and the monitor that supervises one poller per log.

pub mod cursor;
pub mod extractor;
pub mod monitor;
pub mod pagination;
pub mod poller;
