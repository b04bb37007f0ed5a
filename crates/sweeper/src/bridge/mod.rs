//! Wire bridge between the scheduler and the worker pool.
//!
//! # Architecture
//!
//! - **protocol**: frame payloads (submission batches out, task results in)
//! - **codec**: length-prefixed JSON framing for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
