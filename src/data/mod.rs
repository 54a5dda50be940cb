//! Shared ring and durable storage.
pub mod ring_buffer;
pub mod storage;
