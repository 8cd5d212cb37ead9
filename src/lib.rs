//! sigkv: batched, encrypted key-value signals codec
//!
//! A worklet fetching per-interest-group trusted signals batches all of its
//! logical requests into one encrypted round trip: requests are grouped by
//! joining origin and execution mode into compression groups and
//! partitions, serialized into a single CBOR document, padded, and
//! encapsulated to the service's public key. The response is decrypted with
//! the saved request context, split into compression groups, decompressed,
//! and validated into typed per-partition results.
//!
//! `sigkv-core` holds the data model; `sigkv-codec` does the wire work.
//! This crate re-exports both.

pub use sigkv_codec::*;
pub use sigkv_core::*;
