//! sigkv-core: data model for the batched trusted-signals key-value protocol
//!
//! This crate defines the in-memory side of the protocol:
//! - The partition model: how logical requests are grouped by joining origin
//!   and execution mode into `(compression group, partition)` slots
//! - The isolation index that ties a logical request to its answer
//! - JSON signal values in reusable serialized form
//! - The single error type every fallible codec operation surfaces
//!
//! Wire concerns (CBOR documents, framing, encryption, compression) live in
//! `sigkv-codec`.

mod error;
mod index;
mod partition;
mod result;
mod value;

pub use error::ErrorInfo;
pub use index::IsolationIndex;
pub use partition::{CompressionGroup, ExecutionMode, Partition, PartitionModel};
pub use result::TrustedSignalsResult;
pub use value::{parse_per_group_data, PerGroupData, PriorityVector, SerializedValue};

pub type Result<T> = std::result::Result<T, ErrorInfo>;

/// Tag labeling an argument or output block that carries interest group names.
pub const TAG_INTEREST_GROUP_NAMES: &str = "interestGroupNames";

/// Tag labeling an argument or output block that carries bidding signal keys.
pub const TAG_KEYS: &str = "keys";
