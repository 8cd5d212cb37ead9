//! sigkv-codec: wire codec for the batched trusted-signals key-value
//! protocol
//!
//! The client side of the protocol in two halves:
//! - Request building: accumulate logical requests through the partition
//!   model, serialize every partition into one CBOR document, frame and pad
//!   it, and encrypt it for the key-value service.
//! - Response parsing: decrypt the service's answer with the saved request
//!   context, strip the framing, decompress each compression group, and
//!   validate the decoded document down to typed per-partition results.
//!
//! Transport (how the encrypted body reaches the service) is out of scope;
//! this crate only produces and consumes bodies.

pub mod compress;
pub mod crypto;
pub mod framing;
pub mod request;
pub mod response;

pub use compress::CompressionScheme;
pub use crypto::{Gateway, GatewayContext, PublicKey, RequestContext};
pub use request::{
    BiddingPartitionEncoder, PartitionEncoder, RequestHelper, SlotSizeParam,
    TrustedBiddingSignalsRequestBuilder,
};
pub use response::{
    parse_bidding_signals_fetch_result_to_result_map, parse_response_to_signals_fetch_result,
    CompressionGroupResult, CompressionGroupResultMap, TrustedSignalsResultMap,
};
