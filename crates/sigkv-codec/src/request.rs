//! Request construction: CBOR document assembly, framing, encryption
//!
//! The builder accumulates logical requests through the partition model,
//! then serializes every partition into one wire document:
//!
//! ```text
//! {
//!   "partitions": [
//!     {
//!       "id": <partition id>,
//!       "compressionGroupId": <group id>,
//!       "metadata": {"hostname": ..., ...},
//!       "arguments": [
//!         {"tags": ["interestGroupNames"], "data": [...]},
//!         {"tags": ["keys"], "data": [...]}
//!       ]
//!     }, ...
//!   ],
//!   "acceptCompression": ["none", "gzip"]
//! }
//! ```
//!
//! The encoded document is framed, zero-padded to a power-of-two ciphertext
//! size, and encapsulated to the service's public key.

use std::collections::{BTreeMap, BTreeSet};

use ciborium::value::Value;

use sigkv_core::{
    ExecutionMode, IsolationIndex, Partition, PartitionModel, TAG_INTEREST_GROUP_NAMES, TAG_KEYS,
};

use crate::compress::ACCEPTED_SCHEMES;
use crate::crypto::{self, PublicKey, RequestContext};
use crate::framing;

const METADATA_HOSTNAME: &str = "hostname";
const METADATA_EXPERIMENT_GROUP_ID: &str = "experimentGroupId";

/// Ad slot size metadata forwarded to the key-value service. The value is
/// passed through verbatim (e.g. `"100,200"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotSizeParam {
    SlotSize(String),
    AllSlotsRequestedSizes(String),
}

impl SlotSizeParam {
    fn key(&self) -> &'static str {
        match self {
            Self::SlotSize(_) => "slotSize",
            Self::AllSlotsRequestedSizes(_) => "allSlotsRequestedSizes",
        }
    }

    fn value(&self) -> &str {
        match self {
            Self::SlotSize(value) | Self::AllSlotsRequestedSizes(value) => value,
        }
    }
}

/// Encodes one partition into its wire map for a specific signals kind.
///
/// Bidding and scoring requests share the partition model but emit
/// different argument blocks; each kind supplies its own encoder.
pub trait PartitionEncoder {
    fn encode_partition(&self, compression_group_id: i32, partition: &Partition) -> Value;
}

/// Wire encoding for trusted bidding signals partitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiddingPartitionEncoder;

impl PartitionEncoder for BiddingPartitionEncoder {
    fn encode_partition(&self, compression_group_id: i32, partition: &Partition) -> Value {
        let metadata = partition
            .metadata
            .iter()
            .map(|(key, value)| (key.as_str(), Value::Text(value.clone())))
            .collect();

        canonical_map(vec![
            ("id", Value::Integer(partition.partition_id.into())),
            (
                "compressionGroupId",
                Value::Integer(compression_group_id.into()),
            ),
            ("metadata", canonical_map(metadata)),
            (
                "arguments",
                Value::Array(vec![
                    make_argument(TAG_INTEREST_GROUP_NAMES, &partition.interest_group_names),
                    make_argument(TAG_KEYS, &partition.bidding_signals_keys),
                ]),
            ),
        ])
    }
}

/// Finished encrypted request: the POST body plus the context required to
/// decrypt the matching response.
pub struct RequestHelper {
    post_body: Vec<u8>,
    context: RequestContext,
}

impl RequestHelper {
    /// Encrypted body to POST to the key-value service.
    pub fn post_body(&self) -> &[u8] {
        &self.post_body
    }

    /// Consume the helper, yielding the body and the response-decryption
    /// context. The context must be paired with the exact response that
    /// answers this body.
    pub fn into_parts(self) -> (Vec<u8>, RequestContext) {
        (self.post_body, self.context)
    }
}

/// Accumulates trusted bidding signals requests and serializes them into a
/// single encrypted request body.
pub struct TrustedBiddingSignalsRequestBuilder {
    model: PartitionModel,
    metadata: BTreeMap<String, String>,
    encoder: BiddingPartitionEncoder,
}

impl TrustedBiddingSignalsRequestBuilder {
    pub fn new(
        hostname: impl Into<String>,
        experiment_group_id: Option<u32>,
        slot_size_param: Option<SlotSizeParam>,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_HOSTNAME.to_owned(), hostname.into());
        if let Some(id) = experiment_group_id {
            metadata.insert(METADATA_EXPERIMENT_GROUP_ID.to_owned(), id.to_string());
        }
        if let Some(param) = &slot_size_param {
            metadata.insert(param.key().to_owned(), param.value().to_owned());
        }

        Self {
            model: PartitionModel::new(),
            metadata,
            encoder: BiddingPartitionEncoder,
        }
    }

    /// Register one interest group's signals fetch. Pure bookkeeping; never
    /// fails. Returns the isolation index under which the matching result
    /// will appear after response parsing.
    pub fn add_trusted_signals_request(
        &mut self,
        interest_group_name: &str,
        bidding_signals_keys: &BTreeSet<String>,
        joining_origin: &str,
        execution_mode: ExecutionMode,
    ) -> IsolationIndex {
        self.model.assign(
            interest_group_name,
            bidding_signals_keys,
            joining_origin,
            execution_mode,
            &self.metadata,
        )
    }

    /// Serialize all accumulated partitions into one encrypted request.
    ///
    /// May be called again after further additions; each call re-serializes
    /// the current state into a fresh request with a fresh encapsulation.
    pub fn build(&self, public_key: &PublicKey) -> RequestHelper {
        let document = self.build_document();
        let mut payload = Vec::new();
        ciborium::ser::into_writer(&document, &mut payload).expect("CBOR encoding to Vec");

        let body = framing::frame_and_pad_request(&payload);
        let (post_body, context) = crypto::encrypt_request(&body, public_key);

        tracing::debug!(
            partitions = self.model.partition_count(),
            document_bytes = payload.len(),
            body_bytes = post_body.len(),
            "Built trusted signals request"
        );

        RequestHelper { post_body, context }
    }

    fn build_document(&self) -> Value {
        let mut partitions = Vec::with_capacity(self.model.partition_count());
        for (&group_id, group) in self.model.compression_groups() {
            for partition in group.values() {
                partitions.push(self.encoder.encode_partition(group_id, partition));
            }
        }

        let accept = ACCEPTED_SCHEMES
            .iter()
            .map(|scheme| Value::Text(scheme.as_str().to_owned()))
            .collect();

        canonical_map(vec![
            ("partitions", Value::Array(partitions)),
            ("acceptCompression", Value::Array(accept)),
        ])
    }
}

/// Build a CBOR map with canonically ordered keys (shorter first, then
/// bytewise) so repeated builds of the same state are byte-identical.
fn canonical_map(mut entries: Vec<(&str, Value)>) -> Value {
    entries.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    Value::Map(
        entries
            .into_iter()
            .map(|(key, value)| (Value::Text(key.to_owned()), value))
            .collect(),
    )
}

fn make_argument(tag: &str, data: &BTreeSet<String>) -> Value {
    canonical_map(vec![
        ("tags", Value::Array(vec![Value::Text(tag.to_owned())])),
        (
            "data",
            Value::Array(data.iter().map(|entry| Value::Text(entry.clone())).collect()),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Gateway;
    use crate::framing::{ENCAPSULATION_OVERHEAD, FRAMING_HEADER_SIZE};

    fn keys(entries: &[&str]) -> BTreeSet<String> {
        entries.iter().map(|k| k.to_string()).collect()
    }

    fn test_builder() -> TrustedBiddingSignalsRequestBuilder {
        TrustedBiddingSignalsRequestBuilder::new(
            "publisher.test",
            Some(12345),
            Some(SlotSizeParam::SlotSize("100,200".to_owned())),
        )
    }

    fn map_get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value
            .as_map()
            .unwrap()
            .iter()
            .find_map(|(k, v)| (k.as_text() == Some(key)).then_some(v))
            .unwrap_or_else(|| panic!("missing key {key}"))
    }

    fn text_array(value: &Value) -> Vec<&str> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_text().unwrap())
            .collect()
    }

    #[test]
    fn test_document_layout() {
        let mut builder = test_builder();
        builder.add_trusted_signals_request(
            "groupA",
            &keys(&["keyA", "keyAB"]),
            "https://foo.test",
            ExecutionMode::GroupedByOrigin,
        );
        builder.add_trusted_signals_request(
            "groupB",
            &keys(&["keyB"]),
            "https://foo.test",
            ExecutionMode::Compatibility,
        );

        let document = builder.build_document();
        assert_eq!(
            text_array(map_get(&document, "acceptCompression")),
            ["none", "gzip"]
        );

        let partitions = map_get(&document, "partitions").as_array().unwrap();
        assert_eq!(partitions.len(), 2);

        let first = &partitions[0];
        assert_eq!(map_get(first, "id"), &Value::Integer(0.into()));
        assert_eq!(
            map_get(first, "compressionGroupId"),
            &Value::Integer(0.into())
        );

        let metadata = map_get(first, "metadata");
        assert_eq!(map_get(metadata, "hostname").as_text(), Some("publisher.test"));
        assert_eq!(
            map_get(metadata, "experimentGroupId").as_text(),
            Some("12345")
        );
        assert_eq!(map_get(metadata, "slotSize").as_text(), Some("100,200"));

        let arguments = map_get(first, "arguments").as_array().unwrap();
        assert_eq!(
            text_array(map_get(&arguments[0], "tags")),
            ["interestGroupNames"]
        );
        assert_eq!(text_array(map_get(&arguments[0], "data")), ["groupA"]);
        assert_eq!(text_array(map_get(&arguments[1], "tags")), ["keys"]);
        assert_eq!(
            text_array(map_get(&arguments[1], "data")),
            ["keyA", "keyAB"]
        );

        let second = &partitions[1];
        assert_eq!(map_get(second, "id"), &Value::Integer(1.into()));
        assert_eq!(text_array(map_get(&map_get(second, "arguments").as_array().unwrap()[0], "data")), ["groupB"]);
    }

    #[test]
    fn test_merged_partition_emits_union() {
        let mut builder = test_builder();
        builder.add_trusted_signals_request(
            "groupA",
            &keys(&["keyA"]),
            "https://foo.test",
            ExecutionMode::GroupedByOrigin,
        );
        builder.add_trusted_signals_request(
            "groupB",
            &keys(&["keyB", "keyA"]),
            "https://foo.test",
            ExecutionMode::GroupedByOrigin,
        );

        let document = builder.build_document();
        let partitions = map_get(&document, "partitions").as_array().unwrap();
        assert_eq!(partitions.len(), 1);

        let arguments = map_get(&partitions[0], "arguments").as_array().unwrap();
        assert_eq!(
            text_array(map_get(&arguments[0], "data")),
            ["groupA", "groupB"]
        );
        assert_eq!(text_array(map_get(&arguments[1], "data")), ["keyA", "keyB"]);
    }

    #[test]
    fn test_built_request_decrypts_to_framed_document() {
        let (gateway, public_key) = Gateway::generate(0x00);
        let mut builder = test_builder();
        builder.add_trusted_signals_request(
            "groupA",
            &keys(&["keyA"]),
            "https://foo.test",
            ExecutionMode::GroupedByOrigin,
        );

        let helper = builder.build(&public_key);
        let (body, _context) = gateway.decrypt_request(helper.post_body()).unwrap();

        // Framed body plus the encapsulation overhead is a power of two.
        assert!((body.len() + ENCAPSULATION_OVERHEAD).is_power_of_two());

        // Stripping the framing recovers the CBOR document bit for bit.
        assert_eq!(body[0], 0x00);
        let length = u32::from_be_bytes(body[1..5].try_into().unwrap()) as usize;
        let document_bytes = &body[FRAMING_HEADER_SIZE..FRAMING_HEADER_SIZE + length];

        let mut expected = Vec::new();
        ciborium::ser::into_writer(&builder.build_document(), &mut expected).unwrap();
        assert_eq!(document_bytes, expected);

        // The rest is zero padding.
        assert!(body[FRAMING_HEADER_SIZE + length..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_build_is_deterministic_for_same_state() {
        let mut builder = test_builder();
        builder.add_trusted_signals_request(
            "groupA",
            &keys(&["keyA"]),
            "https://foo.test",
            ExecutionMode::GroupedByOrigin,
        );

        let mut first = Vec::new();
        ciborium::ser::into_writer(&builder.build_document(), &mut first).unwrap();
        let mut second = Vec::new();
        ciborium::ser::into_writer(&builder.build_document(), &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_metadata_omits_absent_fields() {
        let mut builder = TrustedBiddingSignalsRequestBuilder::new("host.test", None, None);
        builder.add_trusted_signals_request(
            "groupA",
            &keys(&[]),
            "https://foo.test",
            ExecutionMode::Compatibility,
        );

        let document = builder.build_document();
        let partitions = map_get(&document, "partitions").as_array().unwrap();
        let metadata = map_get(&partitions[0], "metadata").as_map().unwrap();

        let keys: Vec<_> = metadata
            .iter()
            .map(|(k, _)| k.as_text().unwrap())
            .collect();
        assert_eq!(keys, ["hostname"]);
    }
}
