//! Response parsing: decryption, framing, per-group decompression, and
//! semantic validation
//!
//! Parsing happens in two stages. Stage one decrypts the body with the
//! saved request context, strips the framing, and splits the envelope into
//! still-compressed compression groups. Stage two decompresses each group,
//! decodes its partition array, and validates every field down to typed
//! per-partition results keyed by isolation index.
//!
//! The response is untrusted input: every shape violation maps to a
//! distinct error message, the first failure aborts the whole parse, and no
//! partial result is ever returned.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use ciborium::value::Value;

use sigkv_core::{
    parse_per_group_data, ErrorInfo, IsolationIndex, Result, SerializedValue,
    TrustedSignalsResult, TAG_INTEREST_GROUP_NAMES, TAG_KEYS,
};

use crate::compress::{gzip_decompress, CompressionScheme};
use crate::crypto::RequestContext;
use crate::framing;

/// One compression group as split out of the envelope by stage one: its
/// content is still compressed under `compression_scheme`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionGroupResult {
    pub compression_scheme: CompressionScheme,
    pub content: Vec<u8>,
    pub ttl: Duration,
}

/// Stage-one output, keyed by compression group id.
pub type CompressionGroupResultMap = BTreeMap<i32, CompressionGroupResult>;

/// Stage-two output, keyed by isolation index.
pub type TrustedSignalsResultMap = BTreeMap<IsolationIndex, TrustedSignalsResult>;

/// Stage one: decrypt a raw response body and split it into compression
/// groups.
pub fn parse_response_to_signals_fetch_result(
    response_body: &[u8],
    context: &RequestContext,
) -> Result<CompressionGroupResultMap> {
    let plaintext = context
        .decrypt_response(response_body)
        .map_err(|_| ErrorInfo::new("Failed to decrypt response body."))?;

    let (compression_scheme, document_bytes) = framing::read_response_frame(&plaintext)?;

    let document: Value = ciborium::de::from_reader(document_bytes)
        .map_err(|_| ErrorInfo::new("Failed to parse response body as CBOR."))?;
    let envelope = document
        .as_map()
        .ok_or_else(|| ErrorInfo::new("Response body is not type of Map."))?;

    let groups_value = map_get(envelope, "compressionGroups")
        .ok_or_else(|| ErrorInfo::new("Failed to find compression groups in response."))?;
    let groups = groups_value
        .as_array()
        .ok_or_else(|| ErrorInfo::new("Compression groups is not type of Array."))?;

    let mut result_map = CompressionGroupResultMap::new();
    for group in groups {
        let (id, result) = parse_compression_group(group, compression_scheme)?;
        if result_map.insert(id, result).is_some() {
            return Err(ErrorInfo::new(format!(
                "Compression group id \"{id}\" is already in used."
            )));
        }
    }

    tracing::debug!(groups = result_map.len(), "Split response into compression groups");
    Ok(result_map)
}

/// Stage two: decompress and decode each compression group, validating its
/// partitions into typed results. Only names and keys present in the
/// caller's filters are extracted.
pub fn parse_bidding_signals_fetch_result_to_result_map(
    interest_group_names: &BTreeSet<String>,
    keys: &BTreeSet<String>,
    compression_groups: &CompressionGroupResultMap,
) -> Result<TrustedSignalsResultMap> {
    let mut result_map = TrustedSignalsResultMap::new();

    for (&group_id, group) in compression_groups {
        let decompressed;
        let content: &[u8] = match group.compression_scheme {
            CompressionScheme::None => &group.content,
            CompressionScheme::Gzip => {
                decompressed = gzip_decompress(&group.content)?;
                &decompressed
            }
        };

        let document: Value = ciborium::de::from_reader(content)
            .map_err(|_| ErrorInfo::new("Failed to parse content to CBOR."))?;
        let partitions = document
            .as_array()
            .ok_or_else(|| ErrorInfo::new("Content is not type of Array."))?;

        for partition_value in partitions {
            let (partition_id, result) =
                parse_partition(partition_value, interest_group_names, keys)?;
            // A repeated partition id within a group keeps the first
            // occurrence.
            result_map
                .entry(IsolationIndex::new(group_id, partition_id))
                .or_insert(result);
        }
    }

    tracing::debug!(results = result_map.len(), "Parsed trusted signals results");
    Ok(result_map)
}

/// Parse one element of the `compressionGroups` array.
fn parse_compression_group(
    group: &Value,
    compression_scheme: CompressionScheme,
) -> Result<(i32, CompressionGroupResult)> {
    let group_map = group
        .as_map()
        .ok_or_else(|| ErrorInfo::new("Compression group is not type of Map."))?;

    let id_value = map_get(group_map, "compressionGroupId").ok_or_else(|| {
        ErrorInfo::new("Key \"compressionGroupId\" is missing in compressionGroups map.")
    })?;
    let content_value = map_get(group_map, "content")
        .ok_or_else(|| ErrorInfo::new("Key \"content\" is missing in compressionGroups map."))?;

    let id = int32_field(
        id_value,
        "Compression group id is not type of Integer.",
        "Compression group id is out of range for int.",
    )?;

    let mut ttl = Duration::ZERO;
    if let Some(ttl_value) = map_get(group_map, "ttlMs") {
        let ttl_ms = ttl_value
            .as_integer()
            .ok_or_else(|| ErrorInfo::new("Compression group ttl is not type of Integer."))?;
        ttl = millis_to_duration(i128::from(ttl_ms));
    }

    let content = content_value
        .as_bytes()
        .ok_or_else(|| ErrorInfo::new("Compression group content is not type of Byte String."))?;

    Ok((
        id,
        CompressionGroupResult {
            compression_scheme,
            content: content.clone(),
            ttl,
        },
    ))
}

/// Parse one partition map into its id and typed result.
fn parse_partition(
    partition_value: &Value,
    interest_group_names: &BTreeSet<String>,
    keys: &BTreeSet<String>,
) -> Result<(i32, TrustedSignalsResult)> {
    let partition = partition_value
        .as_map()
        .ok_or_else(|| ErrorInfo::new("Partition is not type of Map."))?;

    let id_value = map_get(partition, "id")
        .ok_or_else(|| ErrorInfo::new("Key \"id\" is missing in partition map."))?;
    let key_group_outputs_value = map_get(partition, "keyGroupOutputs")
        .ok_or_else(|| ErrorInfo::new("Key \"keyGroupOutputs\" is missing in partition map."))?;

    let id = int32_field(
        id_value,
        "Partition id is not type of Integer.",
        "Partition id is out of range for int.",
    )?;

    let mut data_version = None;
    if let Some(version_value) = map_get(partition, "dataVersion") {
        let version = version_value
            .as_integer()
            .ok_or_else(|| ErrorInfo::new("DataVersion is not type of Integer."))?;
        let version = u32::try_from(i128::from(version))
            .map_err(|_| ErrorInfo::new("DataVersion field is out of range for uint32."))?;
        data_version = Some(version);
    }

    let key_group_outputs = key_group_outputs_value
        .as_array()
        .ok_or_else(|| ErrorInfo::new("Partition key group outputs is not type of Array."))?;
    let outputs_by_tag = parse_key_group_outputs(key_group_outputs)?;

    let mut per_group_data = BTreeMap::new();
    if let Some(key_values) = outputs_by_tag.get(TAG_INTEREST_GROUP_NAMES) {
        for name in interest_group_names {
            let Some(entry) = map_get(key_values, name) else {
                continue;
            };
            let json_text = key_value_data_string(name, entry)?;

            // The per-group payload must be a JSON object; arrays and
            // scalars are rejected.
            let parsed: serde_json::Value = serde_json::from_str(json_text).map_err(|_| {
                ErrorInfo::new("Failed to create V8 value from key group output data.")
            })?;
            let object = parsed.as_object().ok_or_else(|| {
                ErrorInfo::new("Failed to create V8 value from key group output data.")
            })?;

            let group_data = parse_per_group_data(object);
            if !group_data.is_empty() {
                per_group_data.insert(name.clone(), group_data);
            }
        }
    }

    let mut bidding_signals = BTreeMap::new();
    if let Some(key_values) = outputs_by_tag.get(TAG_KEYS) {
        for key in keys {
            let Some(entry) = map_get(key_values, key) else {
                continue;
            };
            let json_text = key_value_data_string(key, entry)?;
            let parsed: serde_json::Value = serde_json::from_str(json_text)
                .map_err(|_| ErrorInfo::new("Failed to parse key-value string to JSON."))?;
            bidding_signals.insert(key.clone(), SerializedValue::serialize(&parsed)?);
        }
    }

    Ok((
        id,
        TrustedSignalsResult::new(per_group_data, bidding_signals, data_version),
    ))
}

/// Parse the `keyGroupOutputs` array into a map from its single tag per
/// entry to the entry's `keyValues` map.
fn parse_key_group_outputs(
    outputs: &[Value],
) -> Result<BTreeMap<String, &[(Value, Value)]>> {
    let mut by_tag: BTreeMap<String, &[(Value, Value)]> = BTreeMap::new();

    for output_value in outputs {
        let output = output_value
            .as_map()
            .ok_or_else(|| ErrorInfo::new("KeyGroupOutput value is not type of Map."))?;

        let tags_value = map_get(output, "tags")
            .ok_or_else(|| ErrorInfo::new("Key \"tags\" is missing in keyGroupOutputs map."))?;
        let key_values_value = map_get(output, "keyValues").ok_or_else(|| {
            ErrorInfo::new("Key \"keyValues\" is missing in keyGroupOutputs map.")
        })?;

        let tags = tags_value.as_array().ok_or_else(|| {
            ErrorInfo::new("Tags value in keyGroupOutputs map is not type of Array.")
        })?;
        if tags.len() != 1 {
            return Err(ErrorInfo::new("Tags array must only have one tag."));
        }
        let tag = tags[0].as_text().ok_or_else(|| {
            ErrorInfo::new(
                "Tag value in tags array of keyGroupOutputs map is not type of String.",
            )
        })?;

        let key_values = key_values_value.as_map().ok_or_else(|| {
            ErrorInfo::new("KeyValue value in keyGroupOutputs map is not type of Map.")
        })?;

        if by_tag.insert(tag.to_owned(), key_values.as_slice()).is_some() {
            return Err(ErrorInfo::new(format!(
                "Duplicate tag \"{tag}\" detected in keyGroupOutputs."
            )));
        }
    }

    Ok(by_tag)
}

/// Extract the JSON text from a `{"value": "<json>"}` wrapper.
fn key_value_data_string<'a>(key: &str, entry: &'a Value) -> Result<&'a str> {
    let entry_map = entry
        .as_map()
        .ok_or_else(|| ErrorInfo::new(format!("Value of \"{key}\" is not type of Map.")))?;
    let value = map_get(entry_map, "value")
        .ok_or_else(|| ErrorInfo::new("Failed to find key \"value\" in the map."))?;
    value
        .as_text()
        .ok_or_else(|| ErrorInfo::new("Failed to read value of key \"value\" as type String."))
}

/// Look up a text key in a decoded CBOR map; non-text keys are skipped.
fn map_get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find_map(|(k, v)| (k.as_text() == Some(key)).then_some(v))
}

/// Convert an integer field to an `i32`, with distinct type and range
/// errors. Range checks run against the width actually used downstream.
fn int32_field(value: &Value, type_error: &str, range_error: &str) -> Result<i32> {
    let integer = value
        .as_integer()
        .ok_or_else(|| ErrorInfo::new(type_error))?;
    i32::try_from(i128::from(integer)).map_err(|_| ErrorInfo::new(range_error))
}

/// Convert a millisecond count to a duration. Negative values have no
/// meaning for a cache lifetime and clamp to zero.
fn millis_to_duration(ms: i128) -> Duration {
    Duration::from_millis(ms.clamp(0, u64::MAX as i128) as u64)
}
