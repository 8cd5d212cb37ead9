//! JSON signal values: reusable serialized form and per-group field
//! extraction
//!
//! Signal values arrive as JSON text embedded in the response document.
//! They are parsed once during response handling; values fetched for
//! bidding keys are then re-serialized into an opaque byte blob the bidding
//! logic can re-parse on demand, decoupled from any scripting runtime.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ErrorInfo, Result};

/// Weights keyed by signal name, used to prioritize interest groups.
pub type PriorityVector = BTreeMap<String, f64>;

/// Per-group JSON field holding the priority vector.
const PRIORITY_VECTOR_FIELD: &str = "priorityVector";

/// Per-group JSON field holding the refresh interval in milliseconds.
const UPDATE_IF_OLDER_THAN_MS_FIELD: &str = "updateIfOlderThanMs";

/// A JSON value serialized to a compact byte blob for later reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedValue {
    bytes: Vec<u8>,
}

impl SerializedValue {
    /// Serialize a parsed JSON value into its reusable form.
    pub fn serialize(value: &serde_json::Value) -> Result<Self> {
        let bytes = serde_json::to_vec(value)
            .map_err(|_| ErrorInfo::new("Failed to serialize data value."))?;
        Ok(Self { bytes })
    }

    /// Re-parse the stored blob into a JSON value.
    pub fn deserialize(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.bytes)
            .map_err(|_| ErrorInfo::new("Failed to deserialize data value."))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Optional fields extracted from one interest group's JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerGroupData {
    pub priority_vector: Option<PriorityVector>,
    pub update_if_older_than: Option<Duration>,
}

impl PerGroupData {
    /// True when neither optional field parsed; empty records are not
    /// stored in the result.
    pub fn is_empty(&self) -> bool {
        self.priority_vector.is_none() && self.update_if_older_than.is_none()
    }
}

/// Extract the optional priority vector and refresh interval from one
/// interest group's JSON object. Fields that are absent or malformed
/// yield `None`; they are hints, not hard protocol requirements.
pub fn parse_per_group_data(object: &serde_json::Map<String, serde_json::Value>) -> PerGroupData {
    PerGroupData {
        priority_vector: parse_priority_vector(object),
        update_if_older_than: parse_update_if_older_than(object),
    }
}

fn parse_priority_vector(
    object: &serde_json::Map<String, serde_json::Value>,
) -> Option<PriorityVector> {
    let vector = object.get(PRIORITY_VECTOR_FIELD)?.as_object()?;

    let mut result = PriorityVector::new();
    for (name, value) in vector {
        // A single non-numeric entry invalidates the whole vector.
        result.insert(name.clone(), value.as_f64()?);
    }
    Some(result)
}

fn parse_update_if_older_than(
    object: &serde_json::Map<String, serde_json::Value>,
) -> Option<Duration> {
    let ms = object.get(UPDATE_IF_OLDER_THAN_MS_FIELD)?.as_f64()?;
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(ms / 1000.0))
}
