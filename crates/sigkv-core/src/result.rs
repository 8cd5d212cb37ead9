//! Parsed trusted-signals result for one partition

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{PerGroupData, SerializedValue};

/// Signals parsed from one response partition, owned by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustedSignalsResult {
    /// Per-interest-group data, present only for names whose JSON object
    /// carried a priority vector or refresh interval.
    pub per_group_data: BTreeMap<String, PerGroupData>,
    /// Serialized JSON value per requested bidding key.
    pub bidding_signals: BTreeMap<String, SerializedValue>,
    /// Server-reported data version for this partition, if any.
    pub data_version: Option<u32>,
}

impl TrustedSignalsResult {
    pub fn new(
        per_group_data: BTreeMap<String, PerGroupData>,
        bidding_signals: BTreeMap<String, SerializedValue>,
        data_version: Option<u32>,
    ) -> Self {
        Self {
            per_group_data,
            bidding_signals,
            data_version,
        }
    }

    /// Per-group data recorded for an interest group name, if any.
    pub fn per_group_data_for(&self, name: &str) -> Option<&PerGroupData> {
        self.per_group_data.get(name)
    }

    /// Serialized signal value fetched for a bidding key, if any.
    pub fn bidding_signal_for(&self, key: &str) -> Option<&SerializedValue> {
        self.bidding_signals.get(key)
    }
}
