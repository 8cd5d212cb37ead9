//! Isolation index: locates one logical request's answer within a response

use serde::{Deserialize, Serialize};

/// The `(compression group, partition)` pair a logical request was assigned
/// to by the partition model.
///
/// The same pair keys the parsed result map, so a caller can hold on to the
/// index returned when the request was added and look up its signals once
/// the response has been parsed. Ordered by compression group id first,
/// then partition id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct IsolationIndex {
    pub compression_group_id: i32,
    pub partition_id: i32,
}

impl IsolationIndex {
    pub fn new(compression_group_id: i32, partition_id: i32) -> Self {
        Self {
            compression_group_id,
            partition_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_by_group_then_partition() {
        let a = IsolationIndex::new(0, 5);
        let b = IsolationIndex::new(1, 0);
        let c = IsolationIndex::new(1, 2);

        assert!(a < b);
        assert!(b < c);
    }
}
