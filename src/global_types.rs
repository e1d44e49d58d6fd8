use serde::{Deserialize, Serialize};

use crate::geometry::Pose;

/// Capture time in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// dt
    pub fn duration_since(&self, other: &Timestamp) -> f64 {
        (self.0 - other.0) as f64 / 1e9
    }
    pub fn offset_ns(&self, ns: i64) -> Timestamp {
        Timestamp(self.0 + ns)
    }
}

/// One ground-truth sample of a trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseSample {
    pub timestamp: Timestamp,
    pub pose: Pose,
}

impl PoseSample {
    pub fn new(timestamp: Timestamp, pose: Pose) -> Self {
        Self { timestamp, pose }
    }
}

#[test]
fn test_timestamp() {
    let t1 = Timestamp(1_000_000_000);
    let t2 = Timestamp(1_500_000_000);
    assert_eq!(t2.duration_since(&t1), 0.5);
    assert_eq!(t1.offset_ns(500_000_000), t2);
}
