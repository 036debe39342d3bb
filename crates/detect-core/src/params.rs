//! Detection parameters shared between the pipeline and the config poller.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::color::HsvRange;

/// The HSV range the pipeline is currently sorting on.
///
/// Written by the config sync task, read by the pipeline once per frame.
/// The six range bytes are packed into a single `AtomicU64`, so `snapshot`
/// is one atomic load and can never observe bounds from two different
/// publishes. Publishing replaces the whole range; there is no
/// field-by-field mutation.
pub struct ActiveRange {
    packed: AtomicU64,
}

impl ActiveRange {
    pub fn new(range: HsvRange) -> Self {
        Self {
            packed: AtomicU64::new(pack(range)),
        }
    }

    /// Replace the active range wholesale.
    pub fn publish(&self, range: HsvRange) {
        self.packed.store(pack(range), Ordering::Release);
    }

    /// One consistent copy of the active range.
    pub fn snapshot(&self) -> HsvRange {
        unpack(self.packed.load(Ordering::Acquire))
    }
}

fn pack(range: HsvRange) -> u64 {
    u64::from_le_bytes([
        range.lower[0],
        range.lower[1],
        range.lower[2],
        range.upper[0],
        range.upper[1],
        range.upper[2],
        0,
        0,
    ])
}

fn unpack(packed: u64) -> HsvRange {
    let b = packed.to_le_bytes();
    HsvRange {
        lower: [b[0], b[1], b[2]],
        upper: [b[3], b[4], b[5]],
    }
}
