//! Segment planning: size → connection count → initial inclusive ranges.
//!
//! Planning happens once, on the first start of a task with a known size.
//! Later growth comes only from the rebalancer splitting live segments.

use crate::task::Segment;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Number of initial connections for a resumable download of `total_size` bytes.
pub fn connection_count(total_size: u64) -> u32 {
    if total_size < 20 * MIB {
        1
    } else if total_size < 100 * MIB {
        2
    } else if total_size < GIB {
        4
    } else {
        8
    }
}

/// Partition `[0, total_size - 1]` into contiguous segments.
///
/// Non-resumable or size-unknown tasks get a single open segment handled by
/// the streaming worker. Returns an empty plan for `total_size == 0`.
pub fn plan_segments(total_size: u64, resumable: bool) -> Vec<Segment> {
    if total_size == 0 {
        return Vec::new();
    }
    if !resumable {
        return vec![Segment::new(0, total_size - 1)];
    }

    let count = connection_count(total_size) as u64;
    if count == 1 {
        return vec![Segment::new(0, total_size - 1)];
    }

    let chunk = total_size / count;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = i * chunk;
        let end = if i + 1 < count {
            start + chunk - 1
        } else {
            total_size - 1
        };
        out.push(Segment::new(start, end));
    }
    out
}
