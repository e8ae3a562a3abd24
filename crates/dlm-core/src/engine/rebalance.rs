//! Dynamic segment splitting: convert idle slack into parallelism without
//! jeopardizing resume safety.
//!
//! Invoked whenever a segment completes and on each monitor tick. Splitting
//! moves the live segment's end to the midpoint of its remainder; the
//! running worker observes the shrink on its next chunk and self-corrects,
//! while a fresh worker takes the tail.

use std::sync::Arc;

use crate::task::{DownloadState, ResumeState};
use crate::workspace::PartFile;

use super::active::ActiveTask;
use super::Inner;

/// A remainder below this is not worth a second connection.
const MIN_SPLIT_BYTES: u64 = 8 * 1024 * 1024;

pub(crate) fn try_rebalance(inner: &Arc<Inner>, handle: &Arc<ActiveTask>) {
    enum Action {
        Finalize,
        Spawn { index: usize },
    }

    let (action, snapshot) = {
        let mut t = handle.lock();
        if t.state != DownloadState::Downloading
            || !t.resumable
            || t.resume_state == ResumeState::Unstable
        {
            return;
        }

        let incomplete = t.segments.iter().filter(|s| !s.is_complete()).count();
        if incomplete == 0 || incomplete >= t.max_connections as usize {
            if incomplete == 0 && t.all_segments_complete() && t.try_begin_finalize() {
                let snap = t.clone();
                (Action::Finalize, snap)
            } else {
                return;
            }
        } else {
            // Largest remainder is the best split candidate.
            let mut candidate: Option<usize> = None;
            let mut max_remaining = 0u64;
            for (i, seg) in t.segments.iter().enumerate() {
                if seg.is_complete() {
                    continue;
                }
                let remaining = seg.end - seg.current_offset();
                if remaining > max_remaining {
                    max_remaining = remaining;
                    candidate = Some(i);
                }
            }
            let Some(ci) = candidate else { return };
            if max_remaining < MIN_SPLIT_BYTES {
                return;
            }

            let (mid, original_end) = {
                let seg = &mut t.segments[ci];
                let mid = seg.current_offset() + max_remaining / 2;
                let original_end = seg.end;
                seg.end = mid;
                (mid, original_end)
            };
            let mut tail = crate::task::Segment::new(mid + 1, original_end);
            tail.part = t.segments[ci].part;
            t.segments.push(tail);
            let index = t.segments.len() - 1;
            tracing::debug!(
                task = %t.id,
                candidate = ci,
                new_segment = index,
                "split segment at {mid}"
            );
            let snap = t.clone();
            (Action::Spawn { index }, snap)
        }
    };

    match action {
        Action::Finalize => {
            inner.persist_async(snapshot);
            let inner2 = Arc::clone(inner);
            let handle2 = Arc::clone(handle);
            inner.rt.spawn(super::finalize::run(inner2, handle2));
        }
        Action::Spawn { index } => {
            inner.save_meta(&snapshot);
            let data_path = inner.data_path(&snapshot);
            inner.persist_async(snapshot);
            if !handle.is_cancelled() {
                match PartFile::open_existing(&data_path) {
                    Ok(part) => inner.spawn_segment_worker(Arc::clone(handle), index, part),
                    Err(e) => tracing::warn!("rebalance could not open data file: {e:#}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::task::{DownloadState, DownloadTask, ResumeState, Segment};

    // The split arithmetic itself, exercised without an engine: the guards
    // and midpoint choice mirror try_rebalance.
    fn split_largest(t: &mut DownloadTask) -> Option<usize> {
        if t.state != DownloadState::Downloading
            || !t.resumable
            || t.resume_state == ResumeState::Unstable
        {
            return None;
        }
        let incomplete = t.segments.iter().filter(|s| !s.is_complete()).count();
        if incomplete == 0 || incomplete >= t.max_connections as usize {
            return None;
        }
        let (ci, remaining) = t
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_complete())
            .map(|(i, s)| (i, s.end - s.current_offset()))
            .max_by_key(|&(_, r)| r)?;
        if remaining < super::MIN_SPLIT_BYTES {
            return None;
        }
        let mid = t.segments[ci].current_offset() + remaining / 2;
        let end = t.segments[ci].end;
        t.segments[ci].end = mid;
        t.segments.push(Segment::new(mid + 1, end));
        Some(t.segments.len() - 1)
    }

    fn downloading_task(total: u64, ranges: &[(u64, u64)]) -> DownloadTask {
        let mut t = DownloadTask::new("u");
        t.total_size = total;
        t.state = DownloadState::Downloading;
        t.max_connections = 8;
        t.segments = ranges.iter().map(|&(s, e)| Segment::new(s, e)).collect();
        t
    }

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn split_halves_the_remainder() {
        let mut t = downloading_task(64 * MIB, &[(0, 64 * MIB - 1)]);
        t.segments[0].downloaded = 16 * MIB;
        let idx = split_largest(&mut t).expect("split happens");
        assert_eq!(idx, 1);
        // Candidate keeps [0, mid]; tail takes (mid, original_end].
        assert_eq!(t.segments[0].end + 1, t.segments[1].start);
        assert_eq!(t.segments[1].end, 64 * MIB - 1);
        assert!(t.segments[0].end > t.segments[0].current_offset());
        t.validate().expect("ranges stay disjoint");
    }

    #[test]
    fn refuses_small_remainders() {
        let mut t = downloading_task(10 * MIB, &[(0, 10 * MIB - 1)]);
        t.segments[0].downloaded = 4 * MIB;
        assert!(split_largest(&mut t).is_none());
    }

    #[test]
    fn refuses_when_at_connection_cap() {
        let mut t = downloading_task(64 * MIB, &[(0, 32 * MIB - 1), (32 * MIB, 64 * MIB - 1)]);
        t.max_connections = 2;
        assert!(split_largest(&mut t).is_none());
    }

    #[test]
    fn refuses_unstable_or_non_resumable() {
        let mut t = downloading_task(64 * MIB, &[(0, 64 * MIB - 1)]);
        t.resume_state = ResumeState::Unstable;
        assert!(split_largest(&mut t).is_none());

        let mut t2 = downloading_task(64 * MIB, &[(0, 64 * MIB - 1)]);
        t2.resumable = false;
        assert!(split_largest(&mut t2).is_none());
    }

    #[test]
    fn refuses_outside_downloading() {
        let mut t = downloading_task(64 * MIB, &[(0, 64 * MIB - 1)]);
        t.state = DownloadState::Paused;
        assert!(split_largest(&mut t).is_none());
    }

    #[test]
    fn picks_the_largest_remainder() {
        let mut t = downloading_task(
            96 * MIB,
            &[(0, 31 * MIB), (31 * MIB + 1, 40 * MIB), (40 * MIB + 1, 96 * MIB - 1)],
        );
        t.segments[0].downloaded = 30 * MIB;
        let idx = split_largest(&mut t).unwrap();
        // Segment 2 had the largest remainder, so the tail starts inside it.
        assert!(t.segments[idx].start > 40 * MIB);
    }
}
