//! Stream id bookkeeping of one connection.
//!
//! Every request in flight owns a stream id until its response arrives.
//! A request whose caller gave up keeps its id, and its handler, as an
//! orphan: the response may still come, and reusing the id before it does
//! would hand that response to the wrong caller.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

/// Identifies a request before it is given a stream id.
pub(super) type RequestId = u64;

enum Slot<H> {
    Waiting { request_id: RequestId, handler: H },
    Orphaned { since: Instant, handler: H },
}

/// What a response arriving on a stream belongs to.
#[derive(Debug)]
pub(super) enum Completion<H> {
    Waiting(H),
    /// The caller is gone; only the handler is left to drop.
    Orphaned(H),
    /// Nothing was sent on this stream.
    Unknown,
}

pub(super) struct Streams<H> {
    // Ids below this one were handed out at least once.
    high_water: i32,
    // Freed ids below `high_water`, smallest first.
    released: BinaryHeap<Reverse<i16>>,
    slots: HashMap<i16, Slot<H>>,
    by_request: HashMap<RequestId, i16>,
}

impl<H> Streams<H> {
    pub(super) fn new() -> Self {
        Streams {
            high_water: 0,
            released: BinaryHeap::new(),
            slots: HashMap::new(),
            by_request: HashMap::new(),
        }
    }

    // Always the smallest id not in use.
    fn next_free(&mut self) -> Option<i16> {
        if let Some(Reverse(id)) = self.released.pop() {
            return Some(id);
        }
        let id = i16::try_from(self.high_water).ok()?;
        self.high_water += 1;
        Some(id)
    }

    /// Gives the request a stream id, or hands the handler back when all
    /// ids are taken.
    pub(super) fn allocate(&mut self, request_id: RequestId, handler: H) -> Result<i16, H> {
        let Some(stream) = self.next_free() else {
            return Err(handler);
        };
        self.by_request.insert(request_id, stream);
        self.slots
            .insert(stream, Slot::Waiting { request_id, handler });
        Ok(stream)
    }

    /// Forgets the caller of `request_id`. Its stream stays taken until the
    /// response shows up.
    pub(super) fn orphan(&mut self, request_id: RequestId) -> Option<i16> {
        let stream = self.by_request.remove(&request_id)?;
        let Some(Slot::Waiting { handler, .. }) = self.slots.remove(&stream) else {
            return None;
        };
        self.slots.insert(
            stream,
            Slot::Orphaned {
                since: Instant::now(),
                handler,
            },
        );
        Some(stream)
    }

    /// Frees the stream a response arrived on.
    pub(super) fn complete(&mut self, stream: i16) -> Completion<H> {
        let Some(slot) = self.slots.remove(&stream) else {
            return Completion::Unknown;
        };
        self.released.push(Reverse(stream));
        match slot {
            Slot::Waiting {
                request_id,
                handler,
            } => {
                self.by_request.remove(&request_id);
                Completion::Waiting(handler)
            }
            Slot::Orphaned { handler, .. } => Completion::Orphaned(handler),
        }
    }

    /// Orphans whose response is overdue by at least `age`.
    pub(super) fn old_orphans(&self, age: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(age) else {
            return 0;
        };
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Orphaned { since, .. } if *since <= cutoff))
            .count()
    }

    /// Number of streams taken, orphans included.
    pub(super) fn in_use(&self) -> usize {
        self.slots.len()
    }

    /// Handlers of every request still waiting. Handlers of orphans are
    /// dropped.
    pub(super) fn into_waiting(self) -> impl Iterator<Item = H> {
        self.slots.into_values().filter_map(|slot| match slot {
            Slot::Waiting { handler, .. } => Some(handler),
            Slot::Orphaned { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn ids_are_exhausted_then_reused() {
        let mut streams = Streams::new();
        for expected in 0..=i16::MAX {
            assert_eq!(streams.allocate(expected as u64, ()), Ok(expected));
        }
        assert_eq!(streams.allocate(u64::MAX, ()), Err(()));

        assert_matches!(streams.complete(1234), Completion::Waiting(()));
        assert_eq!(streams.allocate(u64::MAX, ()), Ok(1234));
    }

    #[tokio::test(start_paused = true)]
    async fn orphans_hold_their_stream_until_answered() {
        let mut streams = Streams::new();
        let stream = streams.allocate(7, "handler").unwrap();
        assert_eq!(streams.orphan(7), Some(stream));
        assert_eq!(streams.orphan(7), None);
        assert_eq!(streams.allocate(8, "other"), Ok(stream + 1));

        assert_eq!(streams.old_orphans(Duration::from_secs(1)), 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(streams.old_orphans(Duration::from_secs(1)), 1);

        assert_eq!(streams.in_use(), 2);
        assert_matches!(streams.complete(stream), Completion::Orphaned("handler"));
        assert_eq!(streams.in_use(), 1);
        assert_eq!(streams.old_orphans(Duration::from_secs(1)), 0);
        assert_matches!(streams.complete(stream), Completion::Unknown);
        assert_eq!(streams.into_waiting().collect::<Vec<_>>(), vec!["other"]);
    }

    #[test]
    fn answered_request_cannot_be_orphaned() {
        let mut streams = Streams::new();
        let stream = streams.allocate(1, ()).unwrap();
        assert_matches!(streams.complete(stream), Completion::Waiting(()));
        assert_eq!(streams.orphan(1), None);
    }

    proptest! {
        // The smallest free id is handed out, never one in use.
        #[test]
        fn allocation_matches_model(ops in proptest::collection::vec(any::<Option<u8>>(), 1..200)) {
            let mut streams = Streams::new();
            let mut used: BTreeSet<i16> = BTreeSet::new();
            for (request_id, op) in ops.into_iter().enumerate() {
                match op {
                    None => {
                        let expected = (0..=i16::MAX).find(|id| !used.contains(id));
                        let allocated = streams.allocate(request_id as u64, ()).ok();
                        prop_assert_eq!(allocated, expected);
                        used.extend(allocated);
                    }
                    Some(pick) => {
                        if let Some(&id) = used.iter().nth(pick as usize % used.len().max(1)) {
                            prop_assert!(matches!(streams.complete(id), Completion::Waiting(())));
                            used.remove(&id);
                        }
                    }
                }
            }
        }
    }
}
