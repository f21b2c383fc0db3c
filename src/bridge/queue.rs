//! Single-consumer FIFO of decoded units of work
//!
//! Transport callbacks (any number of connection threads) push actions; the
//! control loop is the only consumer. Payload-carrying actions own their
//! bytes outright, so dropping an action on any dispatch path releases the
//! buffer exactly once.

use crate::bridge::server::Connection;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One decoded unit of work for the control loop
#[derive(Debug)]
pub enum Action {
    /// Full-state delivery request from one connection
    Resync { origin: Connection },
    /// Publish instruction: length-prefixed topic plus opaque payload
    Command { origin: Connection, frame: Vec<u8> },
    /// Broker reconfiguration request
    Configure { origin: Connection, frame: Vec<u8> },
}

/// Unbounded FIFO between transport callbacks and the control loop
#[derive(Default)]
pub struct ActionQueue {
    inner: Mutex<VecDeque<Action>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one action; callable concurrently from any producer thread
    pub fn push(&self, action: Action) {
        self.inner.lock().push_back(action);
    }

    /// Non-blocking pop of the head action
    ///
    /// The emptiness check and the removal share one critical section, so
    /// no action can ever be observed by two pops.
    pub fn try_pop(&self) -> Option<Action> {
        self.inner.lock().pop_front()
    }

    /// Drop everything still queued; returns how many actions were dropped
    pub fn drain(&self) -> usize {
        let mut queue = self.inner.lock();
        let count = queue.len();
        queue.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_pop_on_empty_yields_none() {
        let queue = ActionQueue::new();
        assert!(queue.try_pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_across_concurrent_producers() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 100;

        let queue = Arc::new(ActionQueue::new());

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        queue.push(Action::Command {
                            origin: Connection::dangling(producer),
                            frame: seq.to_le_bytes().to_vec(),
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), (PRODUCERS * PER_PRODUCER) as usize);

        // Per-producer order must survive any interleaving, and every
        // action comes out exactly once.
        let mut next_seq = vec![0u64; PRODUCERS as usize];
        let mut total = 0usize;
        while let Some(action) = queue.try_pop() {
            let Action::Command { origin, frame } = action else {
                panic!("unexpected action kind");
            };
            let producer = origin.id().raw() as usize;
            let seq = u64::from_le_bytes(frame.try_into().unwrap());
            assert_eq!(seq, next_seq[producer]);
            next_seq[producer] += 1;
            total += 1;
        }
        assert_eq!(total, (PRODUCERS * PER_PRODUCER) as usize);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_drain_reports_dropped_count() {
        let queue = ActionQueue::new();
        for i in 0..3 {
            queue.push(Action::Resync {
                origin: Connection::dangling(i),
            });
        }
        assert_eq!(queue.drain(), 3);
        assert!(queue.is_empty());
    }
}
