//! # MPC Tasks
//!
//! A cooperative, message-driven task runtime. A [`Task`] owns a reducer
//! plus one bounded inbox and one bounded outbox; [`Task::pump`] runs each
//! queued input through the reducer to completion before the next, so a
//! reducer owns its mutable state exclusively and never takes a lock. All
//! waiting is expressed as messages: a reducer "suspends" a logical
//! computation only by stashing state in its own maps and returning.
//!
//! Tasks compose into a DAG by ownership: a parent holds its children,
//! feeds their inboxes and drains their outboxes. Children never hold a
//! reference to their parent.
//!
//! Queues are bounded on purpose. A send that cannot enqueue is a fatal
//! [`TaskError::Full`]: dropping a message would break protocol
//! invariants, and blocking would break the cooperative model.

#![warn(missing_docs)]

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Correlates protocol work with the originating program and instruction:
/// 32 bytes of program id followed by an 8-byte discriminator (the
/// suspended instruction's counter, or a serial number).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId {
    /// The owning program's 32-byte id.
    pub pid: [u8; 32],
    /// Discriminator distinguishing intents of the same program.
    pub tag: u64,
}

impl MessageId {
    /// Builds an id from its two components.
    pub fn new(pid: [u8; 32], tag: u64) -> Self {
        Self { pid, tag }
    }

    /// The 40-byte wire form: program id followed by the big-endian tag.
    pub fn to_bytes(self) -> [u8; 40] {
        let mut bytes = [0u8; 40];
        bytes[..32].copy_from_slice(&self.pid);
        bytes[32..].copy_from_slice(&self.tag.to_be_bytes());
        bytes
    }

    /// Parses the 40-byte wire form.
    pub fn from_bytes(bytes: [u8; 40]) -> Self {
        let mut pid = [0u8; 32];
        pid.copy_from_slice(&bytes[..32]);
        let mut tag = [0u8; 8];
        tag.copy_from_slice(&bytes[32..]);
        Self {
            pid,
            tag: u64::from_be_bytes(tag),
        }
    }
}

/// Fatal runtime errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// A bounded queue rejected a message: the consumer is too slow.
    #[error("bounded queue full (capacity {capacity})")]
    Full {
        /// Capacity of the queue that overflowed.
        capacity: usize,
    },
}

/// A bounded FIFO queue.
#[derive(Debug)]
pub struct Queue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Queue<T> {
    /// Creates a queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueues a message, failing when the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), TaskError> {
        if self.items.len() == self.capacity {
            return Err(TaskError::Full {
                capacity: self.capacity,
            });
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Dequeues the oldest message.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What a reducer produced for one consumed input.
#[derive(Debug)]
pub enum Reduction<O> {
    /// Nothing to emit.
    None,
    /// A single output message.
    One(O),
    /// Several output messages fanned out from one reduce step.
    Many(Vec<O>),
}

/// A single-threaded state machine fed one message at a time.
pub trait Reducer {
    /// Messages the reducer consumes.
    type Input;
    /// Messages the reducer produces.
    type Output;

    /// Processes one input to completion. Must not block.
    fn reduce(&mut self, input: Self::Input) -> Reduction<Self::Output>;
}

/// A reducer with its bounded inbox and outbox.
pub struct Task<R: Reducer> {
    inbox: Queue<R::Input>,
    outbox: Queue<R::Output>,
    reducer: R,
}

impl<R: Reducer> Task<R> {
    /// Wraps `reducer` with queues of the given capacity.
    pub fn new(capacity: usize, reducer: R) -> Self {
        Self {
            inbox: Queue::new(capacity),
            outbox: Queue::new(capacity),
            reducer,
        }
    }

    /// Enqueues an input for the next [`pump`](Task::pump).
    pub fn send(&mut self, input: R::Input) -> Result<(), TaskError> {
        self.inbox.push(input)
    }

    /// Reduces queued inputs until the inbox is empty, collecting outputs
    /// in the outbox. Each message runs to completion; there are no
    /// preemption points.
    pub fn pump(&mut self) -> Result<(), TaskError> {
        while let Some(input) = self.inbox.pop() {
            match self.reducer.reduce(input) {
                Reduction::None => {}
                Reduction::One(output) => self.outbox.push(output)?,
                Reduction::Many(outputs) => {
                    for output in outputs {
                        self.outbox.push(output)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Takes the oldest pending output, if any.
    pub fn recv(&mut self) -> Option<R::Output> {
        self.outbox.pop()
    }

    /// Takes all pending outputs.
    pub fn drain(&mut self) -> Vec<R::Output> {
        let mut outputs = Vec::with_capacity(self.outbox.len());
        while let Some(output) = self.outbox.pop() {
            outputs.push(output);
        }
        outputs
    }

    /// Whether the task has nothing queued in either direction.
    pub fn is_quiescent(&self) -> bool {
        self.inbox.is_empty() && self.outbox.is_empty()
    }

    /// Shared access to the reducer.
    pub fn reducer(&self) -> &R {
        &self.reducer
    }
}

#[cfg(test)]
mod task_test {
    use super::*;

    struct Doubler;

    impl Reducer for Doubler {
        type Input = u64;
        type Output = u64;

        fn reduce(&mut self, input: u64) -> Reduction<u64> {
            match input {
                0 => Reduction::None,
                n => Reduction::Many(vec![n, n]),
            }
        }
    }

    #[test]
    fn test_pump_and_drain() {
        let mut task = Task::new(8, Doubler);
        task.send(0).unwrap();
        task.send(3).unwrap();
        task.pump().unwrap();
        assert_eq!(task.drain(), vec![3, 3]);
        assert!(task.is_quiescent());
    }

    #[test]
    fn test_inbox_overflow_is_fatal() {
        let mut task = Task::new(2, Doubler);
        task.send(1).unwrap();
        task.send(2).unwrap();
        assert_eq!(task.send(3).unwrap_err(), TaskError::Full { capacity: 2 });
    }

    #[test]
    fn test_outbox_overflow_is_fatal() {
        let mut task = Task::new(2, Doubler);
        task.send(1).unwrap();
        task.send(2).unwrap();
        // four outputs cannot fit a capacity-2 outbox
        assert_eq!(task.pump().unwrap_err(), TaskError::Full { capacity: 2 });
    }

    #[test]
    fn test_message_id_round_trip() {
        let id = MessageId::new([7u8; 32], 0x0102030405060708);
        let bytes = id.to_bytes();
        assert_eq!(&bytes[..32], &[7u8; 32]);
        assert_eq!(&bytes[32..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(MessageId::from_bytes(bytes), id);
    }
}
