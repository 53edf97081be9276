//! The open protocol task.
//!
//! Opening reveals a shared value: every participant broadcasts its
//! shares, and once k distinct-index batches for an id are in, each batch
//! position is interpolated at zero into the plaintext. Caching, dedup
//! and deadline semantics mirror the multiplication task.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use mpc_core::algebra::FieldElement;
use mpc_core::shamir::{self, Share};
use mpc_tasks::{MessageId, Reducer, Reduction};
use serde::{Deserialize, Serialize};

use crate::{Parameters, ProtocolError};

/// Inputs consumed by the [`Opener`].
#[derive(Clone, Debug)]
pub enum OpenMessage {
    /// The local signal to reveal a batch of shared values.
    Signal(OpenSignal),
    /// Shares broadcast by a peer (or by this participant).
    Open(OpenShares),
    /// Drop the cached result for a completed id.
    Evict {
        /// The id whose cached result is no longer needed.
        id: MessageId,
    },
    /// Sweep per-id state whose deadline has passed.
    CheckDeadline {
        /// The current monotonic time.
        now: Instant,
    },
}

/// A request to reveal the values behind this participant's shares.
#[derive(Clone, Debug)]
pub struct OpenSignal {
    /// Correlation id.
    pub id: MessageId,
    /// This participant's shares of the values to reveal.
    pub shares: Vec<Share>,
}

/// One participant's shares for an id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenShares {
    /// Correlation id.
    pub id: MessageId,
    /// Broadcasting participant index.
    pub from: u64,
    /// The sender's shares, one per batch position.
    pub shares: Vec<Share>,
}

/// A completed opening: the revealed plaintexts.
#[derive(Clone, Debug)]
pub struct OpenResult {
    /// Correlation id.
    pub id: MessageId,
    /// The revealed values, one per batch position.
    pub values: Vec<FieldElement>,
}

/// Outputs produced by the [`Opener`].
#[derive(Clone, Debug)]
pub enum OpenOutput {
    /// This participant's shares, to broadcast to all peers.
    Open(OpenShares),
    /// A completed opening.
    Result(OpenResult),
    /// A failed opening.
    Err {
        /// Correlation id of the failed opening.
        id: MessageId,
        /// Why it failed.
        reason: ProtocolError,
    },
}

/// The open reducer.
pub struct Opener {
    params: Parameters,
    signals: HashMap<MessageId, OpenSignal>,
    opens: HashMap<MessageId, BTreeMap<u64, Vec<Share>>>,
    results: HashMap<MessageId, OpenResult>,
    ages: HashMap<MessageId, Option<Instant>>,
}

impl Opener {
    /// Creates the task for one participant.
    pub fn new(params: Parameters) -> Self {
        Self {
            params,
            signals: HashMap::new(),
            opens: HashMap::new(),
            results: HashMap::new(),
            ages: HashMap::new(),
        }
    }

    fn signal(&mut self, signal: OpenSignal) -> Vec<OpenOutput> {
        let id = signal.id;
        if let Some(result) = self.results.get(&id) {
            return vec![OpenOutput::Result(result.clone())];
        }
        if self.signals.contains_key(&id) {
            return vec![OpenOutput::Err {
                id,
                reason: ProtocolError::DuplicateId,
            }];
        }
        let index = self.params.index();
        if signal.shares.iter().any(|share| share.index() != index) {
            return vec![OpenOutput::Err {
                id,
                reason: ProtocolError::ShareIndexMismatch,
            }];
        }

        tracing::debug!(batch = signal.shares.len(), "broadcasting shares to open");
        let own = OpenShares {
            id,
            from: index,
            shares: signal.shares.clone(),
        };
        self.touch(id);
        self.signals.insert(id, signal);

        let mut outputs = self.try_open(own.clone());
        outputs.push(OpenOutput::Open(own));
        outputs
    }

    fn try_open(&mut self, message: OpenShares) -> Vec<OpenOutput> {
        let id = message.id;
        if self.results.contains_key(&id) {
            return Vec::new();
        }
        if message.from == 0 || message.from > self.params.n() {
            return vec![OpenOutput::Err {
                id,
                reason: ProtocolError::SenderOutOfRange(message.from),
            }];
        }
        if message
            .shares
            .iter()
            .any(|share| share.index() != message.from)
        {
            return vec![OpenOutput::Err {
                id,
                reason: ProtocolError::ShareIndexMismatch,
            }];
        }
        let batch = message.shares.len();
        if let Some(signal) = self.signals.get(&id) {
            if signal.shares.len() != batch {
                return vec![OpenOutput::Err {
                    id,
                    reason: ProtocolError::BatchMismatch,
                }];
            }
        }

        self.touch(id);
        let openings = self.opens.entry(id).or_default();
        if let Some(existing) = openings.values().next() {
            if existing.len() != batch {
                return vec![OpenOutput::Err {
                    id,
                    reason: ProtocolError::BatchMismatch,
                }];
            }
        }
        openings.insert(message.from, message.shares);

        if (self.opens[&id].len() as u64) < self.params.open_quorum() {
            return Vec::new();
        }
        if !self.signals.contains_key(&id) {
            return Vec::new();
        }

        let openings = &self.opens[&id];
        let mut values = Vec::with_capacity(batch);
        for b in 0..batch {
            let points = openings
                .values()
                .map(|opened| opened[b].clone())
                .collect::<Vec<_>>();
            match shamir::join(&points) {
                Ok(value) => values.push(value),
                Err(_) => {
                    return vec![OpenOutput::Err {
                        id,
                        reason: ProtocolError::ShareIndexMismatch,
                    }]
                }
            }
        }

        let result = OpenResult { id, values };
        self.signals.remove(&id);
        self.opens.remove(&id);
        self.results.insert(id, result.clone());
        tracing::debug!("opening complete");
        vec![OpenOutput::Result(result)]
    }

    fn touch(&mut self, id: MessageId) {
        self.ages.entry(id).or_insert(None);
    }

    fn sweep(&mut self, now: Instant) -> Vec<OpenOutput> {
        let timeout = self.params.timeout();
        let mut expired = Vec::new();
        for (id, age) in self.ages.iter_mut() {
            match *age {
                None => *age = Some(now),
                Some(created) if now.saturating_duration_since(created) >= timeout => {
                    expired.push(*id);
                }
                Some(_) => {}
            }
        }

        let mut outputs = Vec::new();
        for id in expired {
            self.ages.remove(&id);
            let had_signal = self.signals.remove(&id).is_some();
            let had_opens = self.opens.remove(&id).is_some();
            let had_result = self.results.remove(&id).is_some();
            if (had_signal || had_opens) && !had_result {
                tracing::debug!(?id, "opening timed out");
                outputs.push(OpenOutput::Err {
                    id,
                    reason: ProtocolError::Deadline,
                });
            }
        }
        outputs
    }
}

impl Reducer for Opener {
    type Input = OpenMessage;
    type Output = OpenOutput;

    fn reduce(&mut self, input: OpenMessage) -> Reduction<OpenOutput> {
        let mut outputs = match input {
            OpenMessage::Signal(signal) => self.signal(signal),
            OpenMessage::Open(message) => self.try_open(message),
            OpenMessage::Evict { id } => {
                self.results.remove(&id);
                self.ages.remove(&id);
                Vec::new()
            }
            OpenMessage::CheckDeadline { now } => self.sweep(now),
        };
        match outputs.len() {
            0 => Reduction::None,
            1 => Reduction::One(outputs.remove(0)),
            _ => Reduction::Many(outputs),
        }
    }
}
