//! The multiplication protocol task.
//!
//! Share multiplication doubles the polynomial degree, so the product is
//! re-randomized and reduced with a correlated double sharing (rho at
//! degree k-1, sigma at degree 2(k-1), both hiding the same r): each
//! participant broadcasts u = x * y + sigma, the degree-2(k-1) value
//! x*y + r is interpolated from 2k-1 openings, and the public value minus
//! rho is a fresh degree-(k-1) sharing of x * y.
//!
//! The state machine is symmetric in arrival order: openings may precede
//! the local signal, and a signal arriving after quorum completes on the
//! spot. Either path produces exactly one cached result per id.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use itertools::izip;
use mpc_core::shamir::{self, Share};
use mpc_tasks::{MessageId, Reducer, Reduction};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Parameters, ProtocolError};

/// Inputs consumed by the [`Multiplier`].
#[derive(Clone, Debug)]
pub enum MulMessage {
    /// The local signal to multiply a batch of share pairs.
    Mul(MulSignal),
    /// A masked product broadcast by a peer (or by this participant).
    OpenMul(OpenMul),
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

/// A request to multiply `xs` and `ys` elementwise, consuming the double
/// sharing (`rhos`, `sigmas`).
#[derive(Clone, Debug)]
pub struct MulSignal {
    /// Correlation id.
    pub id: MessageId,
    /// Left factors (degree k-1).
    pub xs: Vec<Share>,
    /// Right factors (degree k-1).
    pub ys: Vec<Share>,
    /// Degree-(k-1) halves of the double sharings.
    pub rhos: Vec<Share>,
    /// Degree-2(k-1) halves of the double sharings.
    pub sigmas: Vec<Share>,
}

/// One participant's masked products for an id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenMul {
    /// Correlation id.
    pub id: MessageId,
    /// Broadcasting participant index.
    pub from: u64,
    /// The sender's shares of x*y + sigma, one per batch position.
    pub shares: Vec<Share>,
}

/// A completed multiplication: fresh degree-(k-1) product shares.
#[derive(Clone, Debug)]
pub struct MulResult {
    /// Correlation id.
    pub id: MessageId,
    /// This participant's shares of the products.
    pub shares: Vec<Share>,
}

/// Outputs produced by the [`Multiplier`].
#[derive(Clone, Debug)]
pub enum MulOutput {
    /// This participant's masked products, to broadcast to all peers.
    OpenMul(OpenMul),
    /// A completed multiplication.
    Result(MulResult),
    /// A failed multiplication.
    Err {
        /// Correlation id of the failed multiplication.
        id: MessageId,
        /// Why it failed.
        reason: ProtocolError,
    },
}

/// The multiplication reducer.
pub struct Multiplier {
    params: Parameters,
    signals: HashMap<MessageId, MulSignal>,
    opens: HashMap<MessageId, BTreeMap<u64, Vec<Share>>>,
    results: HashMap<MessageId, MulResult>,
    ages: HashMap<MessageId, Option<Instant>>,
}

impl Multiplier {
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

    fn mul(&mut self, signal: MulSignal) -> Vec<MulOutput> {
        let id = signal.id;
        if let Some(result) = self.results.get(&id) {
            // the quorum completed before our signal arrived
            return vec![MulOutput::Result(result.clone())];
        }
        if self.signals.contains_key(&id) {
            return vec![MulOutput::Err {
                id,
                reason: ProtocolError::DuplicateId,
            }];
        }

        let batch = signal.xs.len();
        if signal.ys.len() != batch || signal.rhos.len() != batch || signal.sigmas.len() != batch
        {
            return vec![MulOutput::Err {
                id,
                reason: ProtocolError::BatchMismatch,
            }];
        }
        let index = self.params.index();
        if izip!(&signal.xs, &signal.ys, &signal.rhos, &signal.sigmas).any(
            |(x, y, rho, sigma)| {
                [x, y, rho, sigma]
                    .into_iter()
                    .any(|share| share.index() != index)
            },
        ) {
            return vec![MulOutput::Err {
                id,
                reason: ProtocolError::ShareIndexMismatch,
            }];
        }

        let shares = local_mask_vec(&signal.xs, &signal.ys, &signal.sigmas);
        tracing::debug!(batch, "broadcasting masked products");

        self.touch(id);
        self.signals.insert(id, signal);

        let own = OpenMul {
            id,
            from: index,
            shares,
        };
        // the local contribution takes the same path as remote ones, and
        // does so before the broadcast leaves
        let mut outputs = self.try_open(own.clone());
        outputs.push(MulOutput::OpenMul(own));
        outputs
    }

    fn try_open(&mut self, message: OpenMul) -> Vec<MulOutput> {
        let id = message.id;
        if self.results.contains_key(&id) {
            return Vec::new();
        }
        if message.from == 0 || message.from > self.params.n() {
            return vec![MulOutput::Err {
                id,
                reason: ProtocolError::SenderOutOfRange(message.from),
            }];
        }
        if message
            .shares
            .iter()
            .any(|share| share.index() != message.from)
        {
            return vec![MulOutput::Err {
                id,
                reason: ProtocolError::ShareIndexMismatch,
            }];
        }
        let batch = message.shares.len();
        if let Some(signal) = self.signals.get(&id) {
            if signal.xs.len() != batch {
                return vec![MulOutput::Err {
                    id,
                    reason: ProtocolError::BatchMismatch,
                }];
            }
        }

        self.touch(id);
        let openings = self.opens.entry(id).or_default();
        if let Some(existing) = openings.values().next() {
            if existing.len() != batch {
                return vec![MulOutput::Err {
                    id,
                    reason: ProtocolError::BatchMismatch,
                }];
            }
        }
        // duplicates from one sender are idempotent, last wins
        openings.insert(message.from, message.shares);

        if (self.opens[&id].len() as u64) < self.params.mul_quorum() {
            return Vec::new();
        }
        let Some(signal) = self.signals.get(&id) else {
            return Vec::new();
        };

        let openings = &self.opens[&id];
        let index = self.params.index();
        let mut shares = Vec::with_capacity(batch);
        for b in 0..batch {
            let points = openings
                .values()
                .map(|opened| opened[b].clone())
                .collect::<Vec<_>>();
            let value = match shamir::join(&points) {
                Ok(value) => value,
                Err(_) => {
                    return vec![MulOutput::Err {
                        id,
                        reason: ProtocolError::ShareIndexMismatch,
                    }]
                }
            };
            // x*y + r is public now; a fresh share of it minus rho is a
            // degree-(k-1) share of x*y
            let opened = Share::new(index, value);
            shares.push(&opened - &signal.rhos[b]);
        }

        let result = MulResult { id, shares };
        self.signals.remove(&id);
        self.opens.remove(&id);
        self.results.insert(id, result.clone());
        tracing::debug!("multiplication complete");
        vec![MulOutput::Result(result)]
    }

    fn touch(&mut self, id: MessageId) {
        self.ages.entry(id).or_insert(None);
    }

    fn sweep(&mut self, now: Instant) -> Vec<MulOutput> {
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
                tracing::debug!(?id, "multiplication timed out");
                outputs.push(MulOutput::Err {
                    id,
                    reason: ProtocolError::Deadline,
                });
            }
        }
        outputs
    }
}

impl Reducer for Multiplier {
    type Input = MulMessage;
    type Output = MulOutput;

    fn reduce(&mut self, input: MulMessage) -> Reduction<MulOutput> {
        let mut outputs = match input {
            MulMessage::Mul(signal) => self.mul(signal),
            MulMessage::OpenMul(message) => self.try_open(message),
            MulMessage::Evict { id } => {
                self.results.remove(&id);
                self.ages.remove(&id);
                Vec::new()
            }
            MulMessage::CheckDeadline { now } => self.sweep(now),
        };
        match outputs.len() {
            0 => Reduction::None,
            1 => Reduction::One(outputs.remove(0)),
            _ => Reduction::Many(outputs),
        }
    }
}

/// Computes x*y + sigma for every batch position. Pure over non-aliasing
/// slices, so positions are processed in parallel.
fn local_mask_vec(xs: &[Share], ys: &[Share], sigmas: &[Share]) -> Vec<Share> {
    xs.par_iter()
        .zip_eq(ys.par_iter())
        .zip_eq(sigmas.par_iter())
        .with_min_len(64)
        .map(|((x, y), sigma)| &(x * y) + sigma)
        .collect()
}
