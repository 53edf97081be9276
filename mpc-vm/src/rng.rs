//! The shared-randomness protocol task.
//!
//! Each request produces a batch of sharings of fresh uniform secrets that
//! no participant knows. Every participant deals verifiable sharings of
//! local secrets to all peers; once contributions from k participants are
//! in, the deterministic leader (lowest index) fixes the contributor set
//! with a proposal and everyone sums the chosen contributions
//! componentwise. Tuples carry the same secret twice, at degrees k-1 (rho)
//! and 2(k-1) (sigma), which is exactly what the multiplication protocol
//! consumes to reduce degree.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use mpc_core::shamir::Share;
use mpc_core::vss::{self, VerifiableShare};
use mpc_tasks::{MessageId, Reducer, Reduction};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::{Parameters, ProtocolError, RngType};

/// Inputs consumed by the [`Rnger`].
#[derive(Clone, Debug)]
pub enum RngMessage {
    /// Begin generating `batch` fresh uniform sharings for `id`.
    GenerateRn {
        /// Correlation id, unique per computation.
        id: MessageId,
        /// Number of sharings to produce.
        batch: usize,
    },
    /// Begin generating `batch` sharings of zero for `id`.
    GenerateRnZero {
        /// Correlation id, unique per computation.
        id: MessageId,
        /// Number of sharings to produce.
        batch: usize,
    },
    /// Begin generating `batch` double sharings for `id`.
    GenerateRnTuple {
        /// Correlation id, unique per computation.
        id: MessageId,
        /// Number of double sharings to produce.
        batch: usize,
    },
    /// A peer's (or this participant's own) contribution.
    RnShares(RnShares),
    /// The leader's choice of contributor set.
    ProposeRnShare(ProposeRnShare),
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

/// One participant's verifiable contribution to a generation, addressed to
/// a single recipient.
///
/// `rhos` holds the degree-(k-1) sharings of a tuple generation and is
/// empty otherwise; `sigmas` holds the degree-2(k-1) sharings of a tuple
/// generation or the only sharings of a plain one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RnShares {
    /// Correlation id.
    pub id: MessageId,
    /// Recipient participant index.
    pub to: u64,
    /// Contributing participant index.
    pub from: u64,
    /// The recipient's shares of the contributor's degree-(k-1) sharings.
    pub rhos: Vec<VerifiableShare>,
    /// The recipient's shares of the contributor's masking sharings.
    pub sigmas: Vec<VerifiableShare>,
}

/// The leader's broadcast fixing the canonical contributor set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposeRnShare {
    /// Correlation id.
    pub id: MessageId,
    /// Proposing participant index; only the leader's proposals count.
    pub from: u64,
    /// The k lowest-index contributors the leader has verified.
    pub players: BTreeSet<u64>,
}

/// A completed generation: this participant's shares of the summed
/// contributions.
#[derive(Clone, Debug)]
pub struct RngResult {
    /// Correlation id.
    pub id: MessageId,
    /// Degree-(k-1) shares; empty unless a tuple was requested.
    pub rhos: Vec<Share>,
    /// Masking shares (degree 2(k-1) for tuples, k-1 otherwise).
    pub sigmas: Vec<Share>,
}

/// Outputs produced by the [`Rnger`].
#[derive(Clone, Debug)]
pub enum RngOutput {
    /// A contribution to route to participant `to`.
    RnShares(RnShares),
    /// A proposal to broadcast to all peers.
    ProposeRnShare(ProposeRnShare),
    /// A completed generation.
    Result(RngResult),
    /// A failed generation.
    Err {
        /// Correlation id of the failed generation.
        id: MessageId,
        /// Why it failed.
        reason: ProtocolError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Variant {
    Rn,
    RnZero,
    RnTuple,
}

type Contribution = (Vec<VerifiableShare>, Vec<VerifiableShare>);

#[derive(Default)]
struct Generation {
    batch: Option<usize>,
    signalled: bool,
    created: Option<Instant>,
    contributions: BTreeMap<u64, Contribution>,
    proposal: Option<BTreeSet<u64>>,
    proposed: bool,
}

/// The shared-randomness reducer.
pub struct Rnger {
    params: Parameters,
    rng: RngType,
    generations: HashMap<MessageId, Generation>,
    results: HashMap<MessageId, (Option<Instant>, RngResult)>,
}

impl Rnger {
    /// Creates the task for one participant.
    pub fn new(params: Parameters) -> Self {
        Self {
            params,
            rng: RngType::from_entropy(),
            generations: HashMap::new(),
            results: HashMap::new(),
        }
    }

    fn generate(&mut self, id: MessageId, batch: usize, variant: Variant) -> Vec<RngOutput> {
        if let Some((_, result)) = self.results.get(&id) {
            // the generation already completed off remote contributions
            return vec![RngOutput::Result(result.clone())];
        }

        let generation = self.generations.entry(id).or_default();
        if generation.signalled {
            return vec![RngOutput::Err {
                id,
                reason: ProtocolError::DuplicateId,
            }];
        }
        generation.signalled = true;
        match generation.batch {
            Some(existing) if existing != batch => {
                return vec![RngOutput::Err {
                    id,
                    reason: ProtocolError::BatchMismatch,
                }];
            }
            _ => generation.batch = Some(batch),
        }

        tracing::debug!(?variant, batch, "dealing local randomness contribution");

        let field = self.params.field().clone();
        let ped = self.params.pedersen().clone();
        let n = self.params.n();
        let index = self.params.index();
        let rho_degree = self.params.rho_degree();
        let sigma_degree = self.params.sigma_degree();

        // one sharing (or double sharing) per batch element
        let mut rho_sharings = Vec::with_capacity(batch);
        let mut sigma_sharings = Vec::with_capacity(batch);
        for _ in 0..batch {
            let secret = match variant {
                Variant::RnZero => field.zero(),
                _ => field.random(&mut self.rng),
            };
            if variant == Variant::RnTuple {
                rho_sharings.push(
                    vss::vshare_with_degree(&ped, &secret, n, rho_degree, &mut self.rng)
                        .expect("parameters are validated"),
                );
                sigma_sharings.push(
                    vss::vshare_with_degree(&ped, &secret, n, sigma_degree, &mut self.rng)
                        .expect("parameters are validated"),
                );
            } else {
                sigma_sharings.push(
                    vss::vshare_with_degree(&ped, &secret, n, rho_degree, &mut self.rng)
                        .expect("parameters are validated"),
                );
            }
        }

        let mut outputs = Vec::with_capacity(n as usize);
        for to in 1..=n {
            let at = (to - 1) as usize;
            let message = RnShares {
                id,
                to,
                from: index,
                rhos: rho_sharings.iter().map(|s| s[at].clone()).collect(),
                sigmas: sigma_sharings.iter().map(|s| s[at].clone()).collect(),
            };
            if to == index {
                outputs.extend(self.receive_shares(message));
            } else {
                outputs.push(RngOutput::RnShares(message));
            }
        }
        outputs
    }

    fn receive_shares(&mut self, message: RnShares) -> Vec<RngOutput> {
        let id = message.id;
        if self.results.contains_key(&id) {
            return Vec::new();
        }
        if message.from == 0 || message.from > self.params.n() {
            return vec![RngOutput::Err {
                id,
                reason: ProtocolError::SenderOutOfRange(message.from),
            }];
        }
        if message.to != self.params.index() {
            return vec![RngOutput::Err {
                id,
                reason: ProtocolError::ShareIndexMismatch,
            }];
        }
        let batch = message.sigmas.len();
        if !message.rhos.is_empty() && message.rhos.len() != batch {
            return vec![RngOutput::Err {
                id,
                reason: ProtocolError::BatchMismatch,
            }];
        }
        // rho sharings always sit at degree k-1; sigma sharings at degree
        // 2(k-1) for tuples and k-1 otherwise. Enforcing the commitment
        // counts here keeps later homomorphic sums well-formed.
        let rho_commitments = self.params.open_quorum() as usize;
        let sigma_commitments = if message.rhos.is_empty() {
            rho_commitments
        } else {
            self.params.mul_quorum() as usize
        };
        for (vs, commitments) in message
            .rhos
            .iter()
            .map(|vs| (vs, rho_commitments))
            .chain(message.sigmas.iter().map(|vs| (vs, sigma_commitments)))
        {
            if vs.index() != self.params.index() {
                return vec![RngOutput::Err {
                    id,
                    reason: ProtocolError::ShareIndexMismatch,
                }];
            }
            if vs.commitments().len() != commitments || !vss::verify(self.params.pedersen(), vs) {
                return vec![RngOutput::Err {
                    id,
                    reason: ProtocolError::CommitmentInvalid,
                }];
            }
        }

        let generation = self.generations.entry(id).or_default();
        match generation.batch {
            Some(existing) if existing != batch => {
                return vec![RngOutput::Err {
                    id,
                    reason: ProtocolError::BatchMismatch,
                }];
            }
            _ => generation.batch = Some(batch),
        }
        generation
            .contributions
            .insert(message.from, (message.rhos, message.sigmas));

        let mut outputs = self.try_propose(id);
        outputs.extend(self.try_complete(id));
        outputs
    }

    fn receive_proposal(&mut self, message: ProposeRnShare) -> Vec<RngOutput> {
        let id = message.id;
        if self.results.contains_key(&id) {
            return Vec::new();
        }
        let valid_players = message.players.len() as u64 == self.params.open_quorum()
            && message
                .players
                .iter()
                .all(|&p| p >= 1 && p <= self.params.n());
        if message.from != self.params.leader() || !valid_players {
            return vec![RngOutput::Err {
                id,
                reason: ProtocolError::UnexpectedProposal,
            }];
        }

        let generation = self.generations.entry(id).or_default();
        generation.proposal = Some(message.players);
        self.try_complete(id)
    }

    fn try_propose(&mut self, id: MessageId) -> Vec<RngOutput> {
        if !self.params.is_leader() {
            return Vec::new();
        }
        let quorum = self.params.open_quorum();
        let index = self.params.index();
        let Some(generation) = self.generations.get_mut(&id) else {
            return Vec::new();
        };
        if generation.proposed || (generation.contributions.len() as u64) < quorum {
            return Vec::new();
        }
        let players: BTreeSet<u64> = generation
            .contributions
            .keys()
            .take(quorum as usize)
            .copied()
            .collect();
        generation.proposed = true;
        generation.proposal = Some(players.clone());
        tracing::debug!(?players, "proposing contributor set");
        vec![RngOutput::ProposeRnShare(ProposeRnShare {
            id,
            from: index,
            players,
        })]
    }

    fn try_complete(&mut self, id: MessageId) -> Vec<RngOutput> {
        let Some(generation) = self.generations.get(&id) else {
            return Vec::new();
        };
        let Some(players) = &generation.proposal else {
            return Vec::new();
        };
        if !players
            .iter()
            .all(|p| generation.contributions.contains_key(p))
        {
            return Vec::new();
        }
        let Some(batch) = generation.batch else {
            return Vec::new();
        };

        // all chosen contributions must agree on whether rhos are present
        let with_rhos = players
            .iter()
            .all(|p| !generation.contributions[p].0.is_empty());
        let without_rhos = players
            .iter()
            .all(|p| generation.contributions[p].0.is_empty());
        if !with_rhos && !without_rhos {
            self.generations.remove(&id);
            return vec![RngOutput::Err {
                id,
                reason: ProtocolError::BatchMismatch,
            }];
        }

        let mut rhos = Vec::with_capacity(if with_rhos { batch } else { 0 });
        let mut sigmas = Vec::with_capacity(batch);
        for b in 0..batch {
            let mut rho_acc: Option<VerifiableShare> = None;
            let mut sigma_acc: Option<VerifiableShare> = None;
            for p in players {
                let (contributed_rhos, contributed_sigmas) = &generation.contributions[p];
                if with_rhos {
                    rho_acc = Some(match rho_acc {
                        None => contributed_rhos[b].clone(),
                        Some(acc) => &acc + &contributed_rhos[b],
                    });
                }
                sigma_acc = Some(match sigma_acc {
                    None => contributed_sigmas[b].clone(),
                    Some(acc) => &acc + &contributed_sigmas[b],
                });
            }
            if let Some(acc) = rho_acc {
                rhos.push(acc.into_share());
            }
            sigmas.push(sigma_acc.expect("batch positions are non-empty").into_share());
        }

        let result = RngResult { id, rhos, sigmas };
        self.generations.remove(&id);
        self.results.insert(id, (None, result.clone()));
        tracing::debug!(batch, "randomness generation complete");
        vec![RngOutput::Result(result)]
    }

    fn sweep(&mut self, now: Instant) -> Vec<RngOutput> {
        let timeout = self.params.timeout();
        let mut outputs = Vec::new();
        self.generations.retain(|id, generation| match generation.created {
            None => {
                generation.created = Some(now);
                true
            }
            Some(created) if now.saturating_duration_since(created) >= timeout => {
                tracing::debug!(?id, "randomness generation timed out");
                outputs.push(RngOutput::Err {
                    id: *id,
                    reason: ProtocolError::Deadline,
                });
                false
            }
            Some(_) => true,
        });
        self.results.retain(|_, entry| match entry.0 {
            None => {
                entry.0 = Some(now);
                true
            }
            Some(created) => now.saturating_duration_since(created) < timeout,
        });
        outputs
    }
}

impl Reducer for Rnger {
    type Input = RngMessage;
    type Output = RngOutput;

    fn reduce(&mut self, input: RngMessage) -> Reduction<RngOutput> {
        let mut outputs = match input {
            RngMessage::GenerateRn { id, batch } => self.generate(id, batch, Variant::Rn),
            RngMessage::GenerateRnZero { id, batch } => self.generate(id, batch, Variant::RnZero),
            RngMessage::GenerateRnTuple { id, batch } => {
                self.generate(id, batch, Variant::RnTuple)
            }
            RngMessage::RnShares(message) => self.receive_shares(message),
            RngMessage::ProposeRnShare(message) => self.receive_proposal(message),
            RngMessage::Evict { id } => {
                self.results.remove(&id);
                Vec::new()
            }
            RngMessage::CheckDeadline { now } => self.sweep(now),
        };
        match outputs.len() {
            0 => Reduction::None,
            1 => Reduction::One(outputs.remove(0)),
            _ => Reduction::Many(outputs),
        }
    }
}
