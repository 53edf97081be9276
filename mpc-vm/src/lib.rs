//! # MPC VM
//!
//! The computation pipeline of the runtime: a stack-machine interpreter
//! over public and secret-shared values that suspends on instructions
//! requiring distributed work, the three protocol tasks that perform that
//! work (shared-randomness generation, multiplication, opening), and the
//! dispatcher that routes intents to tasks and results back to the paused
//! program.

#![warn(missing_docs)]

use std::time::Duration;

use mpc_core::algebra::Field;
use mpc_core::pedersen::Pedersen;

pub mod mul;
pub mod open;
pub mod program;
pub mod rng;
mod stack;
pub mod vm;

pub(crate) type RngType = rand_chacha::ChaCha12Rng;

/// Runtime protocol failures, reported per message id.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A second signal arrived for an id that is still in flight.
    #[error("duplicate protocol id")]
    DuplicateId,
    /// The instance did not reach quorum before its deadline.
    #[error("deadline exceeded before quorum")]
    Deadline,
    /// The sender index is not a participant.
    #[error("sender index {0} out of range")]
    SenderOutOfRange(u64),
    /// A received share does not sit at the expected evaluation point.
    #[error("share index does not match its sender or recipient")]
    ShareIndexMismatch,
    /// Message batches for one id differ in size.
    #[error("inconsistent batch size")]
    BatchMismatch,
    /// A contributed share failed Pedersen verification.
    #[error("share commitment does not verify")]
    CommitmentInvalid,
    /// A randomness proposal came from a participant that is not the
    /// leader, or names an impossible player set.
    #[error("unacceptable randomness proposal")]
    UnexpectedProposal,
}

/// Errors raised while validating [`Parameters`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    /// The own index must lie in 1..=n.
    #[error("participant index {index} out of range 1..={n}")]
    IndexOutOfRange {
        /// The offending index.
        index: u64,
        /// Number of participants.
        n: u64,
    },
    /// k must be at least 2 for any secrecy at all.
    #[error("reconstruction threshold {0} is too small")]
    ThresholdTooSmall(u64),
    /// Degree-2(k-1) openings need 2k - 1 participants.
    #[error("{n} participants cannot open degree-2(k-1) sharings at threshold {k}")]
    TooFewParticipants {
        /// Number of participants.
        n: u64,
        /// Reconstruction threshold.
        k: u64,
    },
    /// The field must be F_q of the Pedersen scheme.
    #[error("field prime does not match the Pedersen subgroup order")]
    FieldMismatch,
}

/// The static parameters of one computation, shared by the dispatcher and
/// all protocol tasks. Validated once, read-only afterwards.
#[derive(Clone, Debug)]
pub struct Parameters {
    index: u64,
    n: u64,
    k: u64,
    field: Field,
    pedersen: Pedersen,
    timeout: Duration,
}

impl Parameters {
    /// Validates and creates the parameter set for participant `index` of
    /// `n` with reconstruction threshold `k`.
    pub fn new(
        index: u64,
        n: u64,
        k: u64,
        field: Field,
        pedersen: Pedersen,
        timeout: Duration,
    ) -> Result<Self, ParameterError> {
        if index == 0 || index > n {
            return Err(ParameterError::IndexOutOfRange { index, n });
        }
        if k < 2 {
            return Err(ParameterError::ThresholdTooSmall(k));
        }
        if n < 2 * k - 1 {
            return Err(ParameterError::TooFewParticipants { n, k });
        }
        if field.prime() != pedersen.q() {
            return Err(ParameterError::FieldMismatch);
        }
        Ok(Self {
            index,
            n,
            k,
            field,
            pedersen,
            timeout,
        })
    }

    /// This participant's 1-based index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Number of participants.
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Reconstruction threshold.
    pub fn k(&self) -> u64 {
        self.k
    }

    /// The computation field F_q.
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// The Pedersen scheme used to verify contributed shares.
    pub fn pedersen(&self) -> &Pedersen {
        &self.pedersen
    }

    /// How long a protocol instance may wait for quorum.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Degree of an ordinary sharing polynomial.
    pub fn rho_degree(&self) -> u64 {
        self.k - 1
    }

    /// Degree of the masking half of a double sharing.
    pub fn sigma_degree(&self) -> u64 {
        2 * (self.k - 1)
    }

    /// Shares needed to open a degree-(k-1) sharing.
    pub fn open_quorum(&self) -> u64 {
        self.k
    }

    /// Shares needed to open a degree-2(k-1) sharing.
    pub fn mul_quorum(&self) -> u64 {
        2 * self.k - 1
    }

    /// Whether this participant is the deterministic leader (lowest index).
    pub fn is_leader(&self) -> bool {
        self.index == 1
    }

    /// The deterministic leader's index.
    pub fn leader(&self) -> u64 {
        1
    }
}

#[cfg(test)]
mod parameters_test {
    use super::*;
    use num_bigint::BigUint;

    fn field_and_scheme() -> (Field, Pedersen) {
        (
            Field::new(BigUint::from(251u64)).unwrap(),
            Pedersen::new(
                BigUint::from(503u64),
                BigUint::from(251u64),
                BigUint::from(351u64),
                BigUint::from(8u64),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_validation() {
        let (field, ped) = field_and_scheme();
        let timeout = Duration::from_secs(5);
        assert!(Parameters::new(1, 5, 3, field.clone(), ped.clone(), timeout).is_ok());
        assert_eq!(
            Parameters::new(0, 5, 3, field.clone(), ped.clone(), timeout).unwrap_err(),
            ParameterError::IndexOutOfRange { index: 0, n: 5 }
        );
        assert_eq!(
            Parameters::new(6, 5, 3, field.clone(), ped.clone(), timeout).unwrap_err(),
            ParameterError::IndexOutOfRange { index: 6, n: 5 }
        );
        assert_eq!(
            Parameters::new(1, 5, 1, field.clone(), ped.clone(), timeout).unwrap_err(),
            ParameterError::ThresholdTooSmall(1)
        );
        assert_eq!(
            Parameters::new(1, 4, 3, field, ped, timeout).unwrap_err(),
            ParameterError::TooFewParticipants { n: 4, k: 3 }
        );
    }

    #[test]
    fn test_degrees_and_quorums() {
        let (field, ped) = field_and_scheme();
        let params =
            Parameters::new(2, 5, 3, field, ped, Duration::from_secs(5)).unwrap();
        assert_eq!(params.rho_degree(), 2);
        assert_eq!(params.sigma_degree(), 4);
        assert_eq!(params.open_quorum(), 3);
        assert_eq!(params.mul_quorum(), 5);
        assert!(!params.is_leader());
    }
}
