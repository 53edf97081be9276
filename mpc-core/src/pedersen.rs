//! Pedersen commitments in the order-q subgroup of (Z/pZ)*.
//!
//! A commitment c = g^s * h^t mod p is perfectly hiding and binding under
//! the discrete-log assumption, and multiplicatively homomorphic:
//! commit(s1, t1) * commit(s2, t2) = commit(s1 + s2, t1 + t2).

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::algebra::modular::{self, ModOps};
use crate::algebra::{FieldElement, MILLER_RABIN_ROUNDS};
use crate::RngType;

/// Errors arising from scheme construction and verification.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PedersenError {
    /// p or q is not a positive prime.
    #[error("scheme modulus is not a positive prime")]
    NotPrime,
    /// q does not divide p - 1, so there is no order-q subgroup.
    #[error("q does not divide p - 1")]
    OrderMismatch,
    /// A generator is 0, 1, or not reduced mod p.
    #[error("generator is trivial or out of range")]
    TrivialGenerator,
    /// A generator is not in the order-q subgroup.
    #[error("generator is not in the order-q subgroup")]
    NotSubgroup,
    /// The opening (s, t) lives in the wrong field.
    #[error("exponent is not an element of F_q")]
    WrongField,
    /// The commitment does not open to (s, t).
    #[error("unacceptable commitment")]
    UnacceptableCommitment,
}

/// A Pedersen commitment scheme (p, q, g, h).
///
/// Constructed once per computation; equality is structural.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pedersen {
    p: BigUint,
    q: BigUint,
    g: BigUint,
    h: BigUint,
}

impl Pedersen {
    /// Validates and creates a scheme.
    ///
    /// Requires p and q prime, q | (p - 1), and g, h non-trivial elements
    /// of the order-q subgroup.
    pub fn new(p: BigUint, q: BigUint, g: BigUint, h: BigUint) -> Result<Self, PedersenError> {
        let mut rng = RngType::from_entropy();
        if !modular::is_probable_prime(&p, MILLER_RABIN_ROUNDS, &mut rng)
            || !modular::is_probable_prime(&q, MILLER_RABIN_ROUNDS, &mut rng)
        {
            return Err(PedersenError::NotPrime);
        }
        if !((&p - 1u32) % &q).is_zero() {
            return Err(PedersenError::OrderMismatch);
        }
        for generator in [&g, &h] {
            if generator.is_one() || generator.is_zero() || *generator >= p {
                return Err(PedersenError::TrivialGenerator);
            }
            if !generator.pow_mod(&q, &p).is_one() {
                return Err(PedersenError::NotSubgroup);
            }
        }
        Ok(Self { p, q, g, h })
    }

    /// The group modulus p.
    pub fn p(&self) -> &BigUint {
        &self.p
    }

    /// The subgroup order q.
    pub fn q(&self) -> &BigUint {
        &self.q
    }

    /// Commits to s with blinding t: g^s * h^t mod p.
    pub fn commit(&self, s: &FieldElement, t: &FieldElement) -> Result<Commitment, PedersenError> {
        self.check_exponent(s)?;
        self.check_exponent(t)?;
        Ok(self.commit_exponents(s.value(), t.value()))
    }

    /// Checks that `commitment` opens to (s, t).
    pub fn verify(
        &self,
        s: &FieldElement,
        t: &FieldElement,
        commitment: &Commitment,
    ) -> Result<(), PedersenError> {
        if self.commit(s, t)? != *commitment {
            return Err(PedersenError::UnacceptableCommitment);
        }
        Ok(())
    }

    pub(crate) fn commit_exponents(&self, s: &BigUint, t: &BigUint) -> Commitment {
        let value = self
            .g
            .pow_mod(s, &self.p)
            .mul_mod(&self.h.pow_mod(t, &self.p), &self.p);
        Commitment {
            value,
            modulus: self.p.clone(),
        }
    }

    fn check_exponent(&self, e: &FieldElement) -> Result<(), PedersenError> {
        if *e.field().prime() != self.q {
            return Err(PedersenError::WrongField);
        }
        Ok(())
    }
}

/// An element of the order-q subgroup, represented as an integer mod p.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    value: BigUint,
    modulus: BigUint,
}

impl Commitment {
    /// The integer representative mod p.
    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// Raises the commitment to a public exponent.
    pub fn pow(&self, exponent: &BigUint) -> Commitment {
        Commitment {
            value: self.value.pow_mod(exponent, &self.modulus),
            modulus: self.modulus.clone(),
        }
    }

    /// Encodes the commitment as a minimum-length big-endian byte string.
    pub fn to_bytes_be(&self) -> Vec<u8> {
        self.value.to_bytes_be()
    }
}

impl std::ops::Mul for &Commitment {
    type Output = Commitment;

    fn mul(self, rhs: &Commitment) -> Commitment {
        assert_eq!(
            self.modulus, rhs.modulus,
            "commitments from different schemes"
        );
        Commitment {
            value: self.value.mul_mod(&rhs.value, &self.modulus),
            modulus: self.modulus.clone(),
        }
    }
}

#[cfg(test)]
mod pedersen_test {
    use super::*;
    use crate::algebra::Field;

    fn scheme() -> Pedersen {
        Pedersen::new(
            BigUint::from(503u64),
            BigUint::from(251u64),
            BigUint::from(351u64),
            BigUint::from(8u64),
        )
        .unwrap()
    }

    #[test]
    fn test_construction_validates_parameters() {
        // q must divide p - 1
        assert_eq!(
            Pedersen::new(
                BigUint::from(509u64),
                BigUint::from(251u64),
                BigUint::from(351u64),
                BigUint::from(8u64),
            )
            .unwrap_err(),
            PedersenError::OrderMismatch
        );
        // non-prime q
        assert_eq!(
            Pedersen::new(
                BigUint::from(503u64),
                BigUint::from(250u64),
                BigUint::from(351u64),
                BigUint::from(8u64),
            )
            .unwrap_err(),
            PedersenError::NotPrime
        );
        // 1 is not a generator
        assert_eq!(
            Pedersen::new(
                BigUint::from(503u64),
                BigUint::from(251u64),
                BigUint::from(1u64),
                BigUint::from(8u64),
            )
            .unwrap_err(),
            PedersenError::TrivialGenerator
        );
        // 5 has order 502, not 251
        assert_eq!(
            Pedersen::new(
                BigUint::from(503u64),
                BigUint::from(251u64),
                BigUint::from(5u64),
                BigUint::from(8u64),
            )
            .unwrap_err(),
            PedersenError::NotSubgroup
        );
    }

    #[test]
    fn test_commit_verify_round_trip() {
        let ped = scheme();
        let field = Field::new(BigUint::from(251u64)).unwrap();
        let s = field.from_u64(100);
        let t = field.from_u64(50);
        let c = ped.commit(&s, &t).unwrap();
        ped.verify(&s, &t, &c).unwrap();
        assert_eq!(
            ped.verify(&field.from_u64(101), &t, &c).unwrap_err(),
            PedersenError::UnacceptableCommitment
        );
    }

    #[test]
    fn test_homomorphism() {
        // commit(100, 50) * commit(80, 200) = commit(180, 250) mod 503
        let ped = scheme();
        let field = Field::new(BigUint::from(251u64)).unwrap();
        let lhs = &ped.commit(&field.from_u64(100), &field.from_u64(50)).unwrap()
            * &ped.commit(&field.from_u64(80), &field.from_u64(200)).unwrap();
        let rhs = ped
            .commit(&field.from_u64(180), &field.from_u64(250))
            .unwrap();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_wrong_field_is_rejected() {
        let ped = scheme();
        let wrong = Field::new(BigUint::from(257u64)).unwrap();
        assert_eq!(
            ped.commit(&wrong.from_u64(1), &wrong.from_u64(2)).unwrap_err(),
            PedersenError::WrongField
        );
    }
}
