//! Prime-field algebra over runtime moduli.
//!
//! Unlike fixed-modulus field crates, the prime q is a runtime value: a
//! [`Field`] is constructed once per computation from an arbitrary
//! (Miller-Rabin-checked) prime and handed around as a cheap clone.

use std::fmt;
use std::sync::Arc;

use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;
use rand::{CryptoRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::RngType;
use self::modular::ModOps;

pub mod modular;

/// Number of Miller-Rabin rounds used to vet a modulus.
pub const MILLER_RABIN_ROUNDS: usize = 40;

/// Errors arising from field construction and element arithmetic.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AlgebraError {
    /// The modulus handed to [`Field::new`] is not a positive prime.
    #[error("modulus is not a positive prime")]
    NotPrime,
    /// The value is not a canonical residue of the field.
    #[error("value is not a canonical element of the field")]
    NotInField,
    /// Zero has no multiplicative inverse.
    #[error("division by zero")]
    DivisionByZero,
}

/// A prime field F_q, parameterized at runtime.
///
/// Cloning is cheap; equality is equality of the primes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    prime: Arc<BigUint>,
}

impl Field {
    /// Creates the field of integers modulo `prime`.
    ///
    /// Fails with [`AlgebraError::NotPrime`] unless the modulus passes
    /// [`MILLER_RABIN_ROUNDS`] rounds of Miller-Rabin.
    pub fn new(prime: BigUint) -> Result<Self, AlgebraError> {
        let mut rng = RngType::from_entropy();
        if !modular::is_probable_prime(&prime, MILLER_RABIN_ROUNDS, &mut rng) {
            return Err(AlgebraError::NotPrime);
        }
        Ok(Self {
            prime: Arc::new(prime),
        })
    }

    /// The prime modulus q.
    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    /// Whether `value` is a canonical residue, i.e. `0 <= value < q`.
    pub fn contains(&self, value: &BigUint) -> bool {
        value < &self.prime
    }

    /// Lifts a canonical residue into the field.
    pub fn element(&self, value: BigUint) -> Result<FieldElement, AlgebraError> {
        if !self.contains(&value) {
            return Err(AlgebraError::NotInField);
        }
        Ok(FieldElement {
            value,
            field: self.clone(),
        })
    }

    /// Lifts an arbitrary integer into the field by reduction mod q.
    pub fn reduce(&self, value: BigUint) -> FieldElement {
        FieldElement {
            value: value % &*self.prime,
            field: self.clone(),
        }
    }

    /// Lifts a small integer into the field by reduction mod q.
    pub fn from_u64(&self, value: u64) -> FieldElement {
        self.reduce(BigUint::from(value))
    }

    /// The additive identity.
    pub fn zero(&self) -> FieldElement {
        FieldElement {
            value: BigUint::zero(),
            field: self.clone(),
        }
    }

    /// The multiplicative identity.
    pub fn one(&self) -> FieldElement {
        self.from_u64(1)
    }

    /// Draws a uniform element of `[0, q)` from a cryptographically secure
    /// source.
    pub fn random<R: Rng + CryptoRng>(&self, rng: &mut R) -> FieldElement {
        FieldElement {
            value: rng.gen_biguint_below(&self.prime),
            field: self.clone(),
        }
    }

    /// Decodes a big-endian unsigned byte string into a field element.
    pub fn element_from_bytes_be(&self, bytes: &[u8]) -> Result<FieldElement, AlgebraError> {
        self.element(BigUint::from_bytes_be(bytes))
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field(q = {})", self.prime)
    }
}

/// A canonical residue in `[0, q)` together with its [`Field`].
///
/// Elements of different fields never compare equal; arithmetic between
/// them is a programmer error and panics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldElement {
    value: BigUint,
    field: Field,
}

impl FieldElement {
    /// The field this element belongs to.
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// The canonical integer representative.
    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// Whether this is the additive identity.
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// The multiplicative inverse; fails on zero.
    pub fn inv(&self) -> Result<FieldElement, AlgebraError> {
        let inverse = self
            .value
            .mod_inverse(self.field.prime())
            .ok_or(AlgebraError::DivisionByZero)?;
        Ok(FieldElement {
            value: inverse,
            field: self.field.clone(),
        })
    }

    /// Encodes the element as a minimum-length big-endian byte string.
    pub fn to_bytes_be(&self) -> Vec<u8> {
        self.value.to_bytes_be()
    }

    fn assert_same_field(&self, rhs: &FieldElement) {
        assert_eq!(self.field, rhs.field, "arithmetic between different fields");
    }
}

impl std::ops::Add for &FieldElement {
    type Output = FieldElement;

    fn add(self, rhs: &FieldElement) -> FieldElement {
        self.assert_same_field(rhs);
        FieldElement {
            value: self.value.add_mod(&rhs.value, self.field.prime()),
            field: self.field.clone(),
        }
    }
}

impl std::ops::Sub for &FieldElement {
    type Output = FieldElement;

    fn sub(self, rhs: &FieldElement) -> FieldElement {
        self.assert_same_field(rhs);
        FieldElement {
            value: self.value.sub_mod(&rhs.value, self.field.prime()),
            field: self.field.clone(),
        }
    }
}

impl std::ops::Mul for &FieldElement {
    type Output = FieldElement;

    fn mul(self, rhs: &FieldElement) -> FieldElement {
        self.assert_same_field(rhs);
        FieldElement {
            value: self.value.mul_mod(&rhs.value, self.field.prime()),
            field: self.field.clone(),
        }
    }
}

impl std::ops::Neg for &FieldElement {
    type Output = FieldElement;

    fn neg(self) -> FieldElement {
        FieldElement {
            value: BigUint::zero().sub_mod(&self.value, self.field.prime()),
            field: self.field.clone(),
        }
    }
}

impl std::ops::Add for FieldElement {
    type Output = FieldElement;

    fn add(self, rhs: FieldElement) -> FieldElement {
        &self + &rhs
    }
}

impl std::ops::Sub for FieldElement {
    type Output = FieldElement;

    fn sub(self, rhs: FieldElement) -> FieldElement {
        &self - &rhs
    }
}

impl std::ops::Mul for FieldElement {
    type Output = FieldElement;

    fn mul(self, rhs: FieldElement) -> FieldElement {
        &self * &rhs
    }
}

impl std::ops::Neg for FieldElement {
    type Output = FieldElement;

    fn neg(self) -> FieldElement {
        -&self
    }
}

#[cfg(test)]
mod algebra_test {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    const TESTRUNS: usize = 10;

    fn f251() -> Field {
        Field::new(BigUint::from(251u64)).unwrap()
    }

    #[test]
    fn test_rejects_non_primes() {
        assert_eq!(
            Field::new(BigUint::from(0u64)).unwrap_err(),
            AlgebraError::NotPrime
        );
        assert_eq!(
            Field::new(BigUint::from(1u64)).unwrap_err(),
            AlgebraError::NotPrime
        );
        assert_eq!(
            Field::new(BigUint::from(250u64)).unwrap_err(),
            AlgebraError::NotPrime
        );
    }

    #[test]
    fn test_canonical_representatives() {
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();
        for _ in 0..TESTRUNS {
            let a = field.random(&mut rng);
            let b = field.random(&mut rng);
            for v in [&a + &b, &a - &b, &a * &b, -&a] {
                assert!(field.contains(v.value()));
            }
        }
        assert!(field.element(BigUint::from(251u64)).is_err());
        assert!(field.contains(&BigUint::from(250u64)));
    }

    #[test]
    fn test_field_axioms() {
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();
        for _ in 0..TESTRUNS {
            let a = field.random(&mut rng);
            let b = field.random(&mut rng);
            let c = field.random(&mut rng);
            assert_eq!(&a + &b, &b + &a);
            assert_eq!(&(&a + &b) + &c, &a + &(&b + &c));
            assert_eq!(&a * &(&b + &c), &(&a * &b) + &(&a * &c));
            assert_eq!(&a - &a, field.zero());
            assert_eq!(&a * &field.one(), a);
        }
    }

    #[test]
    fn test_inverse() {
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();
        for _ in 0..TESTRUNS {
            let a = field.random(&mut rng);
            if a.is_zero() {
                assert_eq!(a.inv().unwrap_err(), AlgebraError::DivisionByZero);
                continue;
            }
            assert_eq!(&a * &a.inv().unwrap(), field.one());
        }
        assert_eq!(field.zero().inv().unwrap_err(), AlgebraError::DivisionByZero);
    }

    #[test]
    fn test_cross_field_equality_is_false() {
        let a = f251().from_u64(1);
        let b = Field::new(BigUint::from(257u64)).unwrap().from_u64(1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_byte_round_trip() {
        let field = f251();
        let a = field.from_u64(163);
        assert_eq!(a.to_bytes_be(), vec![163u8]);
        assert_eq!(field.element_from_bytes_be(&a.to_bytes_be()).unwrap(), a);
    }
}
