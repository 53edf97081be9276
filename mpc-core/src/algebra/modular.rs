//! Modular big-integer arithmetic.
//!
//! Every modular operation performed by this crate goes through [`ModOps`],
//! so the choice of backing integer library and the shape of the
//! exponentiation ladder are auditable at a single site.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::{CryptoRng, Rng};

/// Modular arithmetic over unsigned big integers.
///
/// Inputs do not have to be reduced; every operation returns the canonical
/// representative in `[0, modulus)`.
pub trait ModOps: Sized {
    /// `(self + rhs) mod modulus`.
    fn add_mod(&self, rhs: &Self, modulus: &Self) -> Self;
    /// `(self - rhs) mod modulus`.
    fn sub_mod(&self, rhs: &Self, modulus: &Self) -> Self;
    /// `(self * rhs) mod modulus`.
    fn mul_mod(&self, rhs: &Self, modulus: &Self) -> Self;
    /// `self^exp mod modulus` via a square-and-multiply ladder of fixed
    /// length `modulus.bits()`. The ladder squares and multiplies on every
    /// iteration and selects by exponent bit, so its shape does not depend
    /// on the exponent value. Exponents must fit the modulus bit length.
    fn pow_mod(&self, exp: &Self, modulus: &Self) -> Self;
    /// The multiplicative inverse of `self` modulo `modulus` via the
    /// extended Euclidean algorithm, or `None` if no inverse exists.
    fn mod_inverse(&self, modulus: &Self) -> Option<Self>;
}

impl ModOps for BigUint {
    fn add_mod(&self, rhs: &Self, modulus: &Self) -> Self {
        (self + rhs) % modulus
    }

    fn sub_mod(&self, rhs: &Self, modulus: &Self) -> Self {
        let a = self % modulus;
        let b = rhs % modulus;
        if a >= b {
            a - b
        } else {
            modulus - (b - a)
        }
    }

    fn mul_mod(&self, rhs: &Self, modulus: &Self) -> Self {
        (self * rhs) % modulus
    }

    fn pow_mod(&self, exp: &Self, modulus: &Self) -> Self {
        debug_assert!(exp.bits() <= modulus.bits());
        if modulus.is_one() {
            return BigUint::zero();
        }
        let base = self % modulus;
        let mut acc = BigUint::one();
        for i in (0..modulus.bits()).rev() {
            acc = (&acc * &acc) % modulus;
            let multiplied = (&acc * &base) % modulus;
            if exp.bit(i) {
                acc = multiplied;
            }
        }
        acc
    }

    fn mod_inverse(&self, modulus: &Self) -> Option<Self> {
        let mut r0 = BigInt::from(modulus.clone());
        let mut r1 = BigInt::from(self % modulus);
        let mut t0 = BigInt::zero();
        let mut t1 = BigInt::one();
        while !r1.is_zero() {
            let q = &r0 / &r1;
            let r2 = &r0 - &q * &r1;
            r0 = std::mem::replace(&mut r1, r2);
            let t2 = &t0 - &q * &t1;
            t0 = std::mem::replace(&mut t1, t2);
        }
        if !r0.is_one() {
            return None;
        }
        let modulus = BigInt::from(modulus.clone());
        let t = ((t0 % &modulus) + &modulus) % &modulus;
        t.to_biguint()
    }
}

/// Miller-Rabin primality test with `rounds` random witnesses.
pub fn is_probable_prime<R: Rng + CryptoRng>(n: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let two = BigUint::from(2u64);
    let three = BigUint::from(3u64);
    if *n < two {
        return false;
    }
    if *n == two || *n == three {
        return true;
    }
    if !n.bit(0) {
        return false;
    }

    // n - 1 = d * 2^s with d odd
    let n_minus_one = n - 1u32;
    let mut d = n_minus_one.clone();
    let mut s = 0u64;
    while !d.bit(0) {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.pow_mod(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 0..s - 1 {
            x = x.mul_mod(&x, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
