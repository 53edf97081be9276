//! Shamir secret sharing over a runtime prime field.
//!
//! A secret s is hidden as the constant term of a polynomial of degree
//! k - 1 with uniform coefficients; participant i holds the evaluation
//! (i, f(i)). Any k distinct evaluations reconstruct f(0) by Lagrange
//! interpolation, fewer reveal nothing.

use std::collections::BTreeSet;

use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

use crate::algebra::{Field, FieldElement};

/// Errors arising from sharing and reconstruction.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShamirError {
    /// Sharing parameters are unusable (k < 1, n < k, or degree >= n).
    #[error("invalid sharing parameters: n = {n}, degree = {degree}")]
    InvalidParameters {
        /// Number of shares requested.
        n: u64,
        /// Degree of the sharing polynomial.
        degree: u64,
    },
    /// Reconstruction needs at least one share.
    #[error("cannot reconstruct from an empty share set")]
    NoShares,
    /// Two shares carry the same evaluation point.
    #[error("duplicate share index {0}")]
    DuplicateIndex(u64),
}

/// One evaluation (i, f(i)) of a sharing polynomial.
///
/// Shares of the same polynomial combine componentwise: addition adds the
/// y-coordinates, multiplication multiplies them (and doubles the degree
/// of the underlying polynomial).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    index: u64,
    value: FieldElement,
}

impl Share {
    /// Creates a share from an evaluation point and value. The index is
    /// 1-based; 0 would leak the secret itself.
    pub fn new(index: u64, value: FieldElement) -> Self {
        assert_ne!(index, 0, "share index 0 is the secret");
        Self { index, value }
    }

    /// The evaluation point i.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The evaluation value f(i).
    pub fn value(&self) -> &FieldElement {
        &self.value
    }

    /// Adds a public constant to the underlying polynomial.
    pub fn add_public(&self, constant: &FieldElement) -> Share {
        Share {
            index: self.index,
            value: &self.value + constant,
        }
    }

    /// Subtracts a public constant from the underlying polynomial.
    pub fn sub_public(&self, constant: &FieldElement) -> Share {
        Share {
            index: self.index,
            value: &self.value - constant,
        }
    }

    /// Encodes the share as `(index: u64 BE) || (value BE minimal)`.
    pub fn to_bytes_be(&self) -> Vec<u8> {
        let mut bytes = self.index.to_be_bytes().to_vec();
        bytes.extend(self.value.to_bytes_be());
        bytes
    }

    fn assert_same_index(&self, rhs: &Share) {
        assert_eq!(
            self.index, rhs.index,
            "share arithmetic requires matching indices"
        );
    }
}

impl std::ops::Add for &Share {
    type Output = Share;

    fn add(self, rhs: &Share) -> Share {
        self.assert_same_index(rhs);
        Share {
            index: self.index,
            value: &self.value + &rhs.value,
        }
    }
}

impl std::ops::Sub for &Share {
    type Output = Share;

    fn sub(self, rhs: &Share) -> Share {
        self.assert_same_index(rhs);
        Share {
            index: self.index,
            value: &self.value - &rhs.value,
        }
    }
}

impl std::ops::Mul for &Share {
    type Output = Share;

    fn mul(self, rhs: &Share) -> Share {
        self.assert_same_index(rhs);
        Share {
            index: self.index,
            value: &self.value * &rhs.value,
        }
    }
}

impl std::ops::Neg for &Share {
    type Output = Share;

    fn neg(self) -> Share {
        Share {
            index: self.index,
            value: -&self.value,
        }
    }
}

/// Shares `secret` among n participants with reconstruction threshold k,
/// i.e. over a polynomial of degree k - 1.
pub fn share<R: Rng + CryptoRng>(
    secret: &FieldElement,
    n: u64,
    k: u64,
    rng: &mut R,
) -> Result<Vec<Share>, ShamirError> {
    if k < 1 {
        return Err(ShamirError::InvalidParameters { n, degree: 0 });
    }
    share_with_degree(secret, n, k - 1, rng)
}

/// Shares `secret` over a polynomial of the given degree.
///
/// The explicit-degree form is what the randomness protocol uses to produce
/// the degree-2(k-1) half of a double sharing.
pub fn share_with_degree<R: Rng + CryptoRng>(
    secret: &FieldElement,
    n: u64,
    degree: u64,
    rng: &mut R,
) -> Result<Vec<Share>, ShamirError> {
    if n == 0 || degree >= n {
        return Err(ShamirError::InvalidParameters { n, degree });
    }
    let field = secret.field();
    let mut coeffs = Vec::with_capacity(degree as usize + 1);
    coeffs.push(secret.clone());
    for _ in 0..degree {
        coeffs.push(field.random(rng));
    }
    Ok((1..=n)
        .map(|i| Share::new(i, evaluate_poly(&coeffs, &field.from_u64(i))))
        .collect())
}

/// Reconstructs f(0) from the given shares by Lagrange interpolation.
///
/// All supplied shares are used; callers are responsible for providing at
/// least degree + 1 of them. Fails on an empty set and on duplicate
/// indices.
pub fn join(shares: &[Share]) -> Result<FieldElement, ShamirError> {
    let first = shares.first().ok_or(ShamirError::NoShares)?;
    let field = first.value().field().clone();

    let mut seen = BTreeSet::new();
    for share in shares {
        if !seen.insert(share.index()) {
            return Err(ShamirError::DuplicateIndex(share.index()));
        }
    }

    let indices = shares.iter().map(Share::index).collect::<Vec<_>>();
    let lagrange = lagrange_at_zero(&field, &indices)?;

    let mut result = field.zero();
    for (share, coeff) in shares.iter().zip(lagrange.iter()) {
        result = &result + &(share.value() * coeff);
    }
    Ok(result)
}

/// Horner evaluation of a polynomial given by its coefficients, constant
/// term first.
pub(crate) fn evaluate_poly(poly: &[FieldElement], x: &FieldElement) -> FieldElement {
    debug_assert!(!poly.is_empty());
    let mut iter = poly.iter().rev();
    let mut eval = iter.next().expect("polynomial is non-empty").clone();
    for coeff in iter {
        eval = &(&eval * x) + coeff;
    }
    eval
}

/// Lagrange coefficients for interpolating at x = 0 over the given
/// evaluation points.
fn lagrange_at_zero(field: &Field, indices: &[u64]) -> Result<Vec<FieldElement>, ShamirError> {
    let mut coeffs = Vec::with_capacity(indices.len());
    for &i in indices {
        let mut num = field.one();
        let mut den = field.one();
        let i_ = field.from_u64(i);
        for &j in indices {
            if i != j {
                let j_ = field.from_u64(j);
                num = &num * &j_;
                den = &den * &(&j_ - &i_);
            }
        }
        // distinct indices can still collide mod q
        let den = den
            .inv()
            .map_err(|_| ShamirError::DuplicateIndex(i))?;
        coeffs.push(&num * &den);
    }
    Ok(coeffs)
}
