//! Verifiable secret sharing: Shamir shares bound to Pedersen commitments.
//!
//! The dealer commits to every coefficient of the sharing polynomial f
//! (blinded by a second polynomial r), so each holder of a share (i, f(i))
//! can check locally that it lies on the committed polynomial. The whole
//! construction is additively homomorphic.

use num_bigint::BigUint;
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

use crate::algebra::modular::ModOps;
use crate::pedersen::{Commitment, Pedersen, PedersenError};
use crate::shamir::{self, Share, ShamirError};
use crate::algebra::FieldElement;

/// Errors arising from dealing verifiable shares.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VssError {
    /// The secret does not live in F_q of the scheme.
    #[error("secret is not an element of the scheme's F_q")]
    FieldMismatch,
    /// The underlying Shamir sharing failed.
    #[error(transparent)]
    Shamir(#[from] ShamirError),
    /// Committing to a coefficient failed.
    #[error(transparent)]
    Pedersen(#[from] PedersenError),
}

/// A Shamir share plus the blinding share and the dealer's coefficient
/// commitments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiableShare {
    share: Share,
    blinding: Share,
    commitments: Vec<Commitment>,
}

impl VerifiableShare {
    /// Bundles a share, its blinding share and the commitment vector.
    pub fn new(share: Share, blinding: Share, commitments: Vec<Commitment>) -> Self {
        assert_eq!(
            share.index(),
            blinding.index(),
            "share and blinding share must sit at the same index"
        );
        Self {
            share,
            blinding,
            commitments,
        }
    }

    /// The secret-carrying share (i, f(i)).
    pub fn share(&self) -> &Share {
        &self.share
    }

    /// The blinding share (i, r(i)).
    pub fn blinding(&self) -> &Share {
        &self.blinding
    }

    /// The dealer's coefficient commitments C_0 .. C_d.
    pub fn commitments(&self) -> &[Commitment] {
        &self.commitments
    }

    /// The evaluation point.
    pub fn index(&self) -> u64 {
        self.share.index()
    }

    /// Extracts the secret-carrying share.
    pub fn into_share(self) -> Share {
        self.share
    }
}

impl std::ops::Add for &VerifiableShare {
    type Output = VerifiableShare;

    fn add(self, rhs: &VerifiableShare) -> VerifiableShare {
        assert_eq!(
            self.commitments.len(),
            rhs.commitments.len(),
            "adding shares of different degrees"
        );
        VerifiableShare {
            share: &self.share + &rhs.share,
            blinding: &self.blinding + &rhs.blinding,
            commitments: self
                .commitments
                .iter()
                .zip(rhs.commitments.iter())
                .map(|(a, b)| a * b)
                .collect(),
        }
    }
}

/// Deals `secret` into n verifiable shares with reconstruction threshold k.
pub fn vshare<R: Rng + CryptoRng>(
    ped: &Pedersen,
    secret: &FieldElement,
    n: u64,
    k: u64,
    rng: &mut R,
) -> Result<Vec<VerifiableShare>, VssError> {
    if k < 1 {
        return Err(VssError::Shamir(ShamirError::InvalidParameters {
            n,
            degree: 0,
        }));
    }
    vshare_with_degree(ped, secret, n, k - 1, rng)
}

/// Deals `secret` over polynomials of the given degree.
pub fn vshare_with_degree<R: Rng + CryptoRng>(
    ped: &Pedersen,
    secret: &FieldElement,
    n: u64,
    degree: u64,
    rng: &mut R,
) -> Result<Vec<VerifiableShare>, VssError> {
    let field = secret.field();
    if field.prime() != ped.q() {
        return Err(VssError::FieldMismatch);
    }
    if n == 0 || degree >= n {
        return Err(VssError::Shamir(ShamirError::InvalidParameters {
            n,
            degree,
        }));
    }

    // f hides the secret, r blinds the commitments
    let mut f = Vec::with_capacity(degree as usize + 1);
    let mut r = Vec::with_capacity(degree as usize + 1);
    f.push(secret.clone());
    r.push(field.random(rng));
    for _ in 0..degree {
        f.push(field.random(rng));
        r.push(field.random(rng));
    }

    let commitments = f
        .iter()
        .zip(r.iter())
        .map(|(a, b)| ped.commit(a, b))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((1..=n)
        .map(|i| {
            let x = field.from_u64(i);
            VerifiableShare {
                share: Share::new(i, shamir::evaluate_poly(&f, &x)),
                blinding: Share::new(i, shamir::evaluate_poly(&r, &x)),
                commitments: commitments.clone(),
            }
        })
        .collect())
}

/// Checks that the share lies on the committed polynomial:
/// g^f(i) * h^r(i) must equal the product of C_j^(i^j) mod p.
///
/// Panics if the commitment vector is empty.
pub fn verify(ped: &Pedersen, vs: &VerifiableShare) -> bool {
    assert!(
        !vs.commitments().is_empty(),
        "verifiable share carries no commitments"
    );

    let lhs = ped.commit_exponents(vs.share().value().value(), vs.blinding().value().value());

    let index = BigUint::from(vs.index());
    let mut exponent = BigUint::from(1u64);
    let mut rhs = vs.commitments()[0].clone();
    for commitment in &vs.commitments()[1..] {
        exponent = exponent.mul_mod(&index, ped.q());
        rhs = &rhs * &commitment.pow(&exponent);
    }
    lhs == rhs
}

#[cfg(test)]
mod vss_test {
    use super::*;
    use crate::algebra::Field;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    const TESTRUNS: usize = 10;

    fn scheme() -> Pedersen {
        Pedersen::new(
            BigUint::from(503u64),
            BigUint::from(251u64),
            BigUint::from(351u64),
            BigUint::from(8u64),
        )
        .unwrap()
    }

    fn f251() -> Field {
        Field::new(BigUint::from(251u64)).unwrap()
    }

    #[test]
    fn test_all_shares_verify_and_reconstruct() {
        let ped = scheme();
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();

        for _ in 0..TESTRUNS {
            let secret = field.random(&mut rng);
            let vshares = vshare(&ped, &secret, 5, 3, &mut rng).unwrap();
            assert_eq!(vshares.len(), 5);
            for vs in &vshares {
                assert!(verify(&ped, vs));
            }

            let shares = vshares
                .iter()
                .map(|vs| vs.share().clone())
                .collect::<Vec<_>>();
            for window in shares.windows(3) {
                assert_eq!(shamir::join(window).unwrap(), secret);
            }
        }
    }

    #[test]
    fn test_tampered_share_fails() {
        let ped = scheme();
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();

        for _ in 0..TESTRUNS {
            let secret = field.random(&mut rng);
            let offset = loop {
                let r = field.random(&mut rng);
                if !r.is_zero() {
                    break r;
                }
            };
            let vshares = vshare(&ped, &secret, 5, 3, &mut rng).unwrap();
            for vs in vshares {
                let tampered = VerifiableShare::new(
                    vs.share().add_public(&offset),
                    vs.blinding().clone(),
                    vs.commitments().to_vec(),
                );
                assert!(!verify(&ped, &tampered));

                let tampered = VerifiableShare::new(
                    vs.share().clone(),
                    vs.blinding().add_public(&offset),
                    vs.commitments().to_vec(),
                );
                assert!(!verify(&ped, &tampered));
            }
        }
    }

    #[test]
    #[should_panic(expected = "no commitments")]
    fn test_empty_commitments_panic() {
        let ped = scheme();
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();
        let vs = vshare(&ped, &field.from_u64(17), 5, 3, &mut rng)
            .unwrap()
            .swap_remove(0);
        let gutted = VerifiableShare::new(vs.share().clone(), vs.blinding().clone(), Vec::new());
        verify(&ped, &gutted);
    }

    #[test]
    fn test_homomorphic_addition() {
        let ped = scheme();
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();

        for _ in 0..TESTRUNS {
            let a = field.random(&mut rng);
            let b = field.random(&mut rng);
            let shares_a = vshare(&ped, &a, 5, 3, &mut rng).unwrap();
            let shares_b = vshare(&ped, &b, 5, 3, &mut rng).unwrap();

            let sums = shares_a
                .iter()
                .zip(shares_b.iter())
                .map(|(x, y)| x + y)
                .collect::<Vec<_>>();
            for vs in &sums {
                assert!(verify(&ped, vs));
            }

            let shares = sums
                .iter()
                .map(|vs| vs.share().clone())
                .collect::<Vec<_>>();
            assert_eq!(shamir::join(&shares[..3]).unwrap(), &a + &b);
        }
    }

    #[test]
    fn test_rejects_wrong_field() {
        let ped = scheme();
        let wrong = Field::new(BigUint::from(257u64)).unwrap();
        let mut rng = ChaCha12Rng::from_entropy();
        assert_eq!(
            vshare(&ped, &wrong.from_u64(4), 5, 3, &mut rng).unwrap_err(),
            VssError::FieldMismatch
        );
    }
}
