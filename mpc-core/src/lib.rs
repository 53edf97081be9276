//! # MPC Core
//!
//! This crate implements the cryptographic core used by the rest of the
//! workspace: prime-field arithmetic over runtime moduli, [Shamir secret
//! sharing](https://dl.acm.org/doi/10.1145/359168.359176), Pedersen
//! commitments in an order-q subgroup, and the combination of the two into
//! verifiable secret sharing.

#![warn(missing_docs)]

pub mod algebra;
pub mod pedersen;
pub mod shamir;
pub mod vss;

pub(crate) type RngType = rand_chacha::ChaCha12Rng;
