//! Statistical voice modeling: Gaussian mixtures and phoneme-level hidden
//! Markov models built on top of them.

pub mod gaussian;
pub mod hmm;
