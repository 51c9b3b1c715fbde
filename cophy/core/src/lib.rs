#![deny(clippy::pedantic)]

#[macro_use]
extern crate contracts;

pub mod cogs;
pub mod combinatorics;
pub mod event;
pub mod reconciliation;
pub mod rng;
pub mod state;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_rng;
