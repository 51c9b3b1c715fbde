#![deny(clippy::pedantic)]

#[macro_use]
extern crate contracts;

pub mod model;
pub mod rng;
pub mod simulator;
pub mod weighted;
