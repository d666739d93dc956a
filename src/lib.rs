#[macro_use]
extern crate serde;

pub mod concurrency;
pub mod proof;
pub mod serialization;

mod config;
mod elgamal;
mod error;
mod keygen;
mod ledger;
mod mix;
mod mix_proof;
mod registration;
mod schnorr;
mod serde_hex;
mod suite;
mod tag;
mod tally;
mod vote;

pub use config::*;
pub use elgamal::*;
pub use error::*;
pub use keygen::*;
pub use ledger::*;
pub use mix::*;
pub use mix_proof::*;
pub use registration::*;
pub use schnorr::*;
pub use serde_hex::*;
pub use suite::*;
pub use tag::*;
pub use tally::*;
pub use vote::*;

#[cfg(test)]
mod tests;
