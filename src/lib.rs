//! Journal usage and subscription cost scenarios for libraries and consortia.
#![warn(missing_docs)]
pub mod allocation;
pub mod assumptions;
pub mod cache;
pub mod cli;
pub mod consortium;
pub mod finance;
pub mod id;
pub mod input;
pub mod journal;
pub mod log;
pub mod output;
pub mod package;
pub mod reference;
pub mod scenario;
pub mod settings;
pub mod store;
pub mod units;
pub mod year;

#[cfg(test)]
mod fixture;
