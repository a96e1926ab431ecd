//! Benchmark helpers for seglake.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
