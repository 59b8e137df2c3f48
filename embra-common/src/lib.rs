//! An internal crate containing utility functions and structs reused across different
//! crates in the embra project.
//!
//! This crate is not meant for external consumption.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bit;
