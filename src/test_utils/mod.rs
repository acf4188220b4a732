//! Test utilities for `ir-scope`
//!
//! Provides synthetic packet and frame generation for validating the
//! reassembly and filter pipeline without the camera attached.

pub mod frames;
pub mod packet_generator;

pub use packet_generator::*;
