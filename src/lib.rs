//! `ir-scope` - Raw IR camera viewer core
//!
//! Turns the packet stream of a UVC-style bulk endpoint into displayable
//! grayscale frames:
//!
//! ```text
//! PacketSource -> FrameAssembler -> metadata strip -> Stabilizer -> decoder -> DisplaySink
//! ```
//!
//! USB enumeration and claiming live outside this crate; anything that can
//! deliver bulk packets implements [`source::PacketSource`]. Captured streams
//! can be recorded with [`capture`] and replayed with [`replay`].

pub mod analysis;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod frame_assembler;
pub mod frame_classifier;
pub mod metadata;
pub mod packet;
pub mod replay;
pub mod source;
pub mod stabilizer;
pub mod viewer;

#[doc(hidden)]
pub mod test_utils;

pub use config::{DecodeMode, FilterConfig, ViewerConfig};
pub use frame_assembler::{FrameAssembler, FrameReader, ProcessResult};
pub use source::{MemorySource, PacketSource, SourceError};
pub use viewer::{Command, DisplaySink, Viewer};
