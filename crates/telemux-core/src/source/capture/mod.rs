//! Capture-file source implementation.
//!
//! This module provides a `PacketSource` backed by a multi-sensor logger
//! capture file. It handles file I/O and low-level framing, emitting one
//! validated packet at a time for the demux pipeline.

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

pub use parser::CaptureFileSource;
