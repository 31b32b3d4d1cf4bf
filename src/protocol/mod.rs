//! Protocol module for parsing notification frames.
//!
//! This module contains the decoder for the frames the relay pushes on
//! its notification characteristic.

pub mod frame;

pub use frame::{decode, FrameType};
