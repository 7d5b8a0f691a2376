//! Speech synthesis engines.
//!
//! This module contains [`crate::InferenceGateway`] implementations that
//! drive concrete text-to-speech models.
//!
//! # Available Engines
//!
//! - `spark` - Spark-TTS 0.5B voice cloning, run through its inference CLI

pub mod spark;
