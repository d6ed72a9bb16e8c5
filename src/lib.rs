#![doc(html_root_url = "https://docs.rs/codecbridge/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # codecbridge - drive vendor decoder transforms
//!
//! `codecbridge` sits between a demuxer producing compressed packets and a
//! consumer wanting decoded frames, with a platform decoder engine (a
//! hardware or software "transform") in the middle. It finds an engine,
//! agrees on input and output formats with it, feeds it packets, pulls
//! frames back out and hands them on without copying when it can.
//!
//! ## Features
//!
//! - Engine discovery by capability class, with per-candidate acceptance tests
//! - Media type negotiation with scoring, explicit indices and deferred commits
//! - Zero-copy frame delivery from engine buffers, contiguous or per plane
//! - Output sample pooling with generation-safe recycling
//! - GPU surface handoff through a caller supplied surface pool
//! - Mid-stream output format changes
//! - Audio (AAC, MP3, PCM and friends) and video (H.264, HEVC, VP9, AV1, ...) variants
//! - An async session that runs the engine on a blocking worker
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use codecbridge::av::{CodecType, Packet};
//! use codecbridge::codec::{subtypes, VideoCodecParameters, VideoVariant};
//! use codecbridge::config::DecoderOptions;
//! use codecbridge::engine::fake::{FakeConfig, FakePlatform};
//! use codecbridge::transform::{DecodeSink, TransformDriver};
//! use codecbridge::av::Frame;
//!
//! struct Count(usize);
//!
//! impl DecodeSink for Count {
//!     fn on_frame(&mut self, _frame: Frame) {
//!         self.0 += 1;
//!     }
//! }
//!
//! # fn main() -> codecbridge::Result<()> {
//! let platform = Arc::new(
//!     FakePlatform::named("quick-start").with_engine(FakeConfig::video(subtypes::H264, 64, 32)),
//! );
//! let hooks = VideoVariant::new(VideoCodecParameters::new(CodecType::H264, 64, 32))?;
//! let mut decoder = TransformDriver::new(platform, hooks, Box::new(Count(0)), DecoderOptions::new());
//!
//! decoder.open()?;
//! for pts in 0..4 {
//!     decoder.submit(Packet::new(vec![0u8; 128]).with_pts(pts))?;
//! }
//! decoder.submit(Packet::end_of_stream())?;
//! decoder.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: packets, frames and the formats describing them
//! - `codec`: codec identifiers and the audio and video decoder variants
//! - `engine`: the engine abstraction, attribute stores, samples and buffers,
//!   plus an in-process fake engine for tests
//! - `transform`: discovery, negotiation, the sample bridge, pooling and the driver
//! - `session`: the async front end
//! - `config`: decoder properties
//! - `error`: error types and their categories

/// Packets, frames and media formats
pub mod av;

/// Codec identifiers and decoder variants
pub mod codec;

/// Decoder properties
pub mod config;

/// Engine abstraction
pub mod engine;

/// Error types and utilities
pub mod error;

/// Async decode session
pub mod session;

/// Transform orchestration
pub mod transform;

pub use error::{BridgeError, ErrorCategory, Result};
pub use transform::{DecodeSink, DecoderHooks, DecoderVariant, DriverState, TransformDriver};
