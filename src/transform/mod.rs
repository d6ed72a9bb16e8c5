//! # Transform orchestration
//!
//! Everything between a packet arriving and a frame leaving:
//!
//! * [`discovery`] finds and activates an engine for a capability class
//! * [`negotiate`] enumerates, scores and commits media types
//! * [`bridge`] turns packets into engine samples and engine samples into frames
//! * [`pool`] recycles output samples
//! * [`surface`] is the GPU surface pool collaborator
//! * [`driver`] is the state machine tying them together
//!
//! Media specific behaviour is injected through [`DecoderHooks`]; results
//! and lifecycle events leave through a [`DecodeSink`].

use bytes::Bytes;

use crate::av::{Frame, FrameFormat, MediaKind};
use crate::engine::{CapabilityClass, Engine, MediaType};
use crate::error::{BridgeError, Result};

pub mod bridge;
pub mod discovery;
pub mod driver;
pub mod negotiate;
pub mod pool;
pub mod surface;

pub use driver::{DriverState, TransformDriver};
pub use pool::SamplePool;
pub use surface::{NativeBuffer, NativeBufferHandle, SurfaceHandlePool, SurfacePool};

/// Media specific policy plugged into the driver.
pub trait DecoderHooks: Send {
    fn kind(&self) -> MediaKind;

    /// What discovery should look for.
    fn capability_class(&self) -> CapabilityClass;

    /// Acceptance test for an activated candidate. May also configure the
    /// engine through its attributes.
    fn accept_engine(&mut self, _engine: &mut dyn Engine) -> bool {
        true
    }

    /// Fills codec parameters into the chosen (or synthesized) input type.
    fn configure_input_type(&self, media_type: &mut MediaType) -> Result<()>;

    fn configure_output_type(&self, _media_type: &mut MediaType) -> Result<()> {
        Ok(())
    }

    /// Preference for an enumerated input type; -1 rejects it.
    fn score_input_type(&self, media_type: &MediaType) -> i32;

    /// Preference for an enumerated output type; -1 rejects it.
    fn score_output_type(&self, media_type: &MediaType) -> i32;

    /// Called with the engine's authoritative output type after every
    /// commit. Returns the frame layout decoded samples will have.
    fn on_output_format_committed(&mut self, media_type: &MediaType) -> Result<FrameFormat>;

    /// Coded picture size used to lay out contiguous buffers.
    fn stride_hint(&self) -> Option<(u32, u32)> {
        None
    }

    /// Reframes packet payloads before they reach the engine.
    fn filter_bytes(&mut self, data: Bytes) -> Bytes {
        data
    }
}

/// Receives decoder output and lifecycle notifications.
///
/// Every method has an empty default so sinks implement only what they
/// need.
#[allow(unused_variables)]
pub trait DecodeSink: Send {
    fn on_open(&mut self) {}

    fn on_output_format_changed(&mut self, media_type: &MediaType, format: &FrameFormat) {}

    fn on_frame(&mut self, frame: Frame) {}

    fn on_end_of_stream(&mut self) {}

    fn on_flush(&mut self) {}

    fn on_close(&mut self) {}

    /// A local failure: one packet or output cycle was lost.
    fn on_decode_error(&mut self, error: &BridgeError) {}
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl DecodeSink for NullSink {}

/// Audio or video hooks, dispatched statically.
pub enum DecoderVariant {
    Audio(crate::codec::AudioVariant),
    Video(crate::codec::VideoVariant),
}

macro_rules! dispatch {
    ($self:ident, $v:ident => $e:expr) => {
        match $self {
            DecoderVariant::Audio($v) => $e,
            DecoderVariant::Video($v) => $e,
        }
    };
}

impl DecoderHooks for DecoderVariant {
    fn kind(&self) -> MediaKind {
        dispatch!(self, v => v.kind())
    }

    fn capability_class(&self) -> CapabilityClass {
        dispatch!(self, v => v.capability_class())
    }

    fn accept_engine(&mut self, engine: &mut dyn Engine) -> bool {
        dispatch!(self, v => v.accept_engine(engine))
    }

    fn configure_input_type(&self, media_type: &mut MediaType) -> Result<()> {
        dispatch!(self, v => v.configure_input_type(media_type))
    }

    fn configure_output_type(&self, media_type: &mut MediaType) -> Result<()> {
        dispatch!(self, v => v.configure_output_type(media_type))
    }

    fn score_input_type(&self, media_type: &MediaType) -> i32 {
        dispatch!(self, v => v.score_input_type(media_type))
    }

    fn score_output_type(&self, media_type: &MediaType) -> i32 {
        dispatch!(self, v => v.score_output_type(media_type))
    }

    fn on_output_format_committed(&mut self, media_type: &MediaType) -> Result<FrameFormat> {
        dispatch!(self, v => v.on_output_format_committed(media_type))
    }

    fn stride_hint(&self) -> Option<(u32, u32)> {
        dispatch!(self, v => v.stride_hint())
    }

    fn filter_bytes(&mut self, data: Bytes) -> Bytes {
        dispatch!(self, v => v.filter_bytes(data))
    }
}

impl From<crate::codec::AudioVariant> for DecoderVariant {
    fn from(v: crate::codec::AudioVariant) -> Self {
        DecoderVariant::Audio(v)
    }
}

impl From<crate::codec::VideoVariant> for DecoderVariant {
    fn from(v: crate::codec::VideoVariant) -> Self {
        DecoderVariant::Video(v)
    }
}
