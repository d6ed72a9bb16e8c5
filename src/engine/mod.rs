//! # Engine platform interface
//!
//! The transform driver never talks to a vendor API directly. A platform
//! binding implements the three traits in this module:
//!
//! * [`EnginePlatform`] lists candidate engines for a [`CapabilityClass`]
//!   and owns process-wide startup/shutdown.
//! * [`EngineActivator`] is one candidate; activating it yields an
//!   [`Engine`].
//! * [`Engine`] is a live transform: type enumeration and commit, stream
//!   info, push input, pull output and control messages.
//!
//! Engine calls report status through [`EngineError`]. Several statuses are
//! control flow rather than failures, see [`EngineError::is_control_signal`].
//!
//! [`fake`] contains a scriptable in-process platform used by tests.

use std::fmt;
use thiserror::Error;

pub mod attributes;
pub mod fake;
pub mod labels;
pub mod runtime;
pub mod sample;

pub use attributes::{keys, AttrValue, Attributes, Guid, MediaType};
pub use runtime::RuntimeGuard;
pub use sample::{
    AlignedBuffer, BufferLock, BufferView, Mapping, MediaBuffer, Sample, SurfaceId,
};

/// Status codes returned by engine calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Type enumeration ran past the last candidate.
    #[error("no more types")]
    NoMoreTypes,

    #[error("not implemented")]
    NotImplemented,

    /// The other stream direction must be negotiated first.
    #[error("type not set")]
    TypeNotSet,

    /// The engine's input queue is full; drain output and retry.
    #[error("not accepting input")]
    NotAccepting,

    #[error("need more input")]
    NeedMoreInput,

    /// The output format changed; the pending output is void.
    #[error("stream format changed")]
    StreamChange,

    /// The device or engine handle is gone.
    #[error("engine handle lost")]
    HandleLost,

    #[error("{0}")]
    Failed(String),
}

impl EngineError {
    /// Statuses that drive the state machine and are never reported to the
    /// caller as failures.
    pub fn is_control_signal(&self) -> bool {
        matches!(
            self,
            EngineError::NoMoreTypes
                | EngineError::TypeNotSet
                | EngineError::NeedMoreInput
                | EngineError::StreamChange
        )
    }

    pub fn is_handle_loss(&self) -> bool {
        matches!(self, EngineError::HandleLost)
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Control messages understood by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message {
    BeginStreaming,
    StartOfStream,
    Flush,
    Drain,
    EndOfStream,
    EndStreaming,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Message::BeginStreaming => "begin-streaming",
            Message::StartOfStream => "start-of-stream",
            Message::Flush => "flush",
            Message::Drain => "drain",
            Message::EndOfStream => "end-of-stream",
            Message::EndStreaming => "end-streaming",
        };
        f.write_str(name)
    }
}

/// A bit set newtype over `u32`.
macro_rules! bit_flags {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
        pub struct $name(u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn from_bits(bits: u32) -> Self {
                $name(bits)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

bit_flags! {
    /// Capability flags reported in [`StreamInfo`].
    StreamFlags {
        WHOLE_SAMPLES = 0x1,
        SINGLE_SAMPLE_PER_BUFFER = 0x2,
        FIXED_SAMPLE_SIZE = 0x4,
        DISCARDABLE = 0x8,
        OPTIONAL = 0x10,
        /// The engine allocates output samples itself.
        PROVIDES_SAMPLES = 0x100,
        /// The engine can allocate output samples but accepts caller ones.
        CAN_PROVIDE_SAMPLES = 0x200,
        LAZY_READ = 0x400,
        REMOVABLE = 0x800,
        /// The engine does not keep a reference to input samples.
        DOES_NOT_ADDREF = 0x1000,
    }
}

bit_flags! {
    /// Informational bits returned with each output pull.
    OutputStatus {
        INCOMPLETE = 0x0100_0000,
        FORMAT_CHANGE = 0x100,
        STREAM_END = 0x200,
        NO_SAMPLE = 0x400,
        NEW_STREAMS = 0x800,
    }
}

/// Engine-reported constraints for one stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamInfo {
    pub flags: StreamFlags,
    /// Minimum buffer size in bytes, 0 when unknown.
    pub size: u32,
    /// Required alignment in bytes, 0 or 1 when none.
    pub alignment: u32,
    /// Maximum latency in 100-ns ticks (input only).
    pub max_latency: i64,
    /// Bytes the engine may hold before producing output (input only).
    pub max_lookahead: u32,
}

impl StreamInfo {
    pub fn provides_samples(&self) -> bool {
        self.flags.contains(StreamFlags::PROVIDES_SAMPLES)
            || self.flags.contains(StreamFlags::CAN_PROVIDE_SAMPLES)
    }
}

/// Result of one successful output pull.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    pub sample: Option<Sample>,
    pub status: OutputStatus,
}

/// What kind of engine to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityClass {
    /// Engine category, e.g. [`keys::CATEGORY_VIDEO_DECODER`].
    pub category: Guid,
    /// Compressed input subtype the engine must accept.
    pub input_subtype: Guid,
    /// Major type of the input stream.
    pub major_type: Guid,
}

impl CapabilityClass {
    pub fn video_decoder(input_subtype: Guid) -> Self {
        Self {
            category: keys::CATEGORY_VIDEO_DECODER,
            input_subtype,
            major_type: keys::MEDIA_TYPE_VIDEO,
        }
    }

    pub fn audio_decoder(input_subtype: Guid) -> Self {
        Self {
            category: keys::CATEGORY_AUDIO_DECODER,
            input_subtype,
            major_type: keys::MEDIA_TYPE_AUDIO,
        }
    }
}

impl fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for {}",
            labels::label_or_guid(self.category),
            labels::label_or_guid(self.input_subtype)
        )
    }
}

/// An engine platform: enumerates engines and owns the process runtime.
pub trait EnginePlatform: Send + Sync {
    /// Key for the process-wide runtime reference count.
    fn name(&self) -> &str;

    fn startup(&self) -> EngineResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Candidates for `class` in the platform's own preference order.
    fn enumerate(&self, class: &CapabilityClass) -> EngineResult<Vec<Box<dyn EngineActivator>>>;
}

/// One engine candidate returned by enumeration.
pub trait EngineActivator: Send {
    fn attributes(&self) -> &Attributes;

    fn activate(&mut self) -> EngineResult<Box<dyn Engine>>;

    /// Releases platform-side registration state. Called for every
    /// candidate, activated or not.
    fn shutdown(&mut self) -> EngineResult<()>;
}

/// A live transform.
///
/// All methods are called from the driver's thread only. Stream ids are the
/// ones returned by [`stream_ids`](Engine::stream_ids).
pub trait Engine: Send {
    /// Snapshot of the engine's own attribute store.
    fn attributes(&self) -> Attributes;

    fn set_attribute(&mut self, key: Guid, value: AttrValue) -> EngineResult<()>;

    /// Input and output stream ids. `NotImplemented` means one stream of
    /// each kind with id 0.
    fn stream_ids(&self) -> EngineResult<(u32, u32)> {
        Err(EngineError::NotImplemented)
    }

    fn input_available_type(&self, stream: u32, index: u32) -> EngineResult<MediaType>;

    fn output_available_type(&self, stream: u32, index: u32) -> EngineResult<MediaType>;

    fn set_input_type(&mut self, stream: u32, media_type: &MediaType) -> EngineResult<()>;

    fn set_output_type(&mut self, stream: u32, media_type: &MediaType) -> EngineResult<()>;

    fn input_current_type(&self, stream: u32) -> EngineResult<MediaType>;

    fn output_current_type(&self, stream: u32) -> EngineResult<MediaType>;

    fn input_stream_info(&self, stream: u32) -> EngineResult<StreamInfo>;

    fn output_stream_info(&self, stream: u32) -> EngineResult<StreamInfo>;

    /// Pushes one input sample. Engines that keep it past the call clone
    /// the handle; on `NotAccepting` nothing is kept.
    fn process_input(&mut self, stream: u32, sample: &Sample) -> EngineResult<()>;

    /// Pulls one output unit into `sample`, or into an engine-allocated
    /// sample when `sample` is `None`.
    fn process_output(&mut self, stream: u32, sample: Option<Sample>) -> EngineResult<OutputBuffer>;

    fn process_message(&mut self, message: Message) -> EngineResult<()>;

    fn shutdown(&mut self) -> EngineResult<()> {
        Err(EngineError::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_signals() {
        assert!(EngineError::NoMoreTypes.is_control_signal());
        assert!(EngineError::NeedMoreInput.is_control_signal());
        assert!(EngineError::StreamChange.is_control_signal());
        assert!(EngineError::TypeNotSet.is_control_signal());
        assert!(!EngineError::NotAccepting.is_control_signal());
        assert!(!EngineError::Failed("x".into()).is_control_signal());
        assert!(EngineError::HandleLost.is_handle_loss());
    }

    #[test]
    fn test_stream_flags() {
        let info = StreamInfo {
            flags: StreamFlags::WHOLE_SAMPLES | StreamFlags::PROVIDES_SAMPLES,
            ..Default::default()
        };
        assert!(info.provides_samples());
        assert!(!StreamInfo::default().provides_samples());
        assert!(info.flags.contains(StreamFlags::WHOLE_SAMPLES));
        assert!(!info.flags.contains(StreamFlags::LAZY_READ));
    }
}
