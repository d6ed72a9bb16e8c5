use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::sample::{ticks_to_duration, BufferLock};
use crate::transform::surface::NativeBufferHandle;

/// Decoded picture layouts the bridge knows how to split into planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Three planes, 4:2:0, 8 bit.
    YUV420P,
    /// Luma plane plus interleaved chroma, 8 bit.
    NV12,
    /// NV12 layout with 10 significant bits in 16 bit words.
    P010LE,
    P016LE,
    YUYV422,
    UYVY422,
}

impl PixelFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::YUV420P => 3,
            PixelFormat::NV12 | PixelFormat::P010LE | PixelFormat::P016LE => 2,
            PixelFormat::YUYV422 | PixelFormat::UYVY422 => 1,
        }
    }

    pub fn bits_per_channel(&self) -> u32 {
        match self {
            PixelFormat::P010LE => 10,
            PixelFormat::P016LE => 16,
            _ => 8,
        }
    }

    /// Bytes of visible data in one row of `plane`.
    pub fn bytes_per_line(&self, width: u32, plane: usize) -> usize {
        let w = width as usize;
        match (self, plane) {
            (PixelFormat::YUV420P, 0) => w,
            (PixelFormat::YUV420P, _) => w.div_ceil(2),
            (PixelFormat::NV12, _) => w,
            (PixelFormat::P010LE | PixelFormat::P016LE, _) => w * 2,
            (PixelFormat::YUYV422 | PixelFormat::UYVY422, _) => w * 2,
        }
    }

    /// Rows in `plane` for a picture `height` rows high.
    pub fn plane_height(&self, height: u32, plane: usize) -> usize {
        let h = height as usize;
        match (self, plane) {
            (PixelFormat::YUV420P | PixelFormat::NV12 | PixelFormat::P010LE | PixelFormat::P016LE, p)
                if p > 0 =>
            {
                h.div_ceil(2)
            }
            _ => h,
        }
    }

    /// Pitch of `plane` when plane 0 uses `pitch`.
    pub fn plane_pitch(&self, pitch: usize, plane: usize) -> usize {
        match (self, plane) {
            (PixelFormat::YUV420P, p) if p > 0 => pitch.div_ceil(2),
            _ => pitch,
        }
    }

    /// Bytes needed for a tightly packed picture.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        (0..self.plane_count())
            .map(|p| self.bytes_per_line(width, p) * self.plane_height(height, p))
            .sum()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::YUV420P => "yuv420p",
            PixelFormat::NV12 => "nv12",
            PixelFormat::P010LE => "p010le",
            PixelFormat::P016LE => "p016le",
            PixelFormat::YUYV422 => "yuyv422",
            PixelFormat::UYVY422 => "uyvy422",
        };
        f.write_str(name)
    }
}

/// Visible crop rectangle inside the coded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aperture {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    /// Display size.
    pub width: u32,
    pub height: u32,
    /// Coded size, used for plane offsets in contiguous buffers.
    pub coded_width: u32,
    pub coded_height: u32,
    pub aperture: Option<Aperture>,
}

impl VideoFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
            coded_width: width,
            coded_height: height,
            aperture: None,
        }
    }

    pub fn with_coded_size(mut self, width: u32, height: u32) -> Self {
        self.coded_width = width;
        self.coded_height = height;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S16,
    S24,
    S32,
    F32,
    F64,
}

impl SampleFormat {
    /// Maps a sample size and kind reported by an engine.
    pub fn from_bits(bits: u32, is_float: bool) -> Option<Self> {
        match (bits, is_float) {
            (8, false) => Some(SampleFormat::U8),
            (16, false) => Some(SampleFormat::S16),
            (24, false) => Some(SampleFormat::S24),
            (32, false) => Some(SampleFormat::S32),
            (32, true) => Some(SampleFormat::F32),
            (64, true) => Some(SampleFormat::F64),
            _ => None,
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S24 => 3,
            SampleFormat::S32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::F32 | SampleFormat::F64)
    }
}

/// Interleaved PCM layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub channels: u32,
    pub sample_rate: u32,
    /// Speaker position mask, 0 when unknown.
    pub channel_mask: u32,
}

impl AudioFormat {
    /// Bytes per sample frame (one sample for each channel).
    pub fn frame_size(&self) -> usize {
        self.sample_format.bytes() * self.channels as usize
    }

    pub fn frames_for_bytes(&self, bytes: usize) -> usize {
        match self.frame_size() {
            0 => 0,
            size => bytes / size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Audio(AudioFormat),
    Video(VideoFormat),
}

impl FrameFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            FrameFormat::Audio(_) => 1,
            FrameFormat::Video(v) => v.pixel_format.plane_count(),
        }
    }

    pub fn as_video(&self) -> Option<&VideoFormat> {
        match self {
            FrameFormat::Video(v) => Some(v),
            FrameFormat::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioFormat> {
        match self {
            FrameFormat::Audio(a) => Some(a),
            FrameFormat::Video(_) => None,
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameFormat::Audio(a) => write!(
                f,
                "{:?} {}ch {}Hz",
                a.sample_format, a.channels, a.sample_rate
            ),
            FrameFormat::Video(v) => write!(
                f,
                "{} {}x{} (coded {}x{})",
                v.pixel_format, v.width, v.height, v.coded_width, v.coded_height
            ),
        }
    }
}

/// One plane of decoded data.
///
/// A mapped plane borrows engine memory and keeps the buffer locked through
/// a shared guard; an owned plane holds its own copy.
#[derive(Clone)]
pub struct Plane {
    pub data: Bytes,
    pub stride: usize,
    lock: Option<Arc<BufferLock>>,
}

impl Plane {
    pub fn owned(data: Bytes, stride: usize) -> Self {
        Self {
            data,
            stride,
            lock: None,
        }
    }

    pub fn mapped(data: Bytes, stride: usize, lock: Arc<BufferLock>) -> Self {
        Self {
            data,
            stride,
            lock: Some(lock),
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.lock.is_some()
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("len", &self.data.len())
            .field("stride", &self.stride)
            .field("mapped", &self.lock.is_some())
            .finish()
    }
}

/// A decoded audio or video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub format: FrameFormat,
    /// Presentation time in 100-ns ticks.
    pub pts: Option<i64>,
    pub duration: Option<i64>,
    pub planes: Vec<Plane>,
    /// GPU-resident picture handed out by the surface pool.
    pub native: Option<NativeBufferHandle>,
    /// Audio only.
    pub samples_per_channel: usize,
}

impl Frame {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            pts: None,
            duration: None,
            planes: Vec::new(),
            native: None,
            samples_per_channel: 0,
        }
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.pts.map(ticks_to_duration)
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    /// True when any plane still references engine memory.
    pub fn is_mapped(&self) -> bool {
        self.planes.iter().any(Plane::is_mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_geometry() {
        assert_eq!(PixelFormat::NV12.frame_size(64, 48), 64 * 48 * 3 / 2);
        assert_eq!(PixelFormat::P010LE.frame_size(64, 48), 64 * 48 * 3);
        assert_eq!(PixelFormat::YUV420P.frame_size(5, 3), 15 + 3 * 2 * 2);
        assert_eq!(PixelFormat::YUV420P.plane_pitch(64, 1), 32);
        assert_eq!(PixelFormat::NV12.plane_pitch(64, 1), 64);
        assert_eq!(PixelFormat::YUYV422.plane_count(), 1);
    }

    #[test]
    fn test_audio_frames_for_bytes() {
        let fmt = AudioFormat {
            sample_format: SampleFormat::F32,
            channels: 2,
            sample_rate: 48000,
            channel_mask: 0,
        };
        assert_eq!(fmt.frame_size(), 8);
        assert_eq!(fmt.frames_for_bytes(8192), 1024);
        assert_eq!(SampleFormat::from_bits(16, false), Some(SampleFormat::S16));
        assert_eq!(SampleFormat::from_bits(16, true), None);
    }
}
