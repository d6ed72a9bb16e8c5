//! Conversions between pipeline buffers and engine samples.
//!
//! Ingest builds one engine sample per packet. Egress turns a decoded sample
//! into a [`Frame`], either by reference (planes keep the buffer locked
//! until the last one is dropped) or by copy. GPU surfaces bypass mapping
//! entirely when zero-copy is requested and a surface pool is available.

use bytes::Bytes;
use std::sync::Arc;

use crate::av::{AudioFormat, Frame, FrameFormat, Plane, VideoFormat};
use crate::config::CopyMode;
use crate::engine::attributes::keys;
use crate::engine::sample::MIN_ALIGNMENT;
use crate::engine::{AlignedBuffer, BufferLock, BufferView, MediaBuffer, Sample};
use crate::error::{BridgeError, Result};
use crate::transform::surface::SurfacePool;

/// Wraps or copies `data` into an engine sample.
///
/// The buffer honours `max(alignment, 16)`. Memory that is already aligned
/// is wrapped without copying when `allow_view` is set.
pub fn build_input_sample(
    data: Bytes,
    time: Option<i64>,
    duration: Option<i64>,
    key: bool,
    alignment: u32,
    allow_view: bool,
) -> Result<Sample> {
    let align = (alignment as usize).max(MIN_ALIGNMENT);
    let buffer: Arc<dyn MediaBuffer> = if allow_view && data.as_ptr() as usize % align == 0 {
        Arc::new(BufferView::new(data))
    } else {
        let buf = AlignedBuffer::new(data.len(), align);
        buf.write(&data).map_err(|e| BridgeError::Decode(format!("input copy: {}", e)))?;
        Arc::new(buf)
    };

    let mut sample = Sample::new().with_buffer(buffer);
    if let Some(t) = time {
        sample.set_time(t);
    }
    if let Some(d) = duration {
        sample.set_duration(d);
    }
    if key {
        sample.attributes_mut().set_u32(keys::SAMPLE_CLEAN_POINT, 1);
    }
    Ok(sample)
}

/// Everything egress needs besides the sample itself.
#[derive(Clone, Copy)]
pub struct DrainOptions<'a> {
    pub copy_mode: CopyMode,
    /// Coded size used for plane offsets and as a pitch fallback.
    pub stride_hint: Option<(u32, u32)>,
    pub surfaces: Option<&'a dyn SurfacePool>,
}

/// Materialises a decoded sample as a frame of `format`.
pub fn drain_sample(sample: Sample, format: &FrameFormat, options: DrainOptions<'_>) -> Result<Frame> {
    match format {
        FrameFormat::Video(v) => drain_video(sample, v, options),
        FrameFormat::Audio(a) => drain_audio(sample, a, options.copy_mode.copies_linear()),
    }
}

pub fn drain_video(sample: Sample, format: &VideoFormat, options: DrainOptions<'_>) -> Result<Frame> {
    let mut frame = frame_for(&sample, FrameFormat::Video(*format));
    let buffers: Vec<Arc<dyn MediaBuffer>> = sample.buffers().to_vec();
    let first = buffers
        .first()
        .cloned()
        .ok_or_else(|| BridgeError::Decode("decoded sample has no buffers".into()))?;
    let (stride_x, stride_y) = options
        .stride_hint
        .unwrap_or((format.coded_width, format.coded_height));

    if let Some(id) = first.surface() {
        // One surface per sample.
        if options.copy_mode == CopyMode::None {
            if let Some(surfaces) = options.surfaces {
                frame.native = Some(surfaces.get_buffer(id, Box::new(move || drop(sample))));
                return Ok(frame);
            }
            log::debug!("no surface pool, mapping surface {}", id);
        }
        let owner = Arc::new(sample);
        let copy = options.copy_mode == CopyMode::Always;
        frame.planes = map_picture(first, format, stride_x, stride_y, copy, &owner)?;
        return Ok(frame);
    }

    let owner = Arc::new(sample);
    let copy = options.copy_mode.copies_linear();
    let contiguous = format.pixel_format.plane_count() > buffers.len();
    if contiguous {
        frame.planes = map_picture(first, format, stride_x, stride_y, copy, &owner)?;
    } else {
        for (plane, buffer) in buffers
            .into_iter()
            .take(format.pixel_format.plane_count())
            .enumerate()
        {
            let rows = format.pixel_format.plane_height(stride_y, plane).max(1);
            let lock = lock_with_owner(buffer, &owner)?;
            let data = lock.data().clone();
            let stride = lock.pitch().filter(|p| *p > 0).unwrap_or(data.len() / rows);
            frame.planes.push(if copy {
                Plane::owned(Bytes::copy_from_slice(&data), stride)
            } else {
                Plane::mapped(data, stride, Arc::new(lock))
            });
        }
    }
    Ok(frame)
}

pub fn drain_audio(sample: Sample, format: &AudioFormat, copy: bool) -> Result<Frame> {
    let mut frame = frame_for(&sample, FrameFormat::Audio(*format));
    let buffers: Vec<Arc<dyn MediaBuffer>> = sample.buffers().to_vec();
    let total = sample.total_length();
    let owner = Arc::new(sample);
    for buffer in buffers {
        let lock = lock_with_owner(buffer, &owner)?;
        let data = lock.data().clone();
        let stride = data.len();
        frame.planes.push(if copy {
            Plane::owned(Bytes::copy_from_slice(&data), stride)
        } else {
            Plane::mapped(data, stride, Arc::new(lock))
        });
    }
    frame.samples_per_channel = format.frames_for_bytes(total);
    Ok(frame)
}

fn frame_for(sample: &Sample, format: FrameFormat) -> Frame {
    let mut frame = Frame::new(format);
    frame.pts = sample.time();
    frame.duration = sample.duration();
    frame
}

fn lock_with_owner(buffer: Arc<dyn MediaBuffer>, owner: &Arc<Sample>) -> Result<BufferLock> {
    BufferLock::acquire(buffer)
        .map(|l| l.with_owner(owner.clone()))
        .map_err(|e| BridgeError::Decode(format!("buffer lock failed: {}", e)))
}

/// Splits one buffer holding every plane back to back.
fn map_picture(
    buffer: Arc<dyn MediaBuffer>,
    format: &VideoFormat,
    stride_x: u32,
    stride_y: u32,
    copy: bool,
    owner: &Arc<Sample>,
) -> Result<Vec<Plane>> {
    let pf = format.pixel_format;
    let lock = lock_with_owner(buffer, owner)?;
    let data = lock.data().clone();
    let pitch = lock
        .pitch()
        .filter(|p| *p > 0)
        .unwrap_or_else(|| pf.bytes_per_line(stride_x, 0));

    let lock = Arc::new(lock);
    let mut planes = Vec::with_capacity(pf.plane_count());
    let mut offset = 0;
    for plane in 0..pf.plane_count() {
        let plane_pitch = pf.plane_pitch(pitch, plane);
        let bytes = plane_pitch * pf.plane_height(stride_y, plane);
        if offset + bytes > data.len() {
            return Err(BridgeError::Decode(format!(
                "plane {} needs {} bytes at offset {}, buffer has {}",
                plane,
                bytes,
                offset,
                data.len()
            )));
        }
        let slice = data.slice(offset..offset + bytes);
        planes.push(if copy {
            Plane::owned(Bytes::copy_from_slice(&slice), plane_pitch)
        } else {
            Plane::mapped(slice, plane_pitch, lock.clone())
        });
        offset += bytes;
    }
    Ok(planes)
}
