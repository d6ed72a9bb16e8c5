//! Video decoder variant.
//!
//! Builds the compressed input type from stream parameters, prefers output
//! pictures whose bit depth matches the stream, checks the engine's coded
//! size limits, and reports the decoded picture layout.

use bytes::{Bytes, BytesMut};

use crate::av::{Aperture, CodecType, FrameFormat, MediaKind, PixelFormat, VideoFormat};
use crate::codec::{codec_for, subtypes, to_fourcc};
use crate::engine::{keys, AttrValue, CapabilityClass, Engine, Guid, MediaType};
use crate::error::{BridgeError, Result};
use crate::transform::DecoderHooks;

/// `MixedInterlaceOrProgressive`.
const INTERLACE_MIXED: u32 = 7;

/// Reframes packet payloads before they are decoded.
pub type PacketFilter = Box<dyn FnMut(Bytes) -> Bytes + Send>;

/// Decoded picture layout for an uncompressed subtype.
pub fn pixel_format_for(subtype: Guid) -> Option<PixelFormat> {
    match subtype {
        s if s == subtypes::NV12 => Some(PixelFormat::NV12),
        s if s == subtypes::P010 => Some(PixelFormat::P010LE),
        s if s == subtypes::P016 => Some(PixelFormat::P016LE),
        s if s == subtypes::IYUV || s == subtypes::I420 => Some(PixelFormat::YUV420P),
        s if s == subtypes::YUY2 => Some(PixelFormat::YUYV422),
        s if s == subtypes::UYVY => Some(PixelFormat::UYVY422),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoCodecParameters {
    pub codec: CodecType,
    /// Container FourCC, 0 when unknown.
    pub codec_tag: u32,
    pub width: u32,
    pub height: u32,
    pub bit_rate: u64,
    /// Bits per channel of the coded stream.
    pub bit_depth: u32,
    /// Output layout requested by the caller, if any.
    pub format: Option<PixelFormat>,
    /// Codec private data as found in the container.
    pub extra: Bytes,
    /// Parameter sets in start-code form, sent ahead of the first packet.
    pub annexb_config: Option<Bytes>,
}

impl VideoCodecParameters {
    pub fn new(codec: CodecType, width: u32, height: u32) -> Self {
        Self {
            codec,
            codec_tag: 0,
            width,
            height,
            bit_rate: 0,
            bit_depth: 8,
            format: None,
            extra: Bytes::new(),
            annexb_config: None,
        }
    }

    pub fn with_codec_tag(mut self, tag: u32) -> Self {
        self.codec_tag = tag;
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_bit_depth(mut self, bits: u32) -> Self {
        self.bit_depth = bits;
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_extra(mut self, extra: impl Into<Bytes>) -> Self {
        self.extra = extra.into();
        self
    }

    pub fn with_annexb_config(mut self, config: impl Into<Bytes>) -> Self {
        self.annexb_config = Some(config.into());
        self
    }

    /// Whether `extra` can be handed to the engine as user data.
    ///
    /// MPEG-4 part 2 needs start-code framed data; length-prefixed AVC/HEVC
    /// configuration records (first byte 1) are not understood.
    fn extra_is_usable(&self) -> bool {
        if self.extra.is_empty() {
            return false;
        }
        match self.codec {
            CodecType::MPEG4 => self.extra.len() >= 3 && self.extra[..3] == [0, 0, 1],
            CodecType::H264 | CodecType::H265 => self.extra[0] != 1,
            _ => true,
        }
    }

    /// Bits per channel the output should have.
    fn wanted_depth(&self) -> u32 {
        self.format
            .map(|f| f.bits_per_channel())
            .unwrap_or(self.bit_depth)
    }
}

/// Hooks for video decoding.
pub struct VideoVariant {
    params: VideoCodecParameters,
    subtype: Guid,
    stride: Option<(u32, u32)>,
    format: Option<VideoFormat>,
    pending_config: Option<Bytes>,
    filter: Option<PacketFilter>,
}

impl VideoVariant {
    pub fn new(params: VideoCodecParameters) -> Result<Self> {
        if params.codec.media_kind() != MediaKind::Video {
            return Err(BridgeError::Config {
                key: "codec".to_string(),
                reason: format!("{} is not a video codec", params.codec),
            });
        }
        let subtype = codec_for(params.codec).ok_or_else(|| BridgeError::Config {
            key: "codec".to_string(),
            reason: format!("codec is not supported: {}", params.codec),
        })?;
        Ok(Self {
            pending_config: params.annexb_config.clone(),
            params,
            subtype,
            stride: None,
            format: None,
            filter: None,
        })
    }

    /// Installs an external bitstream filter run on every packet.
    pub fn with_packet_filter(mut self, filter: PacketFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn parameters(&self) -> &VideoCodecParameters {
        &self.params
    }

    /// Layout of the last committed output type.
    pub fn format(&self) -> Option<&VideoFormat> {
        self.format.as_ref()
    }

    /// Coded size limits reported by the engine, checked against the stream.
    fn fits(&self, attrs: &crate::engine::Attributes) -> bool {
        let (Some(max_w), Some(max_h)) = (
            attrs.u32(keys::MAX_CODED_WIDTH),
            attrs.u32(keys::MAX_CODED_HEIGHT),
        ) else {
            return true;
        };
        log::debug!("max supported size: {}x{}", max_w, max_h);
        if (max_w > 0 && max_w < self.params.width) || (max_h > 0 && max_h <= self.params.height) {
            log::info!(
                "unsupported frame size {}x{}",
                self.params.width,
                self.params.height
            );
            return false;
        }
        true
    }
}

impl DecoderHooks for VideoVariant {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn capability_class(&self) -> CapabilityClass {
        CapabilityClass::video_decoder(self.subtype)
    }

    fn accept_engine(&mut self, engine: &mut dyn Engine) -> bool {
        let attrs = engine.attributes();
        if !self.fits(&attrs) {
            return false;
        }
        if let Some(vendor) = attrs.string(keys::HARDWARE_VENDOR_ID) {
            log::info!("hw vendor id: {}", vendor);
        }
        if let Some(url) = attrs.string(keys::HARDWARE_URL) {
            log::info!("hw url: {}", url);
        }
        for key in [keys::VIDEO_ACCELERATION, keys::LOW_LATENCY_MODE] {
            if let Err(e) = engine.set_attribute(key, AttrValue::U32(1)) {
                log::warn!("engine attribute {} not set: {}", key, e);
            }
        }
        true
    }

    fn configure_input_type(&self, media_type: &mut MediaType) -> Result<()> {
        let p = &self.params;
        let has_user_data = media_type.attributes().contains(keys::USER_DATA);
        let attrs = media_type.attributes_mut();
        attrs.set_guid(keys::MAJOR_TYPE, keys::MEDIA_TYPE_VIDEO);
        attrs.set_guid(keys::SUBTYPE, self.subtype);
        attrs.set_size(keys::FRAME_SIZE, p.width, p.height);
        attrs.set_u32(keys::INTERLACE_MODE, INTERLACE_MIXED);
        if p.bit_rate > 0 {
            attrs.set_u32(keys::AVG_BITRATE, p.bit_rate.min(u32::MAX as u64) as u32);
        }
        // Only replace user data the engine already expects.
        if p.extra_is_usable() && has_user_data {
            attrs.set_blob(keys::USER_DATA, p.extra.clone());
        }
        Ok(())
    }

    fn score_input_type(&self, media_type: &MediaType) -> i32 {
        let Some(id) = media_type.subtype() else {
            return -1;
        };
        if id != self.subtype {
            return -1;
        }
        if self.params.codec_tag > 0 && to_fourcc(id) == Some(self.params.codec_tag) {
            return 2;
        }
        1
    }

    /// Forced layout 3, matching bit depth 2, other known layouts 1.
    ///
    /// A depth mismatch is still acceptable but some engines answer it
    /// with a format change on the first picture.
    fn score_output_type(&self, media_type: &MediaType) -> i32 {
        let Some(pf) = media_type.subtype().and_then(pixel_format_for) else {
            return -1;
        };
        if self.params.format == Some(pf) {
            3
        } else if pf.bits_per_channel() == self.params.wanted_depth() {
            2
        } else {
            1
        }
    }

    fn on_output_format_committed(&mut self, media_type: &MediaType) -> Result<FrameFormat> {
        let attrs = media_type.attributes();
        let pf = media_type
            .subtype()
            .and_then(pixel_format_for)
            .ok_or_else(|| {
                BridgeError::Negotiation(format!("unsupported output subtype in\n{}", media_type))
            })?;
        let (coded_w, coded_h) = attrs
            .size(keys::FRAME_SIZE)
            .ok_or_else(|| BridgeError::Negotiation("output type has no frame size".into()))?;
        self.stride = Some((coded_w, coded_h));

        let mut format = VideoFormat::new(pf, coded_w, coded_h);
        if let Some(area) = attrs.blob(keys::MINIMUM_DISPLAY_APERTURE).and_then(parse_area) {
            log::debug!(
                "video area: ({}, {}), {}x{}",
                area.x,
                area.y,
                area.width,
                area.height
            );
            format.width = area.width;
            format.height = area.height;
            format.aperture = Some(area);
        }
        log::info!("output format: {} {}x{}", pf, format.width, format.height);
        self.format = Some(format);
        Ok(FrameFormat::Video(format))
    }

    fn stride_hint(&self) -> Option<(u32, u32)> {
        self.stride
    }

    fn filter_bytes(&mut self, data: Bytes) -> Bytes {
        let data = match self.filter.as_mut() {
            Some(filter) => filter(data),
            None => data,
        };
        match self.pending_config.take() {
            Some(config) => {
                let mut out = BytesMut::with_capacity(config.len() + data.len());
                out.extend_from_slice(&config);
                out.extend_from_slice(&data);
                out.freeze()
            }
            None => data,
        }
    }
}

/// Packs a display area the way [`parse_area`] reads it: x and y offsets
/// as 16.16 fixed point, then width and height, all little endian.
pub fn area_blob(area: &Aperture) -> Bytes {
    let mut out = BytesMut::with_capacity(16);
    out.extend_from_slice(&(area.x << 16).to_le_bytes());
    out.extend_from_slice(&(area.y << 16).to_le_bytes());
    out.extend_from_slice(&area.width.to_le_bytes());
    out.extend_from_slice(&area.height.to_le_bytes());
    out.freeze()
}

fn parse_area(blob: &Bytes) -> Option<Aperture> {
    if blob.len() < 16 {
        return None;
    }
    let word = |i: usize| [blob[i], blob[i + 1], blob[i + 2], blob[i + 3]];
    let area = Aperture {
        x: i32::from_le_bytes(word(0)) >> 16,
        y: i32::from_le_bytes(word(4)) >> 16,
        width: u32::from_le_bytes(word(8)),
        height: u32::from_le_bytes(word(12)),
    };
    (area.width > 0 && area.height > 0).then_some(area)
}
