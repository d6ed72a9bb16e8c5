//! Audio decoder variant.
//!
//! Compressed input is described with wave-format style attributes. Output
//! is interleaved PCM or float; anything else (bitstream passthrough) is
//! rejected.

use bytes::{BufMut, Bytes, BytesMut};

use crate::av::{AudioFormat, CodecType, FrameFormat, MediaKind, SampleFormat};
use crate::codec::{codec_for, subtypes};
use crate::engine::{keys, CapabilityClass, Guid, MediaType};
use crate::error::{BridgeError, Result};
use crate::transform::DecoderHooks;

/// Size of the wave-info header that precedes AAC configuration data.
const AAC_INFO_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCodecParameters {
    pub codec: CodecType,
    pub sample_rate: u32,
    pub channels: u32,
    pub bit_rate: u64,
    pub block_align: u32,
    pub bits_per_coded_sample: u32,
    /// Codec private data, e.g. an AAC AudioSpecificConfig.
    pub extra: Bytes,
}

impl AudioCodecParameters {
    pub fn new(codec: CodecType, sample_rate: u32, channels: u32) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
            bit_rate: 0,
            block_align: 0,
            bits_per_coded_sample: 0,
            extra: Bytes::new(),
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_block_align(mut self, block_align: u32) -> Self {
        self.block_align = block_align;
        self
    }

    pub fn with_bits_per_coded_sample(mut self, bits: u32) -> Self {
        self.bits_per_coded_sample = bits;
        self
    }

    pub fn with_extra(mut self, extra: impl Into<Bytes>) -> Self {
        self.extra = extra.into();
        self
    }

    /// Fills a missing rate or channel count from an AAC
    /// AudioSpecificConfig in `extra`.
    pub fn with_aac_defaults(mut self) -> Self {
        if self.codec != CodecType::AAC {
            return self;
        }
        if let Some((rate, channels)) = aac_config_info(&self.extra) {
            if self.sample_rate == 0 {
                self.sample_rate = rate;
            }
            if self.channels == 0 {
                self.channels = channels;
            }
        }
        self
    }
}

/// Sampling frequency for an MPEG-4 audio frequency index.
fn aac_sample_rate(index: u8) -> Option<u32> {
    const RATES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    RATES.get(index as usize).copied()
}

/// Sample rate and channel count from the first two bytes of an
/// AudioSpecificConfig (5 bits object type, 4 bits rate index, 4 bits
/// channel configuration).
pub fn aac_config_info(config: &[u8]) -> Option<(u32, u32)> {
    if config.len() < 2 {
        return None;
    }
    let bits = u16::from_be_bytes([config[0], config[1]]);
    let rate_index = ((bits >> 7) & 0x0f) as u8;
    let channels = ((bits >> 3) & 0x0f) as u32;
    Some((aac_sample_rate(rate_index)?, channels))
}

/// Reads the PCM layout of an uncompressed audio type.
pub fn audio_format_of(media_type: &MediaType) -> Option<AudioFormat> {
    let attrs = media_type.attributes();
    let bits = attrs
        .u32(keys::AUDIO_VALID_BITS_PER_SAMPLE)
        .or_else(|| attrs.u32(keys::AUDIO_BITS_PER_SAMPLE))?;
    let subtype = media_type.subtype()?;
    let is_float = if subtype == subtypes::PCM {
        false
    } else if subtype == subtypes::FLOAT {
        true
    } else {
        return None;
    };
    let sample_format = SampleFormat::from_bits(bits, is_float)?;

    let (channels, channel_mask) = match attrs.u32(keys::AUDIO_CHANNEL_MASK) {
        Some(mask) if mask != 0 => (mask.count_ones(), mask),
        _ => (attrs.u32(keys::AUDIO_NUM_CHANNELS)?, 0),
    };
    let sample_rate = attrs.u32(keys::AUDIO_SAMPLES_PER_SECOND)?;
    Some(AudioFormat {
        sample_format,
        channels,
        sample_rate,
        channel_mask,
    })
}

/// Hooks for audio decoding.
pub struct AudioVariant {
    params: AudioCodecParameters,
    subtype: Guid,
    format: Option<AudioFormat>,
}

impl AudioVariant {
    pub fn new(params: AudioCodecParameters) -> Result<Self> {
        if params.codec.media_kind() != MediaKind::Audio {
            return Err(BridgeError::Config {
                key: "codec".to_string(),
                reason: format!("{} is not an audio codec", params.codec),
            });
        }
        let subtype = codec_for(params.codec).ok_or_else(|| BridgeError::Config {
            key: "codec".to_string(),
            reason: format!("codec is not supported: {}", params.codec),
        })?;
        Ok(Self {
            params,
            subtype,
            format: None,
        })
    }

    pub fn parameters(&self) -> &AudioCodecParameters {
        &self.params
    }

    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }
}

impl DecoderHooks for AudioVariant {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn capability_class(&self) -> CapabilityClass {
        CapabilityClass::audio_decoder(self.subtype)
    }

    fn configure_input_type(&self, media_type: &mut MediaType) -> Result<()> {
        let p = &self.params;
        let attrs = media_type.attributes_mut();
        attrs.set_guid(keys::MAJOR_TYPE, keys::MEDIA_TYPE_AUDIO);
        attrs.set_guid(keys::SUBTYPE, self.subtype);
        if p.bit_rate > 0 {
            attrs.set_u32(keys::AVG_BITRATE, p.bit_rate.min(u32::MAX as u64) as u32);
        }

        if p.codec == CodecType::AAC {
            // Raw AAC without a config is read as ADTS.
            let payload_type: u8 = if p.extra.is_empty() { 1 } else { 0 };
            let mut user_data = BytesMut::with_capacity(AAC_INFO_LEN + p.extra.len());
            user_data.put_u8(payload_type);
            user_data.put_bytes(0, AAC_INFO_LEN - 1);
            user_data.extend_from_slice(&p.extra);
            attrs.set_blob(keys::USER_DATA, user_data.freeze());
            attrs.set_u32(keys::AAC_PAYLOAD_TYPE, payload_type as u32);
        } else if !p.extra.is_empty() {
            attrs.set_blob(keys::USER_DATA, p.extra.clone());
        }

        attrs.set_u32(keys::AUDIO_SAMPLES_PER_SECOND, p.sample_rate);
        attrs.set_u32(keys::AUDIO_NUM_CHANNELS, p.channels);
        if p.block_align > 0 {
            attrs.set_u32(keys::AUDIO_BLOCK_ALIGNMENT, p.block_align);
        }
        if p.bit_rate > 0 {
            attrs.set_u32(
                keys::AUDIO_AVG_BYTES_PER_SECOND,
                (p.bit_rate / 8).min(u32::MAX as u64) as u32,
            );
        }
        if p.bits_per_coded_sample > 0 {
            attrs.set_u32(keys::AUDIO_BITS_PER_SAMPLE, p.bits_per_coded_sample);
        }
        attrs.set_u32(keys::AUDIO_PREFER_WAVEFORMATEX, 1);
        Ok(())
    }

    fn score_input_type(&self, media_type: &MediaType) -> i32 {
        if media_type.subtype() == Some(self.subtype) {
            1
        } else {
            -1
        }
    }

    fn score_output_type(&self, media_type: &MediaType) -> i32 {
        if audio_format_of(media_type).is_some() {
            0
        } else {
            -1
        }
    }

    fn on_output_format_committed(&mut self, media_type: &MediaType) -> Result<FrameFormat> {
        let format = audio_format_of(media_type).ok_or_else(|| {
            BridgeError::Negotiation(format!("unsupported audio output type\n{}", media_type))
        })?;
        log::info!(
            "output format: {:?} {}ch {}Hz",
            format.sample_format,
            format.channels,
            format.sample_rate
        );
        self.format = Some(format);
        Ok(FrameFormat::Audio(format))
    }
}
