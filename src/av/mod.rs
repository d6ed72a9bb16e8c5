use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// Whether a stream carries audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    H264,
    H265,
    VP8,
    VP9,
    AV1,
    MJPEG,
    MPEG2,
    MPEG4,
    MSMPEG4V3,
    WMV1,
    WMV2,
    WMV3,
    VC1,
    AAC,
    MP3,
    MP2,
    MP1,
    AC3,
    EAC3,
    WMAVOICE,
    WMAV2,
    WMAPRO,
    WMALOSSLESS,
    OPUS,
}

impl CodecType {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            CodecType::H264
            | CodecType::H265
            | CodecType::VP8
            | CodecType::VP9
            | CodecType::AV1
            | CodecType::MJPEG
            | CodecType::MPEG2
            | CodecType::MPEG4
            | CodecType::MSMPEG4V3
            | CodecType::WMV1
            | CodecType::WMV2
            | CodecType::WMV3
            | CodecType::VC1 => MediaKind::Video,
            _ => MediaKind::Audio,
        }
    }

    /// Short lowercase name, as used by demuxers.
    pub fn name(&self) -> &'static str {
        match self {
            CodecType::H264 => "h264",
            CodecType::H265 => "hevc",
            CodecType::VP8 => "vp8",
            CodecType::VP9 => "vp9",
            CodecType::AV1 => "av1",
            CodecType::MJPEG => "mjpeg",
            CodecType::MPEG2 => "mpeg2",
            CodecType::MPEG4 => "mpeg4",
            CodecType::MSMPEG4V3 => "msmpeg4v3",
            CodecType::WMV1 => "wmv1",
            CodecType::WMV2 => "wmv2",
            CodecType::WMV3 => "wmv3",
            CodecType::VC1 => "vc1",
            CodecType::AAC => "aac",
            CodecType::MP3 => "mp3",
            CodecType::MP2 => "mp2",
            CodecType::MP1 => "mp1",
            CodecType::AC3 => "ac3",
            CodecType::EAC3 => "eac3",
            CodecType::WMAVOICE => "wmavoice",
            CodecType::WMAV2 => "wmav2",
            CodecType::WMAPRO => "wmapro",
            CodecType::WMALOSSLESS => "wmalossless",
            CodecType::OPUS => "opus",
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let codec = match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => CodecType::H264,
            "hevc" | "h265" => CodecType::H265,
            "vp8" => CodecType::VP8,
            "vp9" => CodecType::VP9,
            "av1" => CodecType::AV1,
            "mjpeg" => CodecType::MJPEG,
            "mpeg2" | "mpeg2video" => CodecType::MPEG2,
            "mpeg4" => CodecType::MPEG4,
            "msmpeg4v3" => CodecType::MSMPEG4V3,
            "wmv1" => CodecType::WMV1,
            "wmv2" => CodecType::WMV2,
            "wmv3" => CodecType::WMV3,
            "vc1" => CodecType::VC1,
            "aac" => CodecType::AAC,
            "mp3" => CodecType::MP3,
            "mp2" => CodecType::MP2,
            "mp1" => CodecType::MP1,
            "ac3" => CodecType::AC3,
            "eac3" => CodecType::EAC3,
            "wmavoice" => CodecType::WMAVOICE,
            "wmav2" => CodecType::WMAV2,
            "wmapro" => CodecType::WMAPRO,
            "wmalossless" => CodecType::WMALOSSLESS,
            "opus" => CodecType::OPUS,
            other => {
                return Err(BridgeError::Config {
                    key: "codec".to_string(),
                    reason: format!("unknown codec {}", other),
                })
            }
        };
        Ok(codec)
    }
}

/// Source of encoded packets for [`crate::session::SessionHandle::pump`].
#[async_trait]
pub trait Demuxer: Send {
    /// Next packet, or `None` once the source is exhausted.
    async fn read_packet(&mut self) -> crate::Result<Option<Packet>>;
}

mod frame;
mod packet;
pub use frame::*;
pub use packet::*;
