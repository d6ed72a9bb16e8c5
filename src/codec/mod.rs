//! Codec identifiers and the audio/video decoder variants.
//!
//! Engine subtypes are GUIDs. Most of them are a FourCC or a wave format
//! tag embedded in the base GUID `XXXXXXXX-0000-0010-8000-00AA00389B71`;
//! [`fourcc_guid`] and [`to_fourcc`] convert between the two forms.

use lazy_static::lazy_static;

use crate::av::CodecType;
use crate::engine::Guid;

pub mod audio;
pub mod video;

pub use audio::{AudioCodecParameters, AudioVariant};
pub use video::{VideoCodecParameters, VideoVariant};

const BASE_TAIL: [u8; 8] = [0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71];

/// Builds the subtype GUID for a FourCC such as `b"H264"`.
pub const fn fourcc_guid(fourcc: &[u8; 4]) -> Guid {
    tag_guid(u32::from_le_bytes(*fourcc))
}

/// Builds the subtype GUID for a numeric format tag.
pub const fn tag_guid(tag: u32) -> Guid {
    Guid::from_fields(tag, 0x0000, 0x0010, &BASE_TAIL)
}

/// Recovers the FourCC (or format tag) of a subtype built on the base GUID.
pub fn to_fourcc(id: Guid) -> Option<u32> {
    let (d1, d2, d3, d4) = id.as_fields();
    if d2 == 0 && d3 == 0x0010 && *d4 == BASE_TAIL {
        Some(d1)
    } else {
        None
    }
}

/// Printable form of a FourCC, `None` when it is not ASCII.
pub fn fourcc_string(fourcc: u32) -> Option<String> {
    let bytes = fourcc.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        Some(bytes.iter().map(|b| *b as char).collect())
    } else {
        None
    }
}

/// Subtype GUIDs of the media types this crate knows by name.
pub mod subtypes {
    use super::{fourcc_guid, tag_guid};
    use crate::engine::Guid;

    pub const H264: Guid = fourcc_guid(b"H264");
    pub const HEVC: Guid = fourcc_guid(b"HEVC");
    pub const VP80: Guid = fourcc_guid(b"VP80");
    pub const VP90: Guid = fourcc_guid(b"VP90");
    pub const AV1: Guid = fourcc_guid(b"AV01");
    pub const MJPG: Guid = fourcc_guid(b"MJPG");
    pub const MPEG2: Guid = Guid::from_u128(0xe06d8026_db46_11cf_b4d1_00804f9b5a69);
    pub const MP4V: Guid = fourcc_guid(b"MP4V");
    pub const MP43: Guid = fourcc_guid(b"MP43");
    pub const WMV1: Guid = fourcc_guid(b"WMV1");
    pub const WMV2: Guid = fourcc_guid(b"WMV2");
    pub const WMV3: Guid = fourcc_guid(b"WMV3");
    pub const WVC1: Guid = fourcc_guid(b"WVC1");

    pub const NV12: Guid = fourcc_guid(b"NV12");
    pub const P010: Guid = fourcc_guid(b"P010");
    pub const P016: Guid = fourcc_guid(b"P016");
    pub const IYUV: Guid = fourcc_guid(b"IYUV");
    pub const I420: Guid = fourcc_guid(b"I420");
    pub const YUY2: Guid = fourcc_guid(b"YUY2");
    pub const UYVY: Guid = fourcc_guid(b"UYVY");

    pub const PCM: Guid = tag_guid(0x0001);
    pub const FLOAT: Guid = tag_guid(0x0003);
    pub const MPEG: Guid = tag_guid(0x0050);
    pub const MP3: Guid = tag_guid(0x0055);
    pub const AAC: Guid = tag_guid(0x1610);
    pub const MSP1: Guid = tag_guid(0x000a);
    pub const WMA_V8: Guid = tag_guid(0x0161);
    pub const WMA_V9: Guid = tag_guid(0x0162);
    pub const WMA_LOSSLESS: Guid = tag_guid(0x0163);
    pub const AC3: Guid = Guid::from_u128(0xe06d802c_db46_11cf_b4d1_00804f9b5a69);
    pub const EAC3: Guid = Guid::from_u128(0xa7fb87af_2d02_42fb_a4d4_05cd93843bdd);
}

/// Input subtype an engine must accept to decode `codec`.
pub fn codec_for(codec: CodecType) -> Option<Guid> {
    use subtypes::*;
    let id = match codec {
        CodecType::H264 => H264,
        CodecType::H265 => HEVC,
        CodecType::VP8 => VP80,
        CodecType::VP9 => VP90,
        CodecType::AV1 => AV1,
        CodecType::MJPEG => MJPG,
        CodecType::MPEG2 => MPEG2,
        CodecType::MPEG4 => MP4V,
        CodecType::MSMPEG4V3 => MP43,
        CodecType::WMV1 => WMV1,
        CodecType::WMV2 => WMV2,
        CodecType::WMV3 => WMV3,
        CodecType::VC1 => WVC1,
        CodecType::AAC => AAC,
        CodecType::MP3 => MP3,
        CodecType::MP2 | CodecType::MP1 => MPEG,
        CodecType::AC3 => AC3,
        CodecType::EAC3 => EAC3,
        CodecType::WMAVOICE => MSP1,
        CodecType::WMAV2 => WMA_V8,
        CodecType::WMAPRO => WMA_V9,
        CodecType::WMALOSSLESS => WMA_LOSSLESS,
        CodecType::OPUS => return None,
    };
    Some(id)
}

lazy_static! {
    static ref SUBTYPE_LABELS: () = add_subtype_labels();
}

/// Registers readable names for the known subtypes in the label table.
/// Runs once per process; later calls return immediately.
pub fn register_labels() {
    lazy_static::initialize(&SUBTYPE_LABELS);
}

fn add_subtype_labels() {
    use crate::engine::labels::set_label;
    use subtypes::*;
    for (id, name) in [
        (H264, "H264"),
        (HEVC, "HEVC"),
        (VP80, "VP80"),
        (VP90, "VP90"),
        (AV1, "AV1"),
        (MPEG2, "MPEG2"),
        (NV12, "NV12"),
        (P010, "P010"),
        (P016, "P016"),
        (IYUV, "IYUV"),
        (YUY2, "YUY2"),
        (UYVY, "UYVY"),
        (PCM, "PCM"),
        (FLOAT, "Float"),
        (AAC, "AAC"),
        (MP3, "MP3"),
        (AC3, "AC3"),
        (EAC3, "EAC3"),
    ] {
        set_label(id, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_round_trip() {
        assert_eq!(
            subtypes::H264.to_string(),
            "34363248-0000-0010-8000-00aa00389b71"
        );
        let tag = to_fourcc(subtypes::NV12).unwrap();
        assert_eq!(fourcc_string(tag).as_deref(), Some("NV12"));
        assert_eq!(to_fourcc(subtypes::AAC), Some(0x1610));
        assert_eq!(to_fourcc(subtypes::MPEG2), None);
    }

    #[test]
    fn test_codec_table() {
        assert_eq!(codec_for(CodecType::H264), Some(subtypes::H264));
        assert_eq!(codec_for(CodecType::MP1), codec_for(CodecType::MP2));
        assert_eq!(codec_for(CodecType::OPUS), None);
    }

    #[test]
    fn test_register_labels_names_subtypes() {
        register_labels();
        register_labels();
        assert_eq!(crate::engine::labels::label_or_guid(subtypes::NV12), "NV12");
        assert_eq!(crate::engine::labels::label_or_guid(subtypes::FLOAT), "Float");
    }
}
