//! Typed attribute bags.
//!
//! Engines describe media types, stream capabilities and their own
//! configuration through a dynamically typed property map keyed by GUID.
//! [`Attributes`] models that map with a closed set of value kinds, and
//! [`MediaType`] wraps it as a format descriptor.
//!
//! ```rust
//! use codecbridge::engine::attributes::{keys, Attributes};
//!
//! let mut attrs = Attributes::new();
//! attrs.set_size(keys::FRAME_SIZE, 1920, 1080);
//! attrs.set_u32(keys::INTERLACE_MODE, 7);
//!
//! assert_eq!(attrs.size(keys::FRAME_SIZE), Some((1920, 1080)));
//! assert_eq!(attrs.get_u32_or(keys::AVG_BITRATE, 0), 0);
//! ```

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Attribute keys, media subtypes and categories are all GUIDs.
pub type Guid = Uuid;

/// One attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    U32(u32),
    U64(u64),
    F64(f64),
    Str(String),
    Blob(Bytes),
    Guid(Guid),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::U32(v) => write!(f, "{}", v),
            AttrValue::U64(v) => write!(f, "{}", v),
            AttrValue::F64(v) => write!(f, "{}", v),
            AttrValue::Str(v) => write!(f, "{}", v),
            AttrValue::Blob(v) => {
                write!(f, "({})", v.len())?;
                for b in v.iter() {
                    write!(f, " {:x}", b)?;
                }
                Ok(())
            }
            AttrValue::Guid(v) => write!(f, "{}", v),
        }
    }
}

/// Ordered GUID → value map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    items: BTreeMap<Guid, AttrValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: Guid) -> bool {
        self.items.contains_key(&key)
    }

    pub fn get(&self, key: Guid) -> Option<&AttrValue> {
        self.items.get(&key)
    }

    pub fn set(&mut self, key: Guid, value: AttrValue) {
        self.items.insert(key, value);
    }

    pub fn remove(&mut self, key: Guid) -> Option<AttrValue> {
        self.items.remove(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Guid, &AttrValue)> {
        self.items.iter()
    }

    pub fn set_u32(&mut self, key: Guid, value: u32) {
        self.set(key, AttrValue::U32(value));
    }

    pub fn set_u64(&mut self, key: Guid, value: u64) {
        self.set(key, AttrValue::U64(value));
    }

    pub fn set_f64(&mut self, key: Guid, value: f64) {
        self.set(key, AttrValue::F64(value));
    }

    pub fn set_string(&mut self, key: Guid, value: impl Into<String>) {
        self.set(key, AttrValue::Str(value.into()));
    }

    pub fn set_blob(&mut self, key: Guid, value: impl Into<Bytes>) {
        self.set(key, AttrValue::Blob(value.into()));
    }

    pub fn set_guid(&mut self, key: Guid, value: Guid) {
        self.set(key, AttrValue::Guid(value));
    }

    pub fn u32(&self, key: Guid) -> Option<u32> {
        match self.get(key)? {
            AttrValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn u64(&self, key: Guid) -> Option<u64> {
        match self.get(key)? {
            AttrValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn f64(&self, key: Guid) -> Option<f64> {
        match self.get(key)? {
            AttrValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, key: Guid) -> Option<&str> {
        match self.get(key)? {
            AttrValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn blob(&self, key: Guid) -> Option<&Bytes> {
        match self.get(key)? {
            AttrValue::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn guid(&self, key: Guid) -> Option<Guid> {
        match self.get(key)? {
            AttrValue::Guid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32_or(&self, key: Guid, default: u32) -> u32 {
        self.u32(key).unwrap_or(default)
    }

    pub fn get_u64_or(&self, key: Guid, default: u64) -> u64 {
        self.u64(key).unwrap_or(default)
    }

    pub fn get_f64_or(&self, key: Guid, default: f64) -> f64 {
        self.f64(key).unwrap_or(default)
    }

    /// Stores two u32 values packed high/low into one u64, the way frame
    /// sizes and ratios are carried.
    pub fn set_size(&mut self, key: Guid, width: u32, height: u32) {
        self.set_u64(key, pack_u32_pair(width, height));
    }

    pub fn size(&self, key: Guid) -> Option<(u32, u32)> {
        self.u64(key).map(unpack_u32_pair)
    }

    pub fn set_ratio(&mut self, key: Guid, num: u32, den: u32) {
        self.set_size(key, num, den);
    }

    pub fn ratio(&self, key: Guid) -> Option<(u32, u32)> {
        self.size(key)
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} attributes: ", self.items.len())?;
        for (key, value) in &self.items {
            write!(f, "{}={}", super::labels::label_or_guid(*key), value)?;
            if *key == keys::FRAME_SIZE {
                if let Some((w, h)) = self.size(*key) {
                    write!(f, " ({}x{})", w, h)?;
                }
            } else if *key == keys::FRAME_RATE || *key == keys::PIXEL_ASPECT_RATIO {
                if let Some((n, d)) = self.ratio(*key) {
                    write!(f, " ({}:{})", n, d)?;
                }
            }
            write!(f, ", ")?;
        }
        Ok(())
    }
}

pub fn pack_u32_pair(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

pub fn unpack_u32_pair(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

/// A format descriptor: an attribute bag describing one media type.
///
/// Committed descriptors are never edited in place; a format change
/// produces a new `MediaType`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaType {
    attrs: Attributes,
}

impl MediaType {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subtype(major: Guid, subtype: Guid) -> Self {
        let mut mt = Self::new();
        mt.attrs.set_guid(keys::MAJOR_TYPE, major);
        mt.attrs.set_guid(keys::SUBTYPE, subtype);
        mt
    }

    pub fn major_type(&self) -> Option<Guid> {
        self.attrs.guid(keys::MAJOR_TYPE)
    }

    pub fn subtype(&self) -> Option<Guid> {
        self.attrs.guid(keys::SUBTYPE)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attrs
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attrs
    }
}

impl From<Attributes> for MediaType {
    fn from(attrs: Attributes) -> Self {
        Self { attrs }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.attrs.fmt(f)
    }
}

/// Well-known attribute keys and GUID constants.
pub mod keys {
    use super::Guid;

    pub const MAJOR_TYPE: Guid = Guid::from_u128(0x48eba18e_f8c9_4687_bf11_0a74c9f96a8f);
    pub const SUBTYPE: Guid = Guid::from_u128(0xf7e34c9a_42e8_4714_b74b_cb29d72c35e5);
    pub const FRAME_SIZE: Guid = Guid::from_u128(0x1652c33d_d6b2_4012_b834_72030849a37d);
    pub const FRAME_RATE: Guid = Guid::from_u128(0xc459a2e8_3d2c_4e44_b132_fee5156c7bb0);
    pub const PIXEL_ASPECT_RATIO: Guid = Guid::from_u128(0xc6376a1e_8d0a_4027_be45_6d9a0ad39bb6);
    pub const INTERLACE_MODE: Guid = Guid::from_u128(0xe2724bb8_e676_4806_b4b2_a8d6efb44ccd);
    pub const AVG_BITRATE: Guid = Guid::from_u128(0x20332624_fb0d_4d9e_bd0d_cbf6786c102e);
    pub const USER_DATA: Guid = Guid::from_u128(0xb6bc765f_4c3b_40a4_bd51_2535b66fe09d);
    pub const MINIMUM_DISPLAY_APERTURE: Guid =
        Guid::from_u128(0xd7388766_18fe_48c6_a177_ee894867c8c4);
    pub const DEFAULT_STRIDE: Guid = Guid::from_u128(0x644b4e48_1e02_4516_b0eb_c01ca9d49ac6);

    pub const AUDIO_NUM_CHANNELS: Guid = Guid::from_u128(0x37e48bf5_645e_4c5b_89de_ada9e29b696a);
    pub const AUDIO_SAMPLES_PER_SECOND: Guid =
        Guid::from_u128(0x5faeeae7_0290_4c31_9e8a_c534f68d9dba);
    pub const AUDIO_BLOCK_ALIGNMENT: Guid =
        Guid::from_u128(0x322de230_9eeb_43bd_ab7a_ff412251541d);
    pub const AUDIO_AVG_BYTES_PER_SECOND: Guid =
        Guid::from_u128(0x1aab75c8_cfef_451c_ab95_ac034b8e1731);
    pub const AUDIO_BITS_PER_SAMPLE: Guid =
        Guid::from_u128(0xf2deb57f_40fa_4764_aa33_ed4f2d1ff669);
    pub const AUDIO_VALID_BITS_PER_SAMPLE: Guid =
        Guid::from_u128(0xd9bf8d6a_9530_4b7c_9ddf_ff6fd58bbd06);
    pub const AUDIO_CHANNEL_MASK: Guid = Guid::from_u128(0x55fb5765_644a_4caf_8479_938983bb1588);
    pub const AUDIO_PREFER_WAVEFORMATEX: Guid =
        Guid::from_u128(0xa901aaba_e037_458a_bdf6_545be2074042);
    pub const AAC_PAYLOAD_TYPE: Guid = Guid::from_u128(0xbfbabe79_7434_4d1c_94f0_72a3b9e17188);

    /// Sample flag: the unit is a random access point.
    pub const SAMPLE_CLEAN_POINT: Guid = Guid::from_u128(0x9cdf01d8_a0f0_43ba_b077_eaa06cbd728a);
    /// Sample flag: the unit does not continue the previous one.
    pub const SAMPLE_DISCONTINUITY: Guid = Guid::from_u128(0x9cdf01d9_a0f0_43ba_b077_eaa06cbd728a);

    /// Engine attribute: the transform only works asynchronously.
    pub const TRANSFORM_ASYNC: Guid = Guid::from_u128(0xf81a699a_649a_497d_8c73_29f8fed6ad7a);
    pub const FRIENDLY_NAME: Guid = Guid::from_u128(0x314ffbae_5b41_4c95_9c19_4e7d586face3);
    pub const HARDWARE_VENDOR_ID: Guid = Guid::from_u128(0x3aecb0cc_035b_4bcc_8185_2b8d551ef3af);
    pub const HARDWARE_URL: Guid = Guid::from_u128(0x2fb866ac_b078_4942_ab6c_003d05cda674);
    pub const VIDEO_ACCELERATION: Guid = Guid::from_u128(0x7b18a78e_b1d8_4f7c_9b80_2c1a7f3efd06);
    pub const LOW_LATENCY_MODE: Guid = Guid::from_u128(0x9c27891a_ed7a_40e1_88e8_b22727a024ee);
    pub const MAX_CODED_WIDTH: Guid = Guid::from_u128(0x5ae557b8_77af_41f5_9fa6_4db2fe1d4bca);
    pub const MAX_CODED_HEIGHT: Guid = Guid::from_u128(0x7262a16a_d2dc_4e75_9ba8_65c0c6d32b13);

    pub const MEDIA_TYPE_VIDEO: Guid = Guid::from_u128(0x73646976_0000_0010_8000_00aa00389b71);
    pub const MEDIA_TYPE_AUDIO: Guid = Guid::from_u128(0x73647561_0000_0010_8000_00aa00389b71);

    pub const CATEGORY_VIDEO_DECODER: Guid =
        Guid::from_u128(0xd6c02d4b_6833_45b4_971a_05a4b04bab91);
    pub const CATEGORY_AUDIO_DECODER: Guid =
        Guid::from_u128(0x9ea73fb4_ef7a_4559_8d5d_719d8f0426c7);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors_do_not_coerce() {
        let mut attrs = Attributes::new();
        attrs.set_u32(keys::AVG_BITRATE, 128_000);
        assert_eq!(attrs.u32(keys::AVG_BITRATE), Some(128_000));
        assert_eq!(attrs.u64(keys::AVG_BITRATE), None);
        assert_eq!(attrs.get_u64_or(keys::AVG_BITRATE, 9), 9);
    }

    #[test]
    fn test_packed_pairs() {
        let mut attrs = Attributes::new();
        attrs.set_ratio(keys::FRAME_RATE, 30000, 1001);
        assert_eq!(attrs.u64(keys::FRAME_RATE), Some((30000u64 << 32) | 1001));
        assert_eq!(attrs.ratio(keys::FRAME_RATE), Some((30000, 1001)));
    }

    #[test]
    fn test_media_type_subtype() {
        let mt = MediaType::with_subtype(keys::MEDIA_TYPE_AUDIO, keys::MEDIA_TYPE_VIDEO);
        assert_eq!(mt.major_type(), Some(keys::MEDIA_TYPE_AUDIO));
        assert_eq!(mt.subtype(), Some(keys::MEDIA_TYPE_VIDEO));
        assert_eq!(mt.attributes().len(), 2);
    }

    #[test]
    fn test_display_includes_frame_size() {
        let mut attrs = Attributes::new();
        attrs.set_size(keys::FRAME_SIZE, 640, 480);
        let text = attrs.to_string();
        assert!(text.starts_with("1 attributes: "));
        assert!(text.contains("(640x480)"));
    }
}
