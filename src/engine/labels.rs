//! Debug labels for GUIDs and native objects.
//!
//! Labels live in a side table instead of being attached to the objects
//! themselves. Nothing in the decode path depends on them; they only make
//! log lines readable.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::attributes::{keys, Guid};

lazy_static! {
    static ref LABELS: Mutex<HashMap<Guid, String>> = Mutex::new(builtin());
}

fn builtin() -> HashMap<Guid, String> {
    [
        (keys::MAJOR_TYPE, "MAJOR_TYPE"),
        (keys::SUBTYPE, "SUBTYPE"),
        (keys::FRAME_SIZE, "FRAME_SIZE"),
        (keys::FRAME_RATE, "FRAME_RATE"),
        (keys::PIXEL_ASPECT_RATIO, "PIXEL_ASPECT_RATIO"),
        (keys::AUDIO_NUM_CHANNELS, "AUDIO_NUM_CHANNELS"),
        (keys::AUDIO_SAMPLES_PER_SECOND, "AUDIO_SAMPLES_PER_SECOND"),
        (keys::AUDIO_BITS_PER_SAMPLE, "AUDIO_BITS_PER_SAMPLE"),
        (keys::MEDIA_TYPE_VIDEO, "Video"),
        (keys::MEDIA_TYPE_AUDIO, "Audio"),
    ]
    .into_iter()
    .map(|(k, v)| (k, v.to_string()))
    .collect()
}

/// Associates `label` with `id`, replacing any previous label.
pub fn set_label(id: Guid, label: impl Into<String>) {
    LABELS.lock().insert(id, label.into());
}

pub fn label(id: Guid) -> Option<String> {
    LABELS.lock().get(&id).cloned()
}

/// The label if one is registered, otherwise the hyphenated GUID.
pub fn label_or_guid(id: Guid) -> String {
    label(id).unwrap_or_else(|| id.to_string())
}
