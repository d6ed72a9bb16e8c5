use bytes::Bytes;
use std::time::Duration;

use crate::engine::sample::{duration_to_ticks, TICKS_PER_SECOND};

/// Default timescale of `pts`/`dts`: microseconds.
pub const DEFAULT_TIME_SCALE: u32 = 1_000_000;

/// One encoded access unit, or the end-of-stream marker.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Units per second of `pts` and `dts`.
    pub time_scale: u32,
    pub stream_index: usize,
    pub is_key: bool,
    pub duration: Option<Duration>,
    pub end_of_stream: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            time_scale: DEFAULT_TIME_SCALE,
            stream_index: 0,
            is_key: false,
            duration: None,
            end_of_stream: false,
        }
    }

    /// An empty packet that tells the decoder no more input follows.
    pub fn end_of_stream() -> Self {
        Self {
            end_of_stream: true,
            ..Self::new(Bytes::new())
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_time_scale(mut self, time_scale: u32) -> Self {
        self.time_scale = time_scale.max(1);
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Presentation time in 100-ns engine ticks, falling back to `dts`.
    pub fn time_ticks(&self) -> Option<i64> {
        let t = self.pts.or(self.dts)?;
        let scaled = t as i128 * TICKS_PER_SECOND as i128 / self.time_scale.max(1) as i128;
        Some(scaled as i64)
    }

    pub fn duration_ticks(&self) -> Option<i64> {
        self.duration.map(duration_to_ticks)
    }
}
