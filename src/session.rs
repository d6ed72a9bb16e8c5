//! # Async decode session
//!
//! Runs a [`TransformDriver`] on a blocking worker so engine calls never
//! stall the async runtime. Commands go in through a [`SessionHandle`];
//! frames, format changes and errors come out of an [`EventStream`].
//!
//! The engine is opened, driven and closed on the same worker thread.
//!
//! ```rust
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use codecbridge::av::{CodecType, Packet};
//! use codecbridge::codec::{subtypes, VideoCodecParameters, VideoVariant};
//! use codecbridge::engine::fake::{FakeConfig, FakePlatform};
//! use codecbridge::session::{SessionBuilder, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() -> codecbridge::Result<()> {
//! let platform = Arc::new(
//!     FakePlatform::named("session-doc").with_engine(FakeConfig::video(subtypes::H264, 64, 32)),
//! );
//! let hooks = VideoVariant::new(VideoCodecParameters::new(CodecType::H264, 64, 32))?;
//! let (handle, mut events) = SessionBuilder::new(platform, hooks).open().await?;
//!
//! handle.submit(Packet::new(vec![1u8; 32]).with_pts(0)).await?;
//! handle.submit(Packet::end_of_stream()).await?;
//! handle.close().await?;
//!
//! while let Some(event) = events.next().await {
//!     if let SessionEvent::Frame(frame) = event {
//!         assert_eq!(frame.pts, Some(0));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::av::{Demuxer, Frame, FrameFormat, Packet};
use crate::config::DecoderOptions;
use crate::engine::{EnginePlatform, MediaType};
use crate::error::{BridgeError, Result};
use crate::transform::{DecodeSink, DecoderHooks, SurfacePool, TransformDriver};

const COMMAND_QUEUE: usize = 32;

/// Something the decoder produced or went through.
#[derive(Debug)]
pub enum SessionEvent {
    /// The output format was (re)negotiated. Always precedes the frames
    /// that use it.
    Format {
        media_type: MediaType,
        format: FrameFormat,
    },
    Frame(Frame),
    EndOfStream,
    Flushed,
    /// A local failure; the session keeps going.
    Error(BridgeError),
    Closed,
}

/// Forwards driver callbacks into the event channel.
struct ChannelSink {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    fn send(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log::trace!("event stream dropped, discarding event");
        }
    }
}

impl DecodeSink for ChannelSink {
    fn on_output_format_changed(&mut self, media_type: &MediaType, format: &FrameFormat) {
        self.send(SessionEvent::Format {
            media_type: media_type.clone(),
            format: *format,
        });
    }

    fn on_frame(&mut self, frame: Frame) {
        self.send(SessionEvent::Frame(frame));
    }

    fn on_end_of_stream(&mut self) {
        self.send(SessionEvent::EndOfStream);
    }

    fn on_flush(&mut self) {
        self.send(SessionEvent::Flushed);
    }

    fn on_close(&mut self) {
        self.send(SessionEvent::Closed);
    }

    fn on_decode_error(&mut self, error: &BridgeError) {
        self.send(SessionEvent::Error(error.clone()));
    }
}

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Submit(Packet, Reply),
    Flush(Reply),
    SetProperty(String, String, Reply),
    Close(Reply),
}

/// Configures and opens a session.
pub struct SessionBuilder<H> {
    platform: Arc<dyn EnginePlatform>,
    hooks: H,
    options: DecoderOptions,
    surfaces: Option<Arc<dyn SurfacePool>>,
}

impl<H: DecoderHooks + 'static> SessionBuilder<H> {
    pub fn new(platform: Arc<dyn EnginePlatform>, hooks: H) -> Self {
        Self {
            platform,
            hooks,
            options: crate::config::defaults(),
            surfaces: None,
        }
    }

    pub fn options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn surface_pool(mut self, pool: Arc<dyn SurfacePool>) -> Self {
        self.surfaces = Some(pool);
        self
    }

    /// Starts the worker and opens the engine on it.
    pub async fn open(self) -> Result<(SessionHandle, EventStream)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            let sink = ChannelSink { events: event_tx };
            let mut driver =
                TransformDriver::new(self.platform, self.hooks, Box::new(sink), self.options);
            if let Some(pool) = self.surfaces {
                driver = driver.with_surface_pool(pool);
            }
            match driver.open() {
                Ok(()) => {
                    let _ = ready_tx.send(Ok(()));
                    run(driver, command_rx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        ready_rx.await.map_err(|_| BridgeError::SessionClosed)??;
        Ok((
            SessionHandle {
                commands: command_tx,
            },
            EventStream { events: event_rx },
        ))
    }
}

/// Worker loop. Ends on `Close` or when every handle is gone.
fn run<H: DecoderHooks>(mut driver: TransformDriver<H>, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Submit(packet, reply) => {
                let _ = reply.send(driver.submit(packet));
            }
            Command::Flush(reply) => {
                let _ = reply.send(driver.flush());
            }
            Command::SetProperty(key, value, reply) => {
                let _ = reply.send(driver.set_property(&key, &value));
            }
            Command::Close(reply) => {
                let _ = reply.send(driver.close());
                return;
            }
        }
    }
    log::debug!("all session handles dropped, closing decoder");
    let _ = driver.close();
}

/// Cloneable command side of a session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Submit(packet, _) => write!(f, "Submit({:?})", packet.pts),
            Command::Flush(_) => f.write_str("Flush"),
            Command::SetProperty(key, value, _) => write!(f, "SetProperty({}={})", key, value),
            Command::Close(_) => f.write_str("Close"),
        }
    }
}

impl SessionHandle {
    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| BridgeError::SessionClosed)?;
        rx.await.map_err(|_| BridgeError::SessionClosed)?
    }

    /// Decodes one packet. Frames arrive on the event stream before this
    /// returns.
    pub async fn submit(&self, packet: Packet) -> Result<()> {
        self.request(|reply| Command::Submit(packet, reply)).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.request(Command::Flush).await
    }

    pub async fn set_property(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.request(|reply| Command::SetProperty(key, value, reply))
            .await
    }

    /// Closes the decoder. Later requests fail with
    /// [`BridgeError::SessionClosed`].
    pub async fn close(&self) -> Result<()> {
        self.request(Command::Close).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Feeds every packet from `demuxer`, then end of stream. Local decode
    /// failures are skipped; they also appear on the event stream.
    ///
    /// Returns the number of packets read.
    pub async fn pump<D>(&self, demuxer: &mut D) -> Result<usize>
    where
        D: Demuxer + ?Sized,
    {
        let mut count = 0;
        while let Some(packet) = demuxer.read_packet().await? {
            count += 1;
            match self.submit(packet).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => log::debug!("packet {} skipped: {}", count, e),
                Err(e) => return Err(e),
            }
        }
        self.submit(Packet::end_of_stream()).await?;
        Ok(count)
    }
}

/// Event side of a session. Ends after the session closes.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::CodecType;
    use crate::codec::{subtypes, VideoCodecParameters, VideoVariant};
    use crate::engine::fake::{FakeConfig, FakePlatform};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;

    fn builder(name: &str, config: FakeConfig) -> SessionBuilder<VideoVariant> {
        let platform = Arc::new(FakePlatform::named(name).with_engine(config));
        let hooks = VideoVariant::new(VideoCodecParameters::new(CodecType::H264, 32, 16)).unwrap();
        SessionBuilder::new(platform, hooks)
    }

    struct VecDemuxer(VecDeque<Packet>);

    #[async_trait]
    impl Demuxer for VecDemuxer {
        async fn read_packet(&mut self) -> Result<Option<Packet>> {
            Ok(self.0.pop_front())
        }
    }

    #[tokio::test]
    async fn test_session_events_in_order() {
        let (handle, events) = builder("session-order", FakeConfig::video(subtypes::H264, 32, 16))
            .open()
            .await
            .unwrap();
        let mut demuxer = VecDemuxer((0..3).map(|i| Packet::new(vec![i as u8; 8]).with_pts(i)).collect());
        assert_eq!(handle.pump(&mut demuxer).await.unwrap(), 3);
        handle.close().await.unwrap();

        let events: Vec<SessionEvent> = events.collect().await;
        assert!(matches!(events.first(), Some(SessionEvent::Format { .. })));
        let pts: Vec<Option<i64>> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Frame(f) => Some(f.pts),
                _ => None,
            })
            .collect();
        assert_eq!(pts, vec![Some(0), Some(10), Some(20)]);
        assert!(matches!(events[events.len() - 2], SessionEvent::EndOfStream));
        assert!(matches!(events.last(), Some(SessionEvent::Closed)));
    }

    #[tokio::test]
    async fn test_open_failure_reported() {
        let err = builder("session-open-failure", FakeConfig::video(subtypes::HEVC, 32, 16))
            .open()
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::EngineNotFound(_)));
    }

    #[tokio::test]
    async fn test_requests_after_close_fail() {
        let (handle, _events) = builder("session-after-close", FakeConfig::video(subtypes::H264, 32, 16))
            .open()
            .await
            .unwrap();
        handle.close().await.unwrap();
        let err = handle.submit(Packet::new(vec![0u8; 4])).await.unwrap_err();
        assert!(matches!(err, BridgeError::SessionClosed));
    }

    #[tokio::test]
    async fn test_flush_and_property_round_trip() {
        let (handle, mut events) = builder("session-flush", FakeConfig::video(subtypes::H264, 32, 16))
            .open()
            .await
            .unwrap();
        handle.flush().await.unwrap();
        handle.set_property("pool", "0").await.unwrap();
        assert!(handle.set_property("copy", "7").await.is_err());
        handle.close().await.unwrap();

        let mut flushed = false;
        while let Some(event) = events.recv().await {
            flushed |= matches!(event, SessionEvent::Flushed);
        }
        assert!(flushed);
    }
}
