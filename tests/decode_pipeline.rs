#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use codecbridge::av::{CodecType, Frame, FrameFormat, MediaKind, Packet, PixelFormat, SampleFormat};
    use codecbridge::codec::{
        subtypes, AudioCodecParameters, AudioVariant, VideoCodecParameters, VideoVariant,
    };
    use codecbridge::config::{CopyMode, DecoderOptions};
    use codecbridge::engine::fake::{FakeConfig, FakeEngine, FakePlatform};
    use codecbridge::engine::runtime::active_sessions;
    use codecbridge::engine::{keys, AttrValue, CapabilityClass, Engine, MediaType, Message, SurfaceId};
    use codecbridge::transform::negotiate::{self, Commit, Direction};
    use codecbridge::transform::surface::RecycleFn;
    use codecbridge::transform::{
        DecodeSink, DecoderHooks, DriverState, NativeBuffer, NativeBufferHandle, SamplePool, SurfaceHandlePool,
        SurfacePool, TransformDriver,
    };
    use codecbridge::{BridgeError, ErrorCategory, Result};

    const WIDTH: u32 = 32;
    const HEIGHT: u32 = 16;

    #[derive(Debug, Clone)]
    enum Event {
        Open,
        Format(FrameFormat),
        Frame {
            pts: Option<i64>,
            format: FrameFormat,
        },
        EndOfStream,
        Flush,
        Close,
        Error(BridgeError),
    }

    /// Sink recording everything the driver reports.
    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        frames: Arc<Mutex<Vec<Frame>>>,
        keep_frames: bool,
        pool: Arc<Mutex<Option<SamplePool>>>,
        pool_at_change: Arc<Mutex<Vec<Option<usize>>>>,
    }

    impl Recorder {
        fn keeping_frames() -> Self {
            Self {
                keep_frames: true,
                ..Self::default()
            }
        }

        fn watch_pool(&self, pool: &SamplePool) {
            *self.pool.lock() = Some(pool.clone());
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        fn frame_pts(&self) -> Vec<Option<i64>> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Frame { pts, .. } => Some(pts),
                    _ => None,
                })
                .collect()
        }

        fn format_changes(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Format(_)))
                .count()
        }

        fn errors(&self) -> Vec<BridgeError> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Error(e) => Some(e),
                    _ => None,
                })
                .collect()
        }

        fn take_frames(&self) -> Vec<Frame> {
            std::mem::take(&mut *self.frames.lock())
        }
    }

    impl DecodeSink for Recorder {
        fn on_open(&mut self) {
            self.events.lock().push(Event::Open);
        }

        fn on_output_format_changed(&mut self, _media_type: &MediaType, format: &FrameFormat) {
            let pooled = self.pool.lock().as_ref().map(SamplePool::len);
            self.pool_at_change.lock().push(pooled);
            self.events.lock().push(Event::Format(*format));
        }

        fn on_frame(&mut self, frame: Frame) {
            self.events.lock().push(Event::Frame {
                pts: frame.pts,
                format: frame.format,
            });
            if self.keep_frames {
                self.frames.lock().push(frame);
            }
        }

        fn on_end_of_stream(&mut self) {
            self.events.lock().push(Event::EndOfStream);
        }

        fn on_flush(&mut self) {
            self.events.lock().push(Event::Flush);
        }

        fn on_close(&mut self) {
            self.events.lock().push(Event::Close);
        }

        fn on_decode_error(&mut self, error: &BridgeError) {
            self.events.lock().push(Event::Error(error.clone()));
        }
    }

    fn hooks() -> VideoVariant {
        VideoVariant::new(VideoCodecParameters::new(CodecType::H264, WIDTH, HEIGHT)).unwrap()
    }

    fn fake(name: &str, config: FakeConfig) -> Arc<FakePlatform> {
        Arc::new(FakePlatform::named(name).with_engine(config))
    }

    fn video_driver(
        platform: &Arc<FakePlatform>,
        recorder: &Recorder,
        options: DecoderOptions,
    ) -> TransformDriver<VideoVariant> {
        TransformDriver::new(platform.clone(), hooks(), Box::new(recorder.clone()), options)
    }

    /// Packet whose timestamp comes out unchanged in engine ticks.
    fn packet(pts: i64) -> Packet {
        Packet::new(vec![pts as u8 + 1; 48])
            .with_pts(pts)
            .with_time_scale(10_000_000)
            .with_key_flag(pts == 0)
    }

    fn video_width(format: &FrameFormat) -> u32 {
        format.as_video().map(|v| v.width).unwrap_or(0)
    }

    /// Video hooks that refuse every input type.
    struct RejectingHooks(VideoVariant);

    impl DecoderHooks for RejectingHooks {
        fn kind(&self) -> MediaKind {
            self.0.kind()
        }

        fn capability_class(&self) -> CapabilityClass {
            self.0.capability_class()
        }

        fn configure_input_type(&self, media_type: &mut MediaType) -> Result<()> {
            self.0.configure_input_type(media_type)
        }

        fn score_input_type(&self, _media_type: &MediaType) -> i32 {
            -1
        }

        fn score_output_type(&self, media_type: &MediaType) -> i32 {
            self.0.score_output_type(media_type)
        }

        fn on_output_format_committed(&mut self, media_type: &MediaType) -> Result<FrameFormat> {
            self.0.on_output_format_committed(media_type)
        }
    }

    /// Surface pool counting recycle callbacks.
    #[derive(Clone, Default)]
    struct CountingSurfaces {
        inner: SurfaceHandlePool,
        recycled: Arc<AtomicUsize>,
    }

    impl SurfacePool for CountingSurfaces {
        fn get_buffer(&self, id: SurfaceId, on_recycle: RecycleFn) -> NativeBufferHandle {
            let recycled = self.recycled.clone();
            self.inner.get_buffer(
                id,
                Box::new(move || {
                    recycled.fetch_add(1, Ordering::SeqCst);
                    on_recycle();
                }),
            )
        }
    }

    #[test]
    fn test_all_inputs_rejected_fails_open() {
        let h264 = MediaType::with_subtype(keys::MEDIA_TYPE_VIDEO, subtypes::H264);
        let config = FakeConfig::video(subtypes::H264, WIDTH, HEIGHT)
            .with_input_types(vec![h264.clone(), h264.clone(), h264]);
        let platform = fake("it-reject-inputs", config);
        let recorder = Recorder::default();
        let mut driver = TransformDriver::new(
            platform.clone(),
            RejectingHooks(hooks()),
            Box::new(recorder.clone()),
            DecoderOptions::new(),
        );

        let err = driver.open().unwrap_err();
        assert!(matches!(err, BridgeError::Negotiation(_)), "{:?}", err);
        assert_eq!(err.category(), ErrorCategory::Negotiation);
        assert_eq!(driver.state(), DriverState::Closed);
        assert!(platform.probe(0).unwrap().is_shut_down());
        assert_eq!(platform.activator_shutdowns(), 1);
        assert_eq!(platform.startups(), 1);
        assert_eq!(platform.shutdowns(), 1);
        assert_eq!(active_sessions("it-reject-inputs"), 0);
        assert_eq!(recorder.format_changes(), 0);
    }

    #[test]
    fn test_deferred_input_commits_after_output() {
        let platform = fake(
            "it-deferred-input",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).deferring_input(),
        );
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();

        let probe = platform.probe(0).unwrap();
        assert_eq!(
            probe.input_type().and_then(|t| t.subtype()),
            Some(subtypes::H264)
        );
        driver.submit(packet(0)).unwrap();

        let events = recorder.events();
        let first_format = events.iter().position(|e| matches!(e, Event::Format(_)));
        let first_frame = events.iter().position(|e| matches!(e, Event::Frame { .. }));
        assert_eq!(recorder.format_changes(), 1);
        assert!(first_format.unwrap() < first_frame.unwrap());
    }

    #[test]
    fn test_buffered_engine_delivers_in_order() {
        let platform = fake(
            "it-latency",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).with_latency(2, 2),
        );
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();

        for pts in 0..5 {
            driver.submit(packet(pts)).unwrap();
        }
        assert_eq!(recorder.frame_pts().len(), 3);
        driver.submit(Packet::end_of_stream()).unwrap();

        assert_eq!(
            recorder.frame_pts(),
            vec![Some(0), Some(1), Some(2), Some(3), Some(4)]
        );
        assert!(matches!(recorder.events().last(), Some(Event::EndOfStream)));
        assert_eq!(driver.state(), DriverState::Draining);

        let probe = platform.probe(0).unwrap();
        assert_eq!(probe.refusals(), 3);
        assert_eq!(probe.held(), 0);
        assert_eq!(probe.count_messages(Message::Drain), 1);
    }

    #[test]
    fn test_mid_stream_format_change() {
        let platform = fake(
            "it-format-change",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).with_format_change_after(3),
        );
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();
        recorder.watch_pool(driver.pool());

        for pts in 0..6 {
            driver.submit(packet(pts)).unwrap();
        }

        let events = recorder.events();
        let formats: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Format(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(formats.len(), 2);

        let frames_before_change = events[..formats[1]]
            .iter()
            .filter(|e| matches!(e, Event::Frame { .. }))
            .count();
        assert_eq!(frames_before_change, 3);

        let widths: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                Event::Frame { format, .. } => Some(video_width(format)),
                _ => None,
            })
            .collect();
        assert_eq!(widths, vec![WIDTH, WIDTH, WIDTH, WIDTH * 2, WIDTH * 2, WIDTH * 2]);

        // The change discarded the idle sample left by frame 3.
        assert_eq!(recorder.pool_at_change.lock().last(), Some(&Some(0)));
        assert_eq!(driver.state(), DriverState::Streaming);
        assert_eq!(platform.probe(0).unwrap().emitted(), 6);
    }

    #[test]
    fn test_shared_surface_recycled_per_frame() {
        let surface = SurfaceId::new(0x51, 0);
        let platform = fake(
            "it-surface",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).with_surface(surface),
        );
        let surfaces = CountingSurfaces::default();
        let recorder = Recorder::keeping_frames();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new())
            .with_surface_pool(Arc::new(surfaces.clone()));
        driver.open().unwrap();

        driver.submit(packet(0)).unwrap();
        driver.submit(packet(1)).unwrap();

        let mut frames = recorder.take_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.is_native() && f.planes.is_empty()));
        assert!(frames
            .iter()
            .all(|f| f.native.as_ref().map(|n| n.surface()) == Some(surface)));
        assert_eq!(surfaces.inner.outstanding(surface), 2);
        assert_eq!(surfaces.recycled.load(Ordering::SeqCst), 0);

        frames.pop();
        assert_eq!(surfaces.recycled.load(Ordering::SeqCst), 1);
        assert_eq!(surfaces.inner.outstanding(surface), 1);
        frames.clear();
        assert_eq!(surfaces.recycled.load(Ordering::SeqCst), 2);
        assert_eq!(surfaces.inner.outstanding(surface), 0);
        assert_eq!(platform.probe(0).unwrap().surface_locks(), 0);
    }

    #[test]
    fn test_surface_copy_without_pool() {
        let surface = SurfaceId::new(0x77, 1);
        let platform = fake(
            "it-surface-copy",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).with_surface(surface),
        );
        let recorder = Recorder::keeping_frames();
        let options = DecoderOptions::new().with_copy_mode(CopyMode::Always);
        let mut driver = video_driver(&platform, &recorder, options);
        driver.open().unwrap();
        driver.submit(packet(0)).unwrap();

        let frames = recorder.take_frames();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].is_native());
        assert!(!frames[0].is_mapped());
        assert_eq!(frames[0].planes.len(), 2);
        assert_eq!(platform.probe(0).unwrap().surface_locks(), 0);
    }

    #[test]
    fn test_locked_surface_stays_mapped() {
        let surface = SurfaceId::new(0x63, 0);
        let platform = fake(
            "it-surface-lock",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).with_surface(surface),
        );
        let surfaces = CountingSurfaces::default();
        let recorder = Recorder::keeping_frames();
        let options = DecoderOptions::new().with_copy_mode(CopyMode::LockSurfaces);
        let mut driver = video_driver(&platform, &recorder, options)
            .with_surface_pool(Arc::new(surfaces.clone()));
        driver.open().unwrap();
        driver.submit(packet(0)).unwrap();

        let frames = recorder.take_frames();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].is_native());
        assert!(frames[0].is_mapped());
        assert_eq!(frames[0].planes.len(), 2);
        assert_eq!(frames[0].planes[0].data[0], 1);
        assert_eq!(surfaces.inner.total_outstanding(), 0);

        let probe = platform.probe(0).unwrap();
        assert_eq!(probe.surface_locks(), 1);
        drop(frames);
        assert_eq!(probe.surface_locks(), 0);
    }

    #[test]
    fn test_zero_copy_holds_pooled_sample() {
        let platform = fake("it-zero-copy", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let recorder = Recorder::keeping_frames();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();
        driver.submit(packet(0)).unwrap();

        let frames = recorder.take_frames();
        assert!(frames[0].is_mapped());
        assert_eq!(frames[0].planes.len(), 2);
        // Only the sample lent to the final empty pull has come back.
        let before = driver.pool().recycled();
        assert_eq!(before, 1);
        assert_eq!(driver.pool().len(), 1);

        drop(frames);
        assert_eq!(driver.pool().recycled(), before + 1);
        assert_eq!(driver.pool().len(), 2);

        // Both pulls of the next packet are served from the pool.
        driver.submit(packet(1)).unwrap();
        assert_eq!(driver.pool().len(), 1);
        assert_eq!(driver.pool().recycled(), before + 2);
    }

    #[test]
    fn test_copy_mode_releases_engine_buffers() {
        let platform = fake("it-copy", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let recorder = Recorder::keeping_frames();
        let options = DecoderOptions::new().with_copy_mode(CopyMode::Always);
        let mut driver = video_driver(&platform, &recorder, options);
        driver.open().unwrap();
        driver.submit(packet(0)).unwrap();

        let frames = recorder.take_frames();
        assert!(!frames[0].is_mapped());
        assert_eq!(frames[0].planes[0].data[0], 1);
        assert_eq!(driver.pool().len(), 1);
    }

    #[test]
    fn test_flush_is_idempotent_and_marks_discontinuity() {
        let platform = fake("it-flush", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();
        driver.submit(packet(0)).unwrap();

        driver.flush().unwrap();
        driver.flush().unwrap();
        assert!(driver.is_discontinuous());
        assert_eq!(driver.state(), DriverState::Streaming);

        driver.submit(packet(1)).unwrap();
        driver.submit(packet(2)).unwrap();
        assert!(!driver.is_discontinuous());

        let probe = platform.probe(0).unwrap();
        assert_eq!(probe.count_messages(Message::Flush), 2);
        assert_eq!(probe.discontinuities(), 1);
        assert_eq!(recorder.frame_pts(), vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_flush_after_drain_restarts_streaming() {
        let platform = fake("it-flush-drain", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();
        driver.submit(packet(0)).unwrap();
        driver.submit(Packet::end_of_stream()).unwrap();
        assert_eq!(driver.state(), DriverState::Draining);

        // A second end of stream while drained is a no-op.
        driver.submit(Packet::end_of_stream()).unwrap();
        driver.flush().unwrap();
        assert_eq!(driver.state(), DriverState::Streaming);
        driver.submit(packet(1)).unwrap();

        let probe = platform.probe(0).unwrap();
        assert_eq!(probe.count_messages(Message::EndOfStream), 1);
        assert_eq!(probe.count_messages(Message::StartOfStream), 2);
        assert_eq!(recorder.frame_pts(), vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_refused_input_after_drain_is_local_error() {
        let platform = fake(
            "it-refusing",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).refusing_input(),
        );
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();

        let err = driver.submit(packet(0)).unwrap_err();
        assert!(matches!(err, BridgeError::Decode(_)));
        assert!(err.is_recoverable());
        assert_eq!(driver.state(), DriverState::Streaming);
        assert!(driver.is_discontinuous());
        assert_eq!(platform.probe(0).unwrap().refusals(), 2);
        assert_eq!(recorder.errors().len(), 1);
    }

    #[test]
    fn test_retry_follows_failed_drain() {
        let platform = fake(
            "it-retry-failed-drain",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT)
                .with_latency(2, 2)
                .with_output_failures(1),
        );
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();
        let probe = platform.probe(0).unwrap();

        driver.submit(packet(0)).unwrap();
        driver.submit(packet(1)).unwrap();

        // The drain frees nothing, so the retry is refused as well.
        let err = driver.submit(packet(2)).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(probe.refusals(), 2);
        assert!(driver.is_discontinuous());
        assert_eq!(recorder.errors().len(), 2);

        driver.submit(packet(3)).unwrap();
        assert!(!driver.is_discontinuous());
        assert_eq!(probe.discontinuities(), 1);

        driver.submit(packet(4)).unwrap();
        driver.submit(Packet::end_of_stream()).unwrap();
        assert_eq!(
            recorder.frame_pts(),
            vec![Some(0), Some(1), Some(3), Some(4)]
        );
        assert_eq!(probe.refusals(), 3);
        assert_eq!(driver.state(), DriverState::Draining);
    }

    #[test]
    fn test_handle_loss_faults_driver() {
        let platform = fake("it-handle-loss", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();
        driver.submit(packet(0)).unwrap();

        platform.probe(0).unwrap().lose_handle();
        let err = driver.submit(packet(1)).unwrap_err();
        assert!(matches!(err, BridgeError::Fatal(_)));
        assert_eq!(err.category(), ErrorCategory::Fatal);
        assert_eq!(driver.state(), DriverState::Faulted);

        assert!(matches!(driver.submit(packet(2)), Err(BridgeError::Fatal(_))));
        assert!(matches!(driver.flush(), Err(BridgeError::Fatal(_))));
        assert!(recorder.errors().is_empty());

        driver.close().unwrap();
        assert_eq!(driver.state(), DriverState::Closed);
        assert_eq!(active_sessions("it-handle-loss"), 0);
        assert!(matches!(recorder.events().last(), Some(Event::Close)));
    }

    #[test]
    fn test_output_failure_disables_pool() {
        let platform = fake(
            "it-output-failure",
            FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).with_output_failures(1),
        );
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();
        assert!(driver.is_pool_enabled());

        let err = driver.submit(packet(0)).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!driver.is_pool_enabled());

        driver.submit(packet(1)).unwrap();
        assert_eq!(recorder.frame_pts(), vec![Some(0), Some(1)]);
        // Only the rejected sample ever came back.
        assert!(driver.pool().is_empty());
        assert_eq!(driver.pool().recycled(), 1);
    }

    #[test]
    fn test_runtime_shared_between_drivers() {
        let platform = fake("it-runtime", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let mut first = video_driver(&platform, &Recorder::default(), DecoderOptions::new());
        let mut second = video_driver(&platform, &Recorder::default(), DecoderOptions::new());

        first.open().unwrap();
        second.open().unwrap();
        assert_eq!(platform.startups(), 1);
        assert_eq!(active_sessions("it-runtime"), 2);

        first.close().unwrap();
        assert_eq!(platform.shutdowns(), 0);
        second.close().unwrap();
        assert_eq!(platform.shutdowns(), 1);

        first.open().unwrap();
        assert_eq!(platform.startups(), 2);
        assert_eq!(platform.activations(), 3);
    }

    #[test]
    fn test_explicit_output_index() {
        let platform = fake("it-out-index", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let recorder = Recorder::keeping_frames();
        let options = DecoderOptions::new().with_output_type_index(2);
        let mut driver = video_driver(&platform, &recorder, options);
        driver.open().unwrap();
        assert_eq!(
            driver.output_type().and_then(|t| t.subtype()),
            Some(subtypes::IYUV)
        );

        driver.submit(packet(0)).unwrap();
        let frames = recorder.take_frames();
        let video = frames[0].format.as_video().copied().unwrap();
        assert_eq!(video.pixel_format, PixelFormat::YUV420P);
        assert_eq!(frames[0].planes.len(), 3);
        assert_eq!(frames[0].planes[1].stride, (WIDTH / 2) as usize);
    }

    #[test]
    fn test_output_index_past_offered_types() {
        let platform = fake("it-out-index-range", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let recorder = Recorder::default();
        let options = DecoderOptions::new().with_output_type_index(9);
        let mut driver = video_driver(&platform, &recorder, options);

        let err = driver.open().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Negotiation);
        assert!(err.to_string().contains("output type index 9"), "{}", err);
        assert_eq!(driver.state(), DriverState::Closed);
        assert!(platform.probe(0).unwrap().is_shut_down());
        assert_eq!(active_sessions("it-out-index-range"), 0);
    }

    /// `len` bytes starting `offset` bytes past a 64 byte boundary.
    fn bytes_at(offset: usize, len: usize) -> Bytes {
        let backing = Bytes::from(vec![7u8; len + 128]);
        let base = backing.as_ptr() as usize;
        let start = (0..64).find(|i| (base + i) % 64 == offset).unwrap();
        backing.slice(start..start + len)
    }

    #[test]
    fn test_input_follows_engine_alignment() {
        let config = FakeConfig::video(subtypes::H264, WIDTH, HEIGHT).with_alignment(64, 0);

        // A 16 byte aligned view is not enough for this engine.
        let hooks = hooks();
        let mut engine = FakeEngine::new(config.clone());
        negotiate::negotiate(&mut engine, &hooks, (0, 0), None, None).unwrap();
        let view = codecbridge::transform::bridge::build_input_sample(
            bytes_at(16, 48),
            Some(0),
            None,
            true,
            0,
            true,
        )
        .unwrap();
        assert!(engine.process_input(0, &view).is_err());

        let platform = fake("it-input-alignment", config);
        let recorder = Recorder::default();
        let mut driver = video_driver(&platform, &recorder, DecoderOptions::new());
        driver.open().unwrap();
        let packet = Packet::new(bytes_at(16, 48))
            .with_pts(0)
            .with_time_scale(10_000_000)
            .with_key_flag(true);
        driver.submit(packet).unwrap();

        assert_eq!(recorder.frame_pts(), vec![Some(0)]);
        assert!(recorder.errors().is_empty());
        assert_eq!(platform.probe(0).unwrap().accepted(), 1);
    }

    #[test]
    fn test_oversized_stream_rejected_by_engine_limits() {
        let config = FakeConfig::video(subtypes::H264, WIDTH, HEIGHT)
            .with_attribute(keys::MAX_CODED_WIDTH, AttrValue::U32(16))
            .with_attribute(keys::MAX_CODED_HEIGHT, AttrValue::U32(16));
        let platform = fake("it-max-coded", config);
        let mut driver = video_driver(&platform, &Recorder::default(), DecoderOptions::new());

        let err = driver.open().unwrap_err();
        assert!(matches!(err, BridgeError::EngineNotFound(_)));
        assert!(platform.probe(0).unwrap().is_shut_down());
    }

    #[test]
    fn test_engine_configured_for_acceleration() {
        let platform = fake("it-accel", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let mut driver = video_driver(&platform, &Recorder::default(), DecoderOptions::new());
        driver.open().unwrap();
        let probe = platform.probe(0).unwrap();
        assert_eq!(probe.attribute(keys::VIDEO_ACCELERATION), Some(AttrValue::U32(1)));
        assert_eq!(probe.attribute(keys::LOW_LATENCY_MODE), Some(AttrValue::U32(1)));
        assert_eq!(driver.engine_name(), Some("fake video decoder"));
        assert_eq!(codecbridge::engine::labels::label_or_guid(subtypes::H264), "H264");
    }

    #[test]
    fn test_recommit_is_idempotent() {
        let hooks = hooks();
        let mut engine = FakeEngine::new(FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let probe = engine.probe();
        let negotiated = negotiate::negotiate(&mut engine, &hooks, (0, 0), None, None).unwrap();

        let again = negotiate::commit(&mut engine, &hooks, Direction::Output, 0, None).unwrap();
        assert_eq!(again, Commit::Committed(negotiated.output.clone()));
        assert_eq!(engine.output_current_type(0).unwrap(), negotiated.output);
        assert!(!probe.change_pending());
        assert_eq!(probe.set_output_calls(), 2);
    }

    #[test]
    fn test_annexb_config_reaches_engine_first() {
        let platform = fake("it-annexb", FakeConfig::video(subtypes::H264, WIDTH, HEIGHT));
        let recorder = Recorder::keeping_frames();
        let variant = VideoVariant::new(
            VideoCodecParameters::new(CodecType::H264, WIDTH, HEIGHT)
                .with_annexb_config(Bytes::from_static(&[0, 0, 0, 1, 0x67])),
        )
        .unwrap();
        let mut driver = TransformDriver::new(
            platform.clone(),
            variant,
            Box::new(recorder.clone()),
            DecoderOptions::new().with_copy_mode(CopyMode::Always),
        );
        driver.open().unwrap();
        driver.submit(packet(0)).unwrap();
        driver.submit(packet(1)).unwrap();

        let frames = recorder.take_frames();
        assert_eq!(&frames[0].planes[0].data[..6], &[0, 0, 0, 1, 0x67, 1]);
        assert_eq!(frames[1].planes[0].data[0], 2);
    }

    #[test]
    fn test_audio_decode() {
        let platform = fake("it-audio", FakeConfig::audio(subtypes::AAC, 48000, 2));
        let recorder = Recorder::keeping_frames();
        let hooks =
            AudioVariant::new(AudioCodecParameters::new(CodecType::AAC, 48000, 2)).unwrap();
        let mut driver = TransformDriver::new(
            platform.clone(),
            hooks,
            Box::new(recorder.clone()),
            DecoderOptions::new(),
        );
        driver.open().unwrap();

        let probe = platform.probe(0).unwrap();
        let input = probe.input_type().unwrap();
        assert_eq!(input.attributes().u32(keys::AAC_PAYLOAD_TYPE), Some(1));
        assert_eq!(
            input.attributes().blob(keys::USER_DATA).map(|b| b.len()),
            Some(12)
        );

        driver.submit(packet(0)).unwrap();
        let frames = recorder.take_frames();
        let audio = frames[0].format.as_audio().copied().unwrap();
        assert_eq!(audio.sample_format, SampleFormat::F32);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(frames[0].samples_per_channel, 1024);
        assert_eq!(frames[0].pts, Some(0));
    }
}
