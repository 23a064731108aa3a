//! Playback controller.
//!
//! Owns one session at a time: a frame producer task connected through a credit
//! channel, the [`FrameQueue`] fed by it, the [`PacingScheduler`] draining it into the
//! render sink, and for adaptive sources the [`SegmentPrefetchQueue`] the producer pulls
//! its input from.
//!
//! The controller is driven from the outside by [`PlaybackController::tick`] (display
//! refresh) or by its own [`PlaybackController::run`] loop. Both must be used from
//! within a Tokio runtime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use stream_playback_segments::{
    Fetcher, HlsManifestParser, ManifestParser, PrefetchParams, ProgressCallback,
    SegmentPrefetchQueue, SegmentSettings,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::credit::{CreditSender, ProducerEvent, ProducerEvents, ProducerHandle, credit_channel};
use crate::error::{PlaybackError, PlaybackResult, ProducerFailure};
use crate::frame_queue::{FrameQueue, QueueItem, Take};
use crate::scheduler::{
    PacingScheduler, SchedulerState, StartOutcome, StepOutcome, StopReason, TickOutcome,
};
use crate::settings::PlaybackSettings;
use crate::stats::{BitrateMeter, FpsMeter};
use crate::traits::{FrameProducer, RenderSink};
use crate::types::{
    DecodeSource, FrameStats, MediaSource, MetadataUpdate, PlayOptions, PlaybackStatus,
    PlayerEvent, RenditionInfo, TrackMetadata,
};

struct Session {
    source: MediaSource,
    options: PlayOptions,
    queue: FrameQueue<CreditSender>,
    events: ProducerEvents,
    producer: JoinHandle<()>,
    prefetch: Option<SegmentPrefetchQueue>,
}

// Render sink plus the measurements taken on every displayed frame.
struct Presenter {
    sink: Box<dyn RenderSink>,
    fps: FpsMeter,
    bitrate: BitrateMeter,
    last_bitrate: Option<f64>,
}

impl Presenter {
    fn reset(&mut self, fps: f64) {
        self.fps.reset();
        self.bitrate.start(fps);
        self.last_bitrate = None;
    }

    fn step(
        &mut self,
        now: Instant,
        status: PlaybackStatus,
        queue: &mut FrameQueue<CreditSender>,
        events: &broadcast::Sender<PlayerEvent>,
    ) -> StepOutcome {
        if status != PlaybackStatus::Playing {
            return StepOutcome::NotPlaying;
        }

        let underruns = queue.underruns();
        match queue.take() {
            Take::Frame(frame) => {
                self.sink.display(&frame);

                if let Some(extra) = &frame.extra {
                    if let Some(bitrate) = self.bitrate.add_frame(extra).intra_period {
                        self.last_bitrate = Some(bitrate);
                    }
                }
                if let Some(fps) = self.fps.add_frame(now) {
                    let _ = events.send(PlayerEvent::Stats(FrameStats {
                        fps,
                        bitrate: self.last_bitrate,
                        target_depth: queue.target_depth(),
                    }));
                }

                queue.release(frame);
                StepOutcome::Displayed
            }
            Take::EndOfStream => StepOutcome::EndOfStream,
            Take::Buffering => {
                if queue.underruns() > underruns {
                    let _ = events.send(PlayerEvent::Buffering {
                        target_depth: queue.target_depth(),
                    });
                }
                StepOutcome::Buffering
            }
        }
    }
}

/// Public play / pause / resume / stop lifecycle over the playback pipeline.
pub struct PlaybackController {
    settings: PlaybackSettings,
    producer: Arc<dyn FrameProducer>,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn ManifestParser>,
    events: broadcast::Sender<PlayerEvent>,

    status: PlaybackStatus,
    scheduler: PacingScheduler,
    presenter: Presenter,
    session: Option<Session>,
    // Producer tasks of finished sessions that may still be winding down.
    retired: Vec<JoinHandle<()>>,

    track: TrackMetadata,
    manifest_duration: Option<Duration>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("status", &self.status)
            .field("scheduler", &self.scheduler)
            .field("source", &self.session.as_ref().map(|s| &s.source))
            .field("retired", &self.retired.len())
            .field("track", &self.track)
            .finish()
    }
}

impl PlaybackController {
    /// Create a controller. Manifests are parsed as HLS unless another parser is set
    /// with [`with_manifest_parser`](Self::with_manifest_parser).
    pub fn new(
        settings: PlaybackSettings,
        producer: Arc<dyn FrameProducer>,
        sink: Box<dyn RenderSink>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_channel_capacity.max(1));
        Self {
            scheduler: PacingScheduler::from_settings(&settings),
            presenter: Presenter {
                sink,
                fps: FpsMeter::new(),
                bitrate: BitrateMeter::new(settings.default_fps),
                last_bitrate: None,
            },
            settings,
            producer,
            fetcher,
            parser: Arc::new(HlsManifestParser),
            events,
            status: PlaybackStatus::Stopped,
            session: None,
            retired: Vec::new(),
            track: TrackMetadata::default(),
            manifest_duration: None,
        }
    }

    pub fn with_manifest_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.parser = parser;
        self
    }

    // ----------------------------
    // Introspection
    // ----------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn target_fps(&self) -> f64 {
        self.scheduler.target_fps()
    }

    /// Current adaptive depth of the frame queue, while a session exists.
    /// Producer tasks of ended sessions still awaiting exit. Finished ones are dropped
    /// whenever another session ends.
    pub fn retired_producers(&self) -> usize {
        self.retired.len()
    }

    pub fn target_depth(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.queue.target_depth())
    }

    pub fn queued_frames(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.queue.len())
    }

    pub fn metadata(&self) -> MetadataUpdate {
        MetadataUpdate {
            duration: self.duration(),
            frame_rate: self.track.frame_rate,
            num_frames: self.track.num_frames,
            track_width: self.track.width,
            track_height: self.track.height,
        }
    }

    /// Renditions of the current adaptive source, ascending by bandwidth.
    pub fn renditions(&self) -> Vec<RenditionInfo> {
        let Some(prefetch) = self.session.as_ref().and_then(|s| s.prefetch.as_ref()) else {
            return Vec::new();
        };
        prefetch
            .renditions()
            .iter()
            .map(|r| RenditionInfo {
                index: r.index,
                bandwidth: r.bandwidth,
                resolution: r.resolution,
                name: r.name.clone(),
            })
            .collect()
    }

    pub fn active_rendition(&self) -> Option<usize> {
        self.session
            .as_ref()
            .and_then(|s| s.prefetch.as_ref())
            .map(SegmentPrefetchQueue::active_rendition)
    }

    // ----------------------------
    // Lifecycle
    // ----------------------------

    /// Start a new session for `source`.
    ///
    /// Any current session is stopped first. If its producer does not exit within
    /// `session_exit_timeout` the request is refused with
    /// [`PlaybackError::PreviousSessionRunning`].
    #[instrument(skip(self, source), fields(uri = %source.uri()))]
    pub async fn play(&mut self, source: MediaSource, options: PlayOptions) -> PlaybackResult<()> {
        self.stop();
        self.await_retired().await?;

        self.track = TrackMetadata::default();
        self.manifest_duration = None;
        self.presenter.reset(self.settings.default_fps);
        self.scheduler = PacingScheduler::from_settings(&self.settings);

        let prefetch = match &source {
            MediaSource::File(_) => None,
            MediaSource::Manifest(uri) => match Self::open_manifest(
                Arc::clone(&self.fetcher),
                Arc::clone(&self.parser),
                self.settings.segments.clone(),
                self.progress_callback(),
                uri.clone(),
                options.rendition,
            )
            .await
            {
                Ok(prefetch) => Some(prefetch),
                Err(e) => {
                    error!("PlaybackController: failed to open manifest: {}", e);
                    self.emit(PlayerEvent::Error(e.to_string()));
                    return Err(e);
                }
            },
        };
        if let Some(prefetch) = &prefetch {
            self.manifest_duration = Some(prefetch.duration());
            self.emit(PlayerEvent::RenditionChanged {
                index: prefetch.active_rendition(),
            });
            self.publish_metadata();
        }

        let (sender, events, handle) = credit_channel();
        let decode = self.decode_source(&source, prefetch.as_ref());
        let producer = self.spawn_producer(decode, handle);

        let mut queue = FrameQueue::new(sender, &self.settings);
        queue.start();
        self.session = Some(Session {
            source,
            options,
            queue,
            events,
            producer,
            prefetch,
        });

        self.set_status(PlaybackStatus::Playing);
        let start = self.scheduler.start(Some(self.settings.default_fps));
        self.after_start(start, Instant::now());
        info!("PlaybackController: playing");
        Ok(())
    }

    /// Keep the session but stop displaying frames.
    pub fn pause(&mut self) -> PlaybackResult<()> {
        if self.status != PlaybackStatus::Playing {
            return Err(PlaybackError::InvalidState("pause requires a playing session"));
        }
        self.set_status(PlaybackStatus::Paused);
        Ok(())
    }

    /// Resume a paused session. Buffering restarts and pacing re-pins on the next frame.
    pub fn resume(&mut self) -> PlaybackResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(PlaybackError::InvalidState("no session to resume"));
        };
        if self.status != PlaybackStatus::Paused {
            return Err(PlaybackError::InvalidState("resume requires a paused session"));
        }

        session.queue.start();
        self.set_status(PlaybackStatus::Playing);
        let start = self.scheduler.start(None);
        self.after_start(start, Instant::now());
        Ok(())
    }

    /// End the session: the producer is asked to stop, the sink is cleared and every
    /// queued frame is released.
    pub fn stop(&mut self) {
        self.scheduler.stop();

        if let Some(mut session) = self.session.take() {
            session.queue.link().request_stop();
            self.presenter.sink.clear();
            let released = session.queue.clear(false);
            if let Some(prefetch) = &session.prefetch {
                prefetch.cancel();
            }
            debug!(released, "PlaybackController: session stopped");
            self.retire(session.producer);
        }

        self.set_status(PlaybackStatus::Stopped);
    }

    /// Switch the rendition of the adaptive source for all following segments.
    ///
    /// `None` restores the configured default.
    pub fn set_rendition(&mut self, rendition: Option<usize>) -> PlaybackResult<usize> {
        let Some(prefetch) = self.session.as_ref().and_then(|s| s.prefetch.as_ref()) else {
            return Err(PlaybackError::InvalidState("current source has no renditions"));
        };
        let index = prefetch.set_rendition(rendition);
        self.emit(PlayerEvent::RenditionChanged { index });
        Ok(index)
    }

    // ----------------------------
    // Driving
    // ----------------------------

    /// One display tick: drain producer events, then let the scheduler decide whether
    /// a frame is due.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        self.pump_events(now);

        let Some(session) = self.session.as_mut() else {
            return TickOutcome::NotScheduled;
        };
        let status = self.status;
        let presenter = &mut self.presenter;
        let events = &self.events;
        let outcome = self
            .scheduler
            .on_tick(now, || presenter.step(now, status, &mut session.queue, events));

        self.after_step(outcome);
        outcome
    }

    /// Drive [`tick`](Self::tick) from a `tick_interval` timer until `cancel` fires or
    /// the session ends.
    pub async fn run(&mut self, cancel: CancellationToken) -> PlaybackResult<()> {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!("PlaybackController: run cancelled");
                    return Ok(());
                }
                instant = interval.tick() => {
                    self.tick(instant.into_std());
                }
            }

            if self.session.is_none() {
                return Ok(());
            }
        }
    }

    // ----------------------------
    // Internals
    // ----------------------------

    // Owned arguments: the `play` future must not hold `&self` across this await.
    async fn open_manifest(
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn ManifestParser>,
        settings: SegmentSettings,
        progress: ProgressCallback,
        uri: String,
        rendition: Option<usize>,
    ) -> PlaybackResult<SegmentPrefetchQueue> {
        let text = fetcher
            .fetch(&uri, None)
            .await
            .map_err(|e| e.for_uri(&uri))?;
        let manifest = parser.parse(&text, &uri, fetcher.as_ref()).await?;
        debug!(
            renditions = manifest.renditions.len(),
            "PlaybackController: manifest parsed"
        );

        let params = PrefetchParams::new(manifest, fetcher)
            .settings(settings)
            .progress(Some(progress));
        let prefetch = SegmentPrefetchQueue::new(params)?;
        prefetch.start(rendition);
        Ok(prefetch)
    }

    fn progress_callback(&self) -> ProgressCallback {
        let events = self.events.clone();
        Arc::new(move |progress| {
            let _ = events.send(PlayerEvent::DownloadProgress(progress));
        })
    }

    fn decode_source(
        &self,
        source: &MediaSource,
        prefetch: Option<&SegmentPrefetchQueue>,
    ) -> DecodeSource {
        match prefetch {
            Some(prefetch) => DecodeSource::Segmented(prefetch.clone()),
            None => DecodeSource::File {
                uri: source.uri().to_string(),
                fetcher: Arc::clone(&self.fetcher),
            },
        }
    }

    fn spawn_producer(&self, decode: DecodeSource, mut handle: ProducerHandle) -> JoinHandle<()> {
        let producer = Arc::clone(&self.producer);
        tokio::spawn(async move {
            if let Err(failure) = producer.run(decode, &mut handle).await {
                let _ = handle.fail(failure);
            }
            // Dropping the handle signals end of stream and exit.
        })
    }

    fn retire(&mut self, producer: JoinHandle<()>) {
        self.retired.retain(|h| !h.is_finished());
        self.retired.push(producer);
    }

    async fn await_retired(&mut self) -> PlaybackResult<()> {
        self.retired.retain(|h| !h.is_finished());
        if self.retired.is_empty() {
            return Ok(());
        }

        let waited = self.settings.session_exit_timeout;
        let retired = &mut self.retired;
        let all_exited = async move {
            for handle in retired.iter_mut() {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(waited, all_exited).await {
            Ok(()) => {
                self.retired.clear();
                Ok(())
            }
            Err(_) => {
                self.retired.retain(|h| !h.is_finished());
                error!(
                    ?waited,
                    "PlaybackController: previous producer did not exit, refusing to play"
                );
                let err = PlaybackError::PreviousSessionRunning { waited };
                self.emit(PlayerEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    fn pump_events(&mut self, now: Instant) {
        loop {
            let Some(event) = self.session.as_mut().and_then(|s| s.events.try_next()) else {
                return;
            };
            self.handle_event(event, now);
        }
    }

    fn handle_event(&mut self, event: ProducerEvent, now: Instant) {
        match event {
            ProducerEvent::Started => debug!("PlaybackController: producer started"),
            ProducerEvent::Metadata(metadata) => self.on_metadata(metadata, now),
            ProducerEvent::Frame(frame) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if self.status == PlaybackStatus::Stopped {
                    session.queue.release(frame);
                    return;
                }
                session.queue.push(QueueItem::Frame(frame));
                self.step_unpaced(now);
            }
            ProducerEvent::EndOfStream => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                trace!("PlaybackController: producer reached end of stream");
                session.queue.push(QueueItem::EndOfStream);
                // Nothing else will arrive to trigger display of what is left.
                while self.step_unpaced(now) == TickOutcome::Displayed {}
            }
            ProducerEvent::DownloadProgress(progress) => {
                self.emit(PlayerEvent::DownloadProgress(progress));
            }
            ProducerEvent::Failed(failure) => self.on_failure(failure),
            ProducerEvent::Exited => trace!("PlaybackController: producer exited"),
        }
    }

    fn on_metadata(&mut self, metadata: TrackMetadata, now: Instant) {
        self.track.merge(&metadata);
        if let Some(fps) = metadata.frame_rate {
            self.presenter.bitrate.set_target_fps(fps);
            let start = self.scheduler.start(Some(fps));
            if self.status == PlaybackStatus::Playing {
                self.after_start(start, now);
            }
        }
        self.publish_metadata();
    }

    fn on_failure(&mut self, failure: ProducerFailure) {
        let tolerance = self.settings.trailing_edge_tolerance;
        let at_trailing_edge = matches!(failure, ProducerFailure::Input(_))
            && self
                .session
                .as_ref()
                .and_then(|s| s.prefetch.as_ref())
                .is_some_and(|p| p.is_trailing_edge(tolerance));

        if at_trailing_edge {
            // End of stream follows from the exiting producer.
            warn!(
                "PlaybackController: ignoring failure of the last segment: {}",
                failure
            );
            return;
        }

        error!("PlaybackController: producer failed: {}", failure);
        self.emit(PlayerEvent::Error(failure.to_string()));
        self.stop();
    }

    // Display step on frame arrival when pacing is disabled.
    fn step_unpaced(&mut self, now: Instant) -> TickOutcome {
        if !self.scheduler.ignores_target_fps() {
            return TickOutcome::NotScheduled;
        }
        let Some(session) = self.session.as_mut() else {
            return TickOutcome::NotScheduled;
        };
        let status = self.status;
        let presenter = &mut self.presenter;
        let events = &self.events;
        let outcome = self
            .scheduler
            .step_now(now, || presenter.step(now, status, &mut session.queue, events));
        self.after_step(outcome);
        outcome
    }

    fn after_start(&mut self, start: StartOutcome, now: Instant) {
        if start == StartOutcome::RunImmediately {
            self.step_unpaced(now);
        }
    }

    fn after_step(&mut self, outcome: TickOutcome) {
        if outcome == TickOutcome::Stopped(StopReason::EndOfStream) {
            self.on_end_of_stream();
        }
    }

    fn on_end_of_stream(&mut self) {
        let looping = self.session.as_ref().is_some_and(|s| s.options.looping);
        if looping {
            self.restart_session();
            return;
        }

        info!("PlaybackController: end of stream");
        if let Some(session) = self.session.take() {
            self.retire(session.producer);
        }
        self.presenter.sink.clear();
        self.set_status(PlaybackStatus::Stopped);
        self.emit(PlayerEvent::EndOfStream);
    }

    // Loop: rewind to index 0 of the same rendition with a fresh producer. The
    // manifest is not fetched again and the adaptive queue depth is kept.
    fn restart_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        let (sender, events, handle) = credit_channel();
        let previous = session.queue.reconnect(sender);
        previous.request_stop();
        self.retire(session.producer);

        if let Some(prefetch) = &session.prefetch {
            prefetch.restart();
        }
        let decode = self.decode_source(&session.source, session.prefetch.as_ref());
        session.producer = self.spawn_producer(decode, handle);
        session.events = events;
        session.queue.start();
        self.session = Some(session);

        debug!("PlaybackController: looping");
        self.emit(PlayerEvent::Looped);
        let start = self.scheduler.start(Some(self.scheduler.target_fps()));
        self.after_start(start, Instant::now());
    }

    fn duration(&self) -> Option<Duration> {
        match (self.manifest_duration, self.track.duration) {
            (Some(manifest), Some(container)) if manifest >= container => Some(manifest),
            (_, Some(container)) => Some(container),
            (manifest, None) => manifest,
        }
    }

    fn publish_metadata(&self) {
        self.emit(PlayerEvent::Metadata(self.metadata()));
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if self.status != status {
            self.status = status;
            self.emit(PlayerEvent::StatusChanged(status));
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.queue.link().request_stop();
        }
    }
}
