use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use url::Url;

use super::{
    api_client::ChainApi,
    audio_backend::{AudioBackend, ContextState, ScheduledSource},
    clock::PlaybackClock,
    debug_log::DebugLog,
    segment::{waveform_url, Segment},
    PlayerError,
};

/// Forward-only lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ControllerState {
    Standby,
    Syncing,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Waiting for a load slot.
    Queued,
    Loading,
    /// Decoded but not yet handed to the audio graph.
    Loaded,
    Scheduled,
    InvalidUrl,
    Skipped,
    Failed,
    Stopped,
}

impl LoadState {
    /// Terminal states in which the controller never produces audio.
    pub fn is_inert(&self) -> bool {
        matches!(
            self,
            LoadState::InvalidUrl | LoadState::Skipped | LoadState::Failed | LoadState::Stopped
        )
    }
}

/// What a controller needs from its session while it is being driven.
pub struct ControllerContext<'a, B: AudioBackend> {
    pub audio: &'a B,
    pub clock: PlaybackClock,
    pub segment_base_url: &'a Url,
    pub lead_seconds: f64,
    pub log: &'a DebugLog,
}

pub type LoadFuture<B> = LocalBoxFuture<'static, Result<<B as AudioBackend>::Buffer, PlayerError>>;

/// Owns the audio of exactly one segment: at most one fetch and decode, and
/// at most one scheduled source.
pub struct SegmentAudioController<B: AudioBackend> {
    segment: Segment,
    serial: u64,
    begin_at_time: f64,
    end_at_time: f64,
    url: Option<Url>,
    buffer: Option<B::Buffer>,
    source: Option<B::Source>,
    load_state: LoadState,
    state: ControllerState,
}

impl<B: AudioBackend> SegmentAudioController<B> {
    pub fn new(ctx: &ControllerContext<B>, segment: Segment, serial: u64) -> Self {
        let mut controller = SegmentAudioController {
            begin_at_time: ctx.clock.context_time(segment.begin_at_millis),
            end_at_time: ctx.clock.context_time(segment.end_at_millis),
            segment,
            serial,
            url: None,
            buffer: None,
            source: None,
            load_state: LoadState::Queued,
            state: ControllerState::Standby,
        };

        match waveform_url(ctx.segment_base_url, &controller.segment.waveform_key) {
            Ok(url) => controller.url = Some(url),
            Err(err) => {
                ctx.log.error(format!(
                    "segment {} has an invalid waveform url: {}",
                    controller.segment.id, err
                ));
                controller.load_state = LoadState::InvalidUrl;
                return controller;
            }
        }

        if ctx.audio.state() != ContextState::Running {
            ctx.log.warn(format!(
                "segment {} skipped: audio context is not running",
                controller.segment.id
            ));
            controller.load_state = LoadState::Skipped;
        } else if !controller.is_future_enough(ctx.audio.current_time(), ctx.lead_seconds) {
            controller.skip_late(ctx);
        }
        controller
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn id(&self) -> &str {
        &self.segment.id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn begin_at_time(&self) -> f64 {
        self.begin_at_time
    }

    pub fn end_at_time(&self) -> f64 {
        self.end_at_time
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_future_enough(&self, now: f64, lead_seconds: f64) -> bool {
        self.begin_at_time > now + lead_seconds
    }

    pub fn wants_load(&self) -> bool {
        self.load_state == LoadState::Queued
    }

    /// Moves a queued controller to `Loading` and returns the fetch and
    /// decode work. Returns `None` for every other state, so a segment is
    /// loaded at most once. A controller whose lead window passed while it
    /// waited for a slot is skipped without fetching.
    pub fn begin_load(
        &mut self,
        ctx: &ControllerContext<B>,
        api: Rc<dyn ChainApi>,
        audio: Rc<B>,
    ) -> Option<LoadFuture<B>> {
        if !self.wants_load() {
            return None;
        }
        if !self.is_future_enough(ctx.audio.current_time(), ctx.lead_seconds) {
            self.skip_late(ctx);
            return None;
        }
        let url = self.url.clone()?;
        self.load_state = LoadState::Loading;
        Some(
            async move {
                let bytes = api.waveform(&url).await?;
                audio.decode(bytes).await
            }
            .boxed_local(),
        )
    }

    /// Stores the outcome of the load started by `begin_load` and schedules
    /// the buffer right away. Failures leave the controller inert.
    pub fn finish_load(&mut self, result: Result<B::Buffer, PlayerError>, ctx: &ControllerContext<B>) {
        if self.load_state != LoadState::Loading {
            return;
        }
        match result {
            Ok(buffer) => {
                ctx.log.debug(format!("segment {} decoded", self.segment.id));
                self.buffer = Some(buffer);
                self.load_state = LoadState::Loaded;
                self.play_web_audio(ctx);
            }
            Err(err) => {
                ctx.log.error(format!("segment {} failed to load: {}", self.segment.id, err));
                self.load_state = LoadState::Failed;
            }
        }
    }

    /// Hands the decoded buffer to the audio graph at `begin_at_time`.
    pub fn play_web_audio(&mut self, ctx: &ControllerContext<B>) -> bool {
        if self.load_state != LoadState::Loaded {
            return false;
        }
        let Some(buffer) = self.buffer.take() else {
            return false;
        };
        if !self.is_future_enough(ctx.audio.current_time(), ctx.lead_seconds) {
            self.skip_late(ctx);
            return false;
        }
        match ctx.audio.schedule_once(&buffer, self.begin_at_time) {
            Ok(source) => {
                ctx.log.info(format!(
                    "segment {} scheduled at {:.3}s until {:.3}s",
                    self.segment.id, self.begin_at_time, self.end_at_time
                ));
                self.source = Some(source);
                self.load_state = LoadState::Scheduled;
                self.advance(ControllerState::Syncing);
                true
            }
            Err(err) => {
                ctx.log.error(format!("segment {} failed to schedule: {}", self.segment.id, err));
                self.load_state = LoadState::Failed;
                false
            }
        }
    }

    fn skip_late(&mut self, ctx: &ControllerContext<B>) {
        ctx.log.info(format!(
            "segment {} skipped: begins at {:.3}s, less than {}s after {:.3}s",
            self.segment.id,
            self.begin_at_time,
            ctx.lead_seconds,
            ctx.audio.current_time()
        ));
        self.load_state = LoadState::Skipped;
    }

    pub fn should_be_playing_at(&self, time: f64) -> bool {
        self.begin_at_time <= time && time < self.end_at_time
    }

    pub fn should_be_playing(&self, audio: &B) -> bool {
        self.should_be_playing_at(audio.current_time())
    }

    pub fn is_playing(&self, audio: &B) -> bool {
        self.load_state == LoadState::Scheduled
            && self.source.is_some()
            && self.should_be_playing(audio)
    }

    /// Advances the lifecycle from the current audio clock.
    pub fn observe(&mut self, audio: &B) {
        if self.is_playing(audio) {
            self.advance(ControllerState::Playing);
        }
    }

    fn advance(&mut self, next: ControllerState) {
        if next > self.state {
            self.state = next;
        }
    }

    /// Idempotent; a source that already stopped is not an error.
    pub fn stop_web_audio(&mut self, log: &DebugLog) {
        if let Some(source) = &self.source {
            if let Err(err) = source.stop() {
                log.debug(format!("segment {} source already stopped: {}", self.segment.id, err));
            }
        }
        if !self.load_state.is_inert() {
            self.load_state = LoadState::Stopped;
        }
    }

    pub fn destroy(&mut self, log: &DebugLog) {
        self.stop_web_audio(log);
        self.buffer = None;
        log.debug(format!("segment {} destroyed", self.segment.id));
    }
}
