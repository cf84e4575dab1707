pub mod api_client;
pub mod audio_backend;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod debug_log;
pub mod jsonapi;
pub mod net_task;
pub mod segment;
pub mod segment_audio;
pub mod segment_cache;
pub mod status;
pub mod unlock;

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use futures::{
    future::{self, FutureExt, LocalBoxFuture},
    task::{LocalSpawn, LocalSpawnExt},
};

use self::{
    api_client::ChainApi,
    audio_backend::AudioBackend,
    clock::{Clock, PlaybackClock},
    config::EngineConfig,
    cycle::{CycleKind, CycleScheduler},
    debug_log::DebugLog,
    segment::{Chain, PlatformConfig, Segment},
    segment_audio::{ControllerContext, ControllerState, LoadState},
    segment_cache::{LoadJob, SegmentCache},
    status::{LoadProgress, PlayerState, StatusSink},
    unlock::{UnlockGate, UnlockStep},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerErrorCode {
    Generic,
    Network,
    Http(u16),
    Payload,
    InvalidSegment,
    InvalidUrl,
    Decode,
    Audio,
    ClockNotSet,
    UnlockFailed,
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerError {
    pub code: PlayerErrorCode,
    pub message: String,
}

impl PlayerError {
    pub fn new(message: String) -> PlayerError {
        Self::new_code(PlayerErrorCode::Generic, message)
    }

    pub fn new_code(code: PlayerErrorCode, message: String) -> PlayerError {
        PlayerError { code, message }
    }
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PlayerError {}

/// Everything a session talks to outside of itself.
pub struct SessionDeps<B: AudioBackend> {
    pub clock: Rc<dyn Clock>,
    pub api: Rc<dyn ChainApi>,
    pub audio: Rc<B>,
    pub status: Rc<dyn StatusSink>,
    pub spawner: Rc<dyn LocalSpawn>,
}

/// Point-in-time view of one controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSnapshot {
    pub load_state: LoadState,
    pub state: ControllerState,
    pub begin_at_time: f64,
    pub end_at_time: f64,
    pub is_playing: bool,
}

struct SessionState<B: AudioBackend> {
    state: PlayerState,
    chain: Option<Chain>,
    segments: Vec<Segment>,
    platform_config: Option<PlatformConfig>,
    origin: Option<PlaybackClock>,
    cache: SegmentCache<B>,
    cycles: CycleScheduler,
    unlock: UnlockGate<B::Source>,
    rendered: Option<(PlayerState, LoadProgress)>,
    generation: u64,
    disposed: bool,
}

struct SessionInner<B: AudioBackend> {
    config: EngineConfig,
    clock: Rc<dyn Clock>,
    api: Rc<dyn ChainApi>,
    audio: Rc<B>,
    status: Rc<dyn StatusSink>,
    spawner: Rc<dyn LocalSpawn>,
    log: DebugLog,
    state: RefCell<SessionState<B>>,
}

/// One listening session: a single audio context bound to at most one chain
/// at a time.
pub struct PlayerSession<B: AudioBackend> {
    inner: Rc<SessionInner<B>>,
}

impl<B: AudioBackend> Clone for PlayerSession<B> {
    fn clone(&self) -> Self {
        PlayerSession {
            inner: self.inner.clone(),
        }
    }
}

impl<B: AudioBackend> PlayerSession<B> {
    pub fn new(config: EngineConfig, deps: SessionDeps<B>) -> Result<Self, PlayerError> {
        config.validate()?;
        let state = SessionState {
            state: PlayerState::Standby,
            chain: None,
            segments: vec![],
            platform_config: None,
            origin: None,
            cache: SegmentCache::new(config.max_concurrent_loads),
            cycles: CycleScheduler::new(),
            unlock: UnlockGate::new(),
            rendered: None,
            generation: 0,
            disposed: false,
        };
        let session = PlayerSession {
            inner: Rc::new(SessionInner {
                log: DebugLog::with_listener(config.debug_log_capacity, deps.status.clone()),
                config,
                clock: deps.clock,
                api: deps.api,
                audio: deps.audio,
                status: deps.status,
                spawner: deps.spawner,
                state: RefCell::new(state),
            }),
        };
        session.render_status();
        Ok(session)
    }

    fn upgrade(inner: &Weak<SessionInner<B>>) -> Option<Self> {
        inner.upgrade().map(|inner| PlayerSession { inner })
    }

    /// Fixes the playback origin ahead of unlock. The origin can only be set once.
    pub fn pin_origin(&self, origin_utc_millis: i64) -> Result<(), PlayerError> {
        let mut st = self.inner.state.borrow_mut();
        if let Some(origin) = st.origin {
            return Err(PlayerError::new(format!(
                "playback origin already set to {}",
                origin.origin_utc_millis()
            )));
        }
        st.origin = Some(PlaybackClock::pinned(origin_utc_millis));
        self.inner
            .log
            .info(format!("playback origin pinned to {}", origin_utc_millis));
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.inner.log
    }

    pub fn state(&self) -> PlayerState {
        self.inner.state.borrow().state
    }

    pub fn chain(&self) -> Option<Chain> {
        self.inner.state.borrow().chain.clone()
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.inner.state.borrow().segments.clone()
    }

    pub fn platform_config(&self) -> Option<PlatformConfig> {
        self.inner.state.borrow().platform_config.clone()
    }

    pub fn origin(&self) -> Option<PlaybackClock> {
        self.inner.state.borrow().origin
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.state.borrow().unlock.is_unlocked()
    }

    pub fn unlock_probes(&self) -> usize {
        self.inner.state.borrow().unlock.probes_fired()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed
    }

    pub fn is_cycling(&self, kind: CycleKind) -> bool {
        self.inner.state.borrow().cycles.is_scheduled(kind)
    }

    fn generation(&self) -> u64 {
        self.inner.state.borrow().generation
    }

    pub fn context_time(&self, utc_millis: i64) -> Result<f64, PlayerError> {
        self.origin()
            .map(|clock| clock.context_time(utc_millis))
            .ok_or_else(|| {
                PlayerError::new_code(
                    PlayerErrorCode::ClockNotSet,
                    "playback origin is not set before unlock".to_string(),
                )
            })
    }

    pub fn controller_ids(&self) -> Vec<String> {
        self.inner.state.borrow().cache.ids()
    }

    pub fn controller_snapshot(&self, segment_id: &str) -> Option<ControllerSnapshot> {
        let st = self.inner.state.borrow();
        st.cache.get(segment_id).map(|controller| ControllerSnapshot {
            load_state: controller.load_state(),
            state: controller.state(),
            begin_at_time: controller.begin_at_time(),
            end_at_time: controller.end_at_time(),
            is_playing: controller.is_playing(&self.inner.audio),
        })
    }

    pub fn load_progress(&self) -> LoadProgress {
        self.inner.state.borrow().cache.progress()
    }

    fn ensure_usable(&self) -> Result<(), PlayerError> {
        if self.is_disposed() {
            return Err(PlayerError::new("session has been disposed".to_string()));
        }
        Ok(())
    }

    fn transition(&self, next: PlayerState) {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.state == next {
                return;
            }
            st.state = next;
        }
        self.inner.log.info(format!("state {}", next.name()));
        self.render_status();
    }

    fn render_status(&self) {
        let current = {
            let mut st = self.inner.state.borrow_mut();
            let current = (st.state, st.cache.progress());
            if st.rendered == Some(current) {
                return;
            }
            st.rendered = Some(current);
            current
        };
        self.inner.status.state_changed(current.0, current.1);
    }

    /// Binds the session to `chain_id`, tearing down whatever was playing.
    /// Resolves in `Suspend`, waiting for `unlock`.
    pub fn play(&self, chain_id: &str) -> LocalBoxFuture<'static, Result<Chain, PlayerError>> {
        let session = self.clone();
        let chain_id = chain_id.to_owned();
        async move {
            session.ensure_usable()?;
            let was_bound = session.state() != PlayerState::Standby || session.chain().is_some();
            let settle = session.stop();
            if was_bound {
                settle.await;
            }

            let generation = session.generation();
            session.inner.log.info(format!("loading chain {}", chain_id));
            let chain = match session.inner.api.chain(&chain_id).await {
                Ok(chain) => chain,
                Err(err) => {
                    session
                        .inner
                        .log
                        .error(format!("failed to load chain {}: {}", chain_id, err));
                    return Err(err);
                }
            };
            if session.generation() != generation {
                return Err(PlayerError::new(format!("play of chain {} was superseded", chain_id)));
            }

            session.inner.log.info(format!("chain {} ({}) ready", chain.name, chain.id));
            session.inner.state.borrow_mut().chain = Some(chain.clone());
            session.transition(PlayerState::Suspend);
            Ok(chain)
        }
        .boxed_local()
    }

    /// Must be called from inside a user gesture. `callback` runs once the
    /// audio context is confirmed audible; right away if it already is.
    pub fn unlock<F>(&self, callback: F) -> Result<(), PlayerError>
    where
        F: FnOnce() + 'static,
    {
        self.ensure_usable()?;
        let step = self.inner.state.borrow_mut().unlock.request(Box::new(callback));
        match step {
            UnlockStep::Ready(callback) => {
                callback();
                Ok(())
            }
            UnlockStep::Wait => Ok(()),
            UnlockStep::Failed => Err(PlayerError::new_code(
                PlayerErrorCode::UnlockFailed,
                "audio unlock already failed".to_string(),
            )),
            UnlockStep::Probe => self.fire_unlock_probe(),
        }
    }

    fn fire_unlock_probe(&self) -> Result<(), PlayerError> {
        self.inner.log.debug("unlocking audio".to_string());
        self.inner.audio.resume();
        match self.inner.audio.dry_fire() {
            Ok(probe) => self.inner.state.borrow_mut().unlock.arm(probe),
            Err(err) => {
                let err = self.inner.state.borrow_mut().unlock.fail(err.message);
                self.inner.log.error(err.to_string());
                self.inner.status.alert(&err.message);
                return Err(err);
            }
        }

        let session = self.clone();
        let settle = self.inner.clock.sleep(self.inner.config.unlock_settle());
        self.inner
            .spawner
            .spawn_local(async move {
                settle.await;
                session.confirm_unlock();
            })
            .map_err(|err| PlayerError::new(format!("failed to spawn unlock check: {}", err)))
    }

    fn confirm_unlock(&self) {
        let confirmed = self.inner.state.borrow_mut().unlock.confirm();
        let callbacks = match confirmed {
            Ok(callbacks) => callbacks,
            Err(err) => {
                self.inner.log.error(err.to_string());
                self.inner.status.alert(&err.message);
                return;
            }
        };

        let origin = {
            let mut st = self.inner.state.borrow_mut();
            *st.origin.get_or_insert_with(|| {
                PlaybackClock::anchored(
                    self.inner.clock.now_utc_millis(),
                    self.inner.audio.current_time(),
                )
            })
        };
        self.inner.log.info(format!(
            "audio unlocked, playback origin {}",
            origin.origin_utc_millis()
        ));
        for callback in callbacks {
            callback();
        }
    }

    /// Starts syncing a chain that is waiting in `Suspend`.
    pub fn resume(&self) -> Result<(), PlayerError> {
        self.ensure_usable()?;
        {
            let st = self.inner.state.borrow();
            if st.state != PlayerState::Suspend {
                self.inner
                    .log
                    .debug(format!("resume ignored in state {}", st.state.name()));
                return Ok(());
            }
            if !st.unlock.is_unlocked() {
                return Err(PlayerError::new_code(
                    PlayerErrorCode::Audio,
                    "audio has not been unlocked".to_string(),
                ));
            }
            if st.origin.is_none() {
                return Err(PlayerError::new_code(
                    PlayerErrorCode::ClockNotSet,
                    "playback origin is not set".to_string(),
                ));
            }
        }
        self.transition(PlayerState::Syncing);
        self.start_cycles()
    }

    fn start_cycles(&self) -> Result<(), PlayerError> {
        let mut st = self.inner.state.borrow_mut();

        let weak = Rc::downgrade(&self.inner);
        st.cycles.schedule(
            CycleKind::Main,
            self.inner.config.main_cycle(),
            true,
            self.inner.clock.clone(),
            &*self.inner.spawner,
            move || PlayerSession::upgrade(&weak).map(|session| session.refresh()),
        )?;

        let weak = Rc::downgrade(&self.inner);
        st.cycles.schedule(
            CycleKind::Sub,
            self.inner.config.cycle_interval(),
            false,
            self.inner.clock.clone(),
            &*self.inner.spawner,
            move || {
                let session = PlayerSession::upgrade(&weak)?;
                session.update();
                Some(future::ready(()))
            },
        )
    }

    /// One main cycle: fetch platform config until it arrives, refresh the
    /// active segment list, then update. Fetch failures are retried next cycle.
    pub fn refresh(&self) -> LocalBoxFuture<'static, ()> {
        let session = self.clone();
        async move {
            if !session.state().is_active() {
                return;
            }
            let generation = session.generation();
            let log = &session.inner.log;

            if session.platform_config().is_none() {
                match session.inner.api.config().await {
                    Ok(config) => {
                        if session.generation() != generation {
                            return;
                        }
                        log.info(format!("segment base url {}", config.segment_base_url));
                        session.inner.state.borrow_mut().platform_config = Some(config);
                    }
                    Err(err) => {
                        log.warn(format!("failed to fetch config, retrying: {}", err));
                        return;
                    }
                }
            }

            let Some(chain) = session.chain() else {
                return;
            };
            match session.inner.api.segments(&chain.id).await {
                Ok(segments) => {
                    if session.generation() != generation {
                        return;
                    }
                    log.debug(format!("{} active segments", segments.len()));
                    session.inner.state.borrow_mut().segments = segments;
                }
                Err(err) => log.warn(format!("failed to fetch segments, retrying: {}", err)),
            }
            session.update();
        }
        .boxed_local()
    }

    /// Local scheduling pass over the last known segment list.
    pub fn update(&self) {
        let jobs = {
            let mut guard = self.inner.state.borrow_mut();
            let st = &mut *guard;
            if !st.state.is_active() {
                return;
            }
            let (Some(clock), Some(platform)) = (st.origin, st.platform_config.as_ref()) else {
                return;
            };
            let ctx = ControllerContext {
                audio: &*self.inner.audio,
                clock,
                segment_base_url: &platform.segment_base_url,
                lead_seconds: self.inner.config.lead_seconds,
                log: &self.inner.log,
            };
            st.cache.reconcile(&st.segments, &ctx);
            st.cache.schedule_loaded(&ctx);
            st.cache.observe_all(ctx.audio);
            st.cache.take_ready_loads(&ctx, &self.inner.api, &self.inner.audio)
        };
        self.spawn_loads(jobs);

        let playing = {
            let st = self.inner.state.borrow();
            st.state == PlayerState::Syncing && st.cache.any_playing(&self.inner.audio)
        };
        if playing {
            self.transition(PlayerState::Playing);
        }
        self.render_status();
    }

    fn spawn_loads(&self, jobs: Vec<LoadJob<B>>) {
        for job in jobs {
            let LoadJob {
                segment_id,
                serial,
                epoch,
                future,
            } = job;
            self.inner.log.debug(format!("loading segment {}", segment_id));

            let weak = Rc::downgrade(&self.inner);
            let id = segment_id.clone();
            let task = async move {
                let result = future.await;
                if let Some(session) = PlayerSession::upgrade(&weak) {
                    session.finish_load(&id, serial, epoch, result);
                }
            };
            if let Err(err) = self.inner.spawner.spawn_local(task) {
                let err = PlayerError::new(format!("failed to spawn load: {}", err));
                self.finish_load(&segment_id, serial, epoch, Err(err));
            }
        }
    }

    fn finish_load(&self, segment_id: &str, serial: u64, epoch: u64, result: Result<B::Buffer, PlayerError>) {
        {
            let mut guard = self.inner.state.borrow_mut();
            let st = &mut *guard;
            let (Some(clock), Some(platform)) = (st.origin, st.platform_config.as_ref()) else {
                return;
            };
            let ctx = ControllerContext {
                audio: &*self.inner.audio,
                clock,
                segment_base_url: &platform.segment_base_url,
                lead_seconds: self.inner.config.lead_seconds,
                log: &self.inner.log,
            };
            if !st.cache.finish_load(segment_id, serial, epoch, result, &ctx) {
                return;
            }
        }
        self.update();
    }

    /// Tears everything down and returns to `Standby`. The returned future
    /// resolves once the stop has settled.
    pub fn stop(&self) -> LocalBoxFuture<'static, ()> {
        {
            let mut guard = self.inner.state.borrow_mut();
            let st = &mut *guard;
            st.cycles.clear();
            st.cache.clear(&self.inner.log);
            st.chain = None;
            st.segments.clear();
            st.generation += 1;
        }
        self.transition(PlayerState::Standby);
        self.inner.log.debug("stopped".to_string());
        self.inner.clock.sleep(self.inner.config.stop_settle())
    }

    /// Stops and releases the audio context. The session is unusable afterwards.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        drop(self.stop());
        self.inner.audio.close();
        self.inner.state.borrow_mut().disposed = true;
        self.inner.log.info("session disposed".to_string());
    }
}
