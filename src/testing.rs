//! Deterministic stand-ins for the browser: a manually advanced clock, an
//! audio backend whose context time follows that clock, a scripted API and a
//! status sink that records everything it is told.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use futures::{
    channel::oneshot,
    executor::LocalPool,
    future::{self, FutureExt, LocalBoxFuture},
};
use fxhash::{FxHashMap, FxHashSet};
use url::Url;

use crate::player::{
    api_client::ChainApi,
    audio_backend::{AudioBackend, ContextState, ScheduledSource},
    clock::Clock,
    config::EngineConfig,
    debug_log::LogEntry,
    segment::{Chain, PlatformConfig, Segment},
    status::{LoadProgress, PlayerState, StatusSink},
    PlayerError, PlayerErrorCode, PlayerSession, SessionDeps,
};

struct Timer {
    deadline: i64,
    wake: oneshot::Sender<()>,
}

/// UTC clock that only moves when told to. Sleeps resolve once `advance`
/// carries the clock past their deadline.
pub struct ManualClock {
    now: Cell<i64>,
    timers: RefCell<Vec<Timer>>,
}

impl ManualClock {
    pub fn new(now_utc_millis: i64) -> ManualClock {
        ManualClock {
            now: Cell::new(now_utc_millis),
            timers: RefCell::new(vec![]),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.set(self.now.get() + millis);
        let now = self.now.get();
        let due = {
            let mut timers = self.timers.borrow_mut();
            let (due, rest): (Vec<Timer>, Vec<Timer>) =
                timers.drain(..).partition(|timer| timer.deadline <= now);
            *timers = rest;
            due
        };
        for timer in due {
            let _ = timer.wake.send(());
        }
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }
}

impl Clock for ManualClock {
    fn now_utc_millis(&self) -> i64 {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let millis = duration.as_millis() as i64;
        if millis == 0 {
            return future::ready(()).boxed_local();
        }
        let (wake, wait) = oneshot::channel();
        self.timers.borrow_mut().push(Timer {
            deadline: self.now.get() + millis,
            wake,
        });
        async move {
            let _ = wait.await;
        }
        .boxed_local()
    }
}

struct Timeline {
    clock: Rc<ManualClock>,
    created_at: i64,
    state: Cell<ContextState>,
}

impl Timeline {
    fn current_time(&self) -> f64 {
        (self.clock.now_utc_millis() - self.created_at) as f64 / 1000.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeBuffer {
    pub label: String,
    pub duration: f64,
}

struct SourceState {
    when: f64,
    duration: f64,
    stopped: Cell<bool>,
}

pub struct FakeSource {
    state: Rc<SourceState>,
    timeline: Rc<Timeline>,
}

impl ScheduledSource for FakeSource {
    fn has_played(&self) -> bool {
        self.timeline.state.get() == ContextState::Running
            && !self.state.stopped.get()
            && self.timeline.current_time() >= self.state.when + self.state.duration
    }

    fn stop(&self) -> Result<(), PlayerError> {
        if self.state.stopped.replace(true) {
            return Err(PlayerError::new_code(
                PlayerErrorCode::Audio,
                "InvalidStateError: source already stopped".to_string(),
            ));
        }
        Ok(())
    }
}

/// One `schedule_once` call as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledPlay {
    pub label: String,
    pub when: f64,
    pub stopped: bool,
}

/// Audio context whose time is the manual clock's time since construction.
pub struct FakeAudioBackend {
    timeline: Rc<Timeline>,
    autoplay_blocked: Cell<bool>,
    dry_fires: Cell<usize>,
    scheduled: RefCell<Vec<(String, Rc<SourceState>)>>,
}

impl FakeAudioBackend {
    pub fn new(clock: Rc<ManualClock>) -> FakeAudioBackend {
        FakeAudioBackend {
            timeline: Rc::new(Timeline {
                created_at: clock.now_utc_millis(),
                clock,
                state: Cell::new(ContextState::Suspended),
            }),
            autoplay_blocked: Cell::new(false),
            dry_fires: Cell::new(0),
            scheduled: RefCell::new(vec![]),
        }
    }

    /// Makes `resume` a no-op, as a browser does outside a user gesture.
    pub fn block_autoplay(&self) {
        self.autoplay_blocked.set(true);
    }

    pub fn dry_fires(&self) -> usize {
        self.dry_fires.get()
    }

    pub fn scheduled(&self) -> Vec<ScheduledPlay> {
        self.scheduled
            .borrow()
            .iter()
            .map(|(label, source)| ScheduledPlay {
                label: label.clone(),
                when: source.when,
                stopped: source.stopped.get(),
            })
            .collect()
    }

    pub fn scheduled_labels(&self) -> Vec<String> {
        self.scheduled().into_iter().map(|play| play.label).collect()
    }

    fn start(&self, label: String, when: f64, duration: f64) -> Result<FakeSource, PlayerError> {
        if self.timeline.state.get() == ContextState::Closed {
            return Err(PlayerError::new_code(
                PlayerErrorCode::Audio,
                "InvalidStateError: context is closed".to_string(),
            ));
        }
        let state = Rc::new(SourceState {
            when,
            duration,
            stopped: Cell::new(false),
        });
        self.scheduled.borrow_mut().push((label, state.clone()));
        Ok(FakeSource {
            state,
            timeline: self.timeline.clone(),
        })
    }
}

impl AudioBackend for FakeAudioBackend {
    type Buffer = FakeBuffer;
    type Source = FakeSource;

    fn current_time(&self) -> f64 {
        self.timeline.current_time()
    }

    fn state(&self) -> ContextState {
        self.timeline.state.get()
    }

    fn resume(&self) {
        if !self.autoplay_blocked.get() && self.state() == ContextState::Suspended {
            self.timeline.state.set(ContextState::Running);
        }
    }

    fn close(&self) {
        self.timeline.state.set(ContextState::Closed);
    }

    fn decode(&self, bytes: Vec<u8>) -> LocalBoxFuture<'static, Result<FakeBuffer, PlayerError>> {
        let label = String::from_utf8_lossy(&bytes).into_owned();
        let result = if label.contains("corrupt") {
            Err(PlayerError::new_code(
                PlayerErrorCode::Decode,
                format!("EncodingError: unable to decode {}", label),
            ))
        } else {
            Ok(FakeBuffer {
                label,
                duration: 4.0,
            })
        };
        future::ready(result).boxed_local()
    }

    fn schedule_once(&self, buffer: &FakeBuffer, when: f64) -> Result<FakeSource, PlayerError> {
        self.start(buffer.label.clone(), when, buffer.duration)
    }

    fn dry_fire(&self) -> Result<FakeSource, PlayerError> {
        self.dry_fires.set(self.dry_fires.get() + 1);
        self.start("dry-fire".to_string(), self.current_time(), 1.0 / 22050.0)
    }
}

/// Scripted backend API with call counters.
pub struct StaticApi {
    config: RefCell<Result<PlatformConfig, PlayerError>>,
    chains: RefCell<FxHashMap<String, Chain>>,
    segments: RefCell<Result<Vec<Segment>, PlayerError>>,
    failing_waveforms: RefCell<FxHashSet<String>>,
    held: Cell<bool>,
    held_waveforms: RefCell<Vec<oneshot::Sender<()>>>,
    pub config_calls: Cell<usize>,
    pub chain_calls: Cell<usize>,
    pub segment_calls: Cell<usize>,
    pub waveform_calls: Cell<usize>,
}

impl StaticApi {
    pub fn new(segment_base_url: &str) -> StaticApi {
        let config = Url::parse(segment_base_url)
            .map(|segment_base_url| PlatformConfig { segment_base_url })
            .map_err(|err| PlayerError::new_code(PlayerErrorCode::Config, err.to_string()));
        StaticApi {
            config: RefCell::new(config),
            chains: RefCell::new(FxHashMap::default()),
            segments: RefCell::new(Ok(vec![])),
            failing_waveforms: RefCell::new(FxHashSet::default()),
            held: Cell::new(false),
            held_waveforms: RefCell::new(vec![]),
            config_calls: Cell::new(0),
            chain_calls: Cell::new(0),
            segment_calls: Cell::new(0),
            waveform_calls: Cell::new(0),
        }
    }

    pub fn add_chain(&self, id: &str, name: &str) {
        self.chains.borrow_mut().insert(
            id.to_string(),
            Chain {
                id: id.to_string(),
                embed_key: None,
                name: name.to_string(),
                state: Some("fabricate".to_string()),
            },
        );
    }

    pub fn set_segments(&self, segments: Vec<Segment>) {
        *self.segments.borrow_mut() = Ok(segments);
    }

    pub fn fail_segments(&self, err: PlayerError) {
        *self.segments.borrow_mut() = Err(err);
    }

    pub fn set_config(&self, config: Result<PlatformConfig, PlayerError>) {
        *self.config.borrow_mut() = config;
    }

    pub fn fail_waveform(&self, waveform_key: &str) {
        self.failing_waveforms.borrow_mut().insert(waveform_key.to_string());
    }

    /// Waveform fetches stay pending until `release_waveforms`.
    pub fn hold_waveforms(&self) {
        self.held.set(true);
    }

    pub fn held_waveforms(&self) -> usize {
        self.held_waveforms.borrow().len()
    }

    pub fn release_waveforms(&self) {
        self.held.set(false);
        for wake in self.held_waveforms.borrow_mut().drain(..) {
            let _ = wake.send(());
        }
    }

    fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }
}

impl ChainApi for StaticApi {
    fn config(&self) -> LocalBoxFuture<'static, Result<PlatformConfig, PlayerError>> {
        Self::bump(&self.config_calls);
        future::ready(self.config.borrow().clone()).boxed_local()
    }

    fn chain(&self, chain_id: &str) -> LocalBoxFuture<'static, Result<Chain, PlayerError>> {
        Self::bump(&self.chain_calls);
        let result = self.chains.borrow().get(chain_id).cloned().ok_or_else(|| {
            PlayerError::new_code(PlayerErrorCode::Http(404), format!("no chain {}", chain_id))
        });
        future::ready(result).boxed_local()
    }

    fn segments(&self, _chain_id: &str) -> LocalBoxFuture<'static, Result<Vec<Segment>, PlayerError>> {
        Self::bump(&self.segment_calls);
        future::ready(self.segments.borrow().clone()).boxed_local()
    }

    fn waveform(&self, url: &Url) -> LocalBoxFuture<'static, Result<Vec<u8>, PlayerError>> {
        Self::bump(&self.waveform_calls);
        let key = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
        let result = if self.failing_waveforms.borrow().contains(&key) {
            Err(PlayerError::new_code(
                PlayerErrorCode::Http(404),
                format!("GET {} returned 404", url),
            ))
        } else {
            Ok(key.into_bytes())
        };
        if !self.held.get() {
            return future::ready(result).boxed_local();
        }
        let (wake, wait) = oneshot::channel();
        self.held_waveforms.borrow_mut().push(wake);
        async move {
            let _ = wait.await;
            result
        }
        .boxed_local()
    }
}

/// Remembers every state render, log entry and alert.
#[derive(Default)]
pub struct RecordingStatus {
    pub renders: RefCell<Vec<(PlayerState, LoadProgress)>>,
    pub entries: RefCell<Vec<LogEntry>>,
    pub alerts: RefCell<Vec<String>>,
}

impl RecordingStatus {
    pub fn states(&self) -> Vec<PlayerState> {
        let mut states: Vec<PlayerState> = vec![];
        for (state, _) in self.renders.borrow().iter() {
            if states.last() != Some(state) {
                states.push(*state);
            }
        }
        states
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }
}

impl StatusSink for RecordingStatus {
    fn state_changed(&self, state: PlayerState, progress: LoadProgress) {
        self.renders.borrow_mut().push((state, progress));
    }

    fn log_entry(&self, entry: &LogEntry) {
        self.entries.borrow_mut().push(entry.clone());
    }

    fn alert(&self, message: &str) {
        self.alerts.borrow_mut().push(message.to_string());
    }
}

/// A session wired to the fakes above and driven by a `LocalPool`.
pub struct Harness {
    pub pool: LocalPool,
    pub clock: Rc<ManualClock>,
    pub audio: Rc<FakeAudioBackend>,
    pub api: Rc<StaticApi>,
    pub status: Rc<RecordingStatus>,
    pub session: PlayerSession<FakeAudioBackend>,
}

pub const HARNESS_START_MILLIS: i64 = 1_487_073_788_500;

impl Harness {
    pub fn new(config: EngineConfig) -> Result<Harness, PlayerError> {
        let pool = LocalPool::new();
        let clock = Rc::new(ManualClock::new(HARNESS_START_MILLIS));
        let audio = Rc::new(FakeAudioBackend::new(clock.clone()));
        let api = Rc::new(StaticApi::new("https://audio.example.com/chains/"));
        let status = Rc::new(RecordingStatus::default());
        let session = PlayerSession::new(
            config,
            SessionDeps {
                clock: clock.clone(),
                api: api.clone(),
                audio: audio.clone(),
                status: status.clone(),
                spawner: Rc::new(pool.spawner()),
            },
        )?;
        Ok(Harness {
            pool,
            clock,
            audio,
            api,
            status,
            session,
        })
    }

    pub fn now(&self) -> i64 {
        self.clock.now_utc_millis()
    }

    /// Runs every task that can make progress without time passing.
    pub fn settle(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Moves time forward in small steps, running ready tasks after each.
    pub fn run_for(&mut self, millis: i64) {
        const STEP: i64 = 10;
        self.settle();
        let mut remaining = millis;
        while remaining > 0 {
            let step = remaining.min(STEP);
            self.clock.advance(step);
            self.settle();
            remaining -= step;
        }
    }

    /// Drives a future spawned on the pool to completion, advancing time
    /// while it waits on timers.
    pub fn block_on<T: 'static>(&mut self, future: LocalBoxFuture<'static, T>) -> T {
        let slot = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        let spawner = self.pool.spawner();
        let task = async move {
            let value = future.await;
            *sink.borrow_mut() = Some(value);
        };
        if futures::task::LocalSpawnExt::spawn_local(&spawner, task).is_err() {
            panic!("local pool refused a task");
        }
        for _ in 0..100_000 {
            self.settle();
            if let Some(value) = slot.borrow_mut().take() {
                return value;
            }
            self.clock.advance(10);
        }
        panic!("future did not complete");
    }

    /// Plays `chain_id` and performs the unlock gesture, leaving the session
    /// syncing with both cycles running.
    pub fn start(&mut self, chain_id: &str) -> Result<(), PlayerError> {
        self.block_on(self.session.play(chain_id))?;
        let session = self.session.clone();
        let resumed: Rc<RefCell<Option<Result<(), PlayerError>>>> = Rc::new(RefCell::new(None));
        let sink = resumed.clone();
        self.session.unlock(move || {
            *sink.borrow_mut() = Some(session.resume());
        })?;
        self.run_for(self.session.config().unlock_settle_millis as i64);
        let outcome = resumed.borrow_mut().take();
        outcome.unwrap_or_else(|| {
            Err(PlayerError::new_code(
                PlayerErrorCode::UnlockFailed,
                "unlock callback never ran".to_string(),
            ))
        })
    }
}
