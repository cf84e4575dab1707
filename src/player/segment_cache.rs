use std::{collections::VecDeque, rc::Rc};

use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;

use super::{
    api_client::ChainApi,
    audio_backend::AudioBackend,
    debug_log::DebugLog,
    segment::Segment,
    segment_audio::{ControllerContext, LoadFuture, LoadState, SegmentAudioController},
    status::LoadProgress,
    PlayerError,
};

/// A load handed out by the cache. Its completion must be returned through
/// `SegmentCache::finish_load` with the same identity.
pub struct LoadJob<B: AudioBackend> {
    pub segment_id: String,
    pub serial: u64,
    pub epoch: u64,
    pub future: LoadFuture<B>,
}

/// Segment id to controller map plus a bounded FIFO of pending loads.
pub struct SegmentCache<B: AudioBackend> {
    controllers: FxHashMap<String, SegmentAudioController<B>>,
    pending: VecDeque<String>,
    in_flight: usize,
    max_concurrent_loads: usize,
    next_serial: u64,
    epoch: u64,
}

impl<B: AudioBackend> SegmentCache<B> {
    pub fn new(max_concurrent_loads: usize) -> Self {
        SegmentCache {
            controllers: FxHashMap::default(),
            pending: VecDeque::new(),
            in_flight: 0,
            max_concurrent_loads,
            next_serial: 0,
            epoch: 0,
        }
    }

    /// Creates controllers for segments seen for the first time and tears
    /// down those no longer active. Returns the removed ids.
    pub fn reconcile(&mut self, active: &[Segment], ctx: &ControllerContext<B>) -> Vec<String> {
        for segment in active {
            if self.controllers.contains_key(&segment.id) {
                continue;
            }
            self.next_serial += 1;
            let controller = SegmentAudioController::new(ctx, segment.clone(), self.next_serial);
            if controller.wants_load() {
                self.pending.push_back(segment.id.clone());
            }
            self.controllers.insert(segment.id.clone(), controller);
        }

        let active_ids: FxHashSet<&str> = active.iter().map(|segment| segment.id.as_str()).collect();
        let stale = self
            .controllers
            .keys()
            .filter(|id| !active_ids.contains(id.as_str()))
            .cloned()
            .sorted()
            .collect_vec();
        for id in &stale {
            if let Some(mut controller) = self.controllers.remove(id) {
                controller.destroy(ctx.log);
                ctx.log.info(format!("segment {} left the active set", id));
            }
        }
        self.pending.retain(|id| self.controllers.contains_key(id));
        stale
    }

    /// Schedules controllers that finished loading but were not yet handed
    /// to the audio graph.
    pub fn schedule_loaded(&mut self, ctx: &ControllerContext<B>) -> usize {
        self.controllers
            .values_mut()
            .filter(|controller| controller.load_state() == LoadState::Loaded)
            .map(|controller| controller.play_web_audio(ctx))
            .filter(|scheduled| *scheduled)
            .count()
    }

    /// Starts as many pending loads as the concurrency cap allows, oldest first.
    pub fn take_ready_loads(
        &mut self,
        ctx: &ControllerContext<B>,
        api: &Rc<dyn ChainApi>,
        audio: &Rc<B>,
    ) -> Vec<LoadJob<B>> {
        let mut jobs = Vec::new();
        while self.max_concurrent_loads == 0 || self.in_flight < self.max_concurrent_loads {
            let Some(id) = self.pending.pop_front() else {
                break;
            };
            let Some(controller) = self.controllers.get_mut(&id) else {
                continue;
            };
            if let Some(future) = controller.begin_load(ctx, api.clone(), audio.clone()) {
                self.in_flight += 1;
                jobs.push(LoadJob {
                    serial: controller.serial(),
                    segment_id: id,
                    epoch: self.epoch,
                    future,
                });
            }
        }
        jobs
    }

    /// Delivers a finished load. Completions from before the last `clear`, or
    /// for a controller that has since been torn down, are dropped.
    pub fn finish_load(
        &mut self,
        segment_id: &str,
        serial: u64,
        epoch: u64,
        result: Result<B::Buffer, PlayerError>,
        ctx: &ControllerContext<B>,
    ) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        match self.controllers.get_mut(segment_id) {
            Some(controller) if controller.serial() == serial => {
                controller.finish_load(result, ctx);
                true
            }
            _ => {
                ctx.log.debug(format!("ignoring load of torn down segment {}", segment_id));
                false
            }
        }
    }

    pub fn clear(&mut self, log: &DebugLog) {
        for (_, mut controller) in self.controllers.drain() {
            controller.destroy(log);
        }
        self.pending.clear();
        self.in_flight = 0;
        self.epoch += 1;
    }

    pub fn get(&self, segment_id: &str) -> Option<&SegmentAudioController<B>> {
        self.controllers.get(segment_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.controllers.keys().cloned().sorted().collect_vec()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn observe_all(&mut self, audio: &B) {
        for controller in self.controllers.values_mut() {
            controller.observe(audio);
        }
    }

    pub fn any_playing(&self, audio: &B) -> bool {
        self.controllers
            .values()
            .any(|controller| controller.is_playing(audio))
    }

    /// Loaded versus loadable controllers; inert ones are not counted.
    pub fn progress(&self) -> LoadProgress {
        let (loaded, total) = self
            .controllers
            .values()
            .map(|controller| controller.load_state())
            .filter(|state| !matches!(state, LoadState::InvalidUrl | LoadState::Skipped))
            .fold((0, 0), |(loaded, total), state| {
                let done = matches!(state, LoadState::Loaded | LoadState::Scheduled);
                (loaded + usize::from(done), total + 1)
            });
        LoadProgress { loaded, total }
    }
}
