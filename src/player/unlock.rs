use std::mem;

use super::{audio_backend::ScheduledSource, PlayerError, PlayerErrorCode};

pub type UnlockCallback = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockPhase {
    Locked,
    /// Probe fired, waiting to confirm it was audible.
    Probing,
    Unlocked,
    Failed,
}

/// What the caller of `UnlockGate::request` has to do next.
pub enum UnlockStep {
    /// First request: resume the context, fire the probe and confirm later.
    Probe,
    /// A probe is already in flight; the callback was queued.
    Wait,
    /// Already unlocked; run the callback now.
    Ready(UnlockCallback),
    Failed,
}

/// One-time autoplay unlock. Callbacks queued while probing all run once the
/// probe is confirmed.
pub struct UnlockGate<S: ScheduledSource> {
    phase: UnlockPhase,
    probe: Option<S>,
    waiting: Vec<UnlockCallback>,
    probes_fired: usize,
}

impl<S: ScheduledSource> UnlockGate<S> {
    pub fn new() -> Self {
        UnlockGate {
            phase: UnlockPhase::Locked,
            probe: None,
            waiting: vec![],
            probes_fired: 0,
        }
    }

    pub fn phase(&self) -> UnlockPhase {
        self.phase
    }

    pub fn is_unlocked(&self) -> bool {
        self.phase == UnlockPhase::Unlocked
    }

    pub fn probes_fired(&self) -> usize {
        self.probes_fired
    }

    pub fn request(&mut self, callback: UnlockCallback) -> UnlockStep {
        match self.phase {
            UnlockPhase::Unlocked => UnlockStep::Ready(callback),
            UnlockPhase::Failed => UnlockStep::Failed,
            UnlockPhase::Probing => {
                self.waiting.push(callback);
                UnlockStep::Wait
            }
            UnlockPhase::Locked => {
                self.waiting.push(callback);
                self.phase = UnlockPhase::Probing;
                UnlockStep::Probe
            }
        }
    }

    pub fn arm(&mut self, probe: S) {
        self.probes_fired += 1;
        self.probe = Some(probe);
    }

    /// Checks that the armed probe rendered. On success returns every queued
    /// callback; on failure the gate stays failed for good.
    pub fn confirm(&mut self) -> Result<Vec<UnlockCallback>, PlayerError> {
        if self.phase != UnlockPhase::Probing {
            return Ok(vec![]);
        }
        let played = self.probe.take().is_some_and(|probe| probe.has_played());
        if played {
            self.phase = UnlockPhase::Unlocked;
            Ok(mem::take(&mut self.waiting))
        } else {
            Err(self.fail("silent probe never played".to_string()))
        }
    }

    pub fn fail(&mut self, reason: String) -> PlayerError {
        self.phase = UnlockPhase::Failed;
        self.probe = None;
        self.waiting.clear();
        PlayerError::new_code(
            PlayerErrorCode::UnlockFailed,
            format!("audio could not be unlocked: {}", reason),
        )
    }
}

impl<S: ScheduledSource> Default for UnlockGate<S> {
    fn default() -> Self {
        UnlockGate::new()
    }
}
