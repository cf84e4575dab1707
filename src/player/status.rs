use super::debug_log::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerState {
    /// No chain loaded.
    Standby,
    /// Chain loaded, waiting for the unlock gesture.
    Suspend,
    /// Unlocked, no segment confirmed playing yet.
    Syncing,
    /// At least one segment is audibly playing.
    Playing,
}

impl PlayerState {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerState::Standby => "standby",
            PlayerState::Suspend => "suspend",
            PlayerState::Syncing => "syncing",
            PlayerState::Playing => "playing",
        }
    }

    pub fn css_class(&self) -> String {
        format!("state-{}", self.name())
    }

    pub fn status_text(&self) -> &'static str {
        match self {
            PlayerState::Standby => "Standby",
            PlayerState::Suspend => "Tap to listen",
            PlayerState::Syncing => "Syncing...",
            PlayerState::Playing => "Playing",
        }
    }

    /// Whether the cycle loop may schedule audio in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, PlayerState::Syncing | PlayerState::Playing)
    }

    pub fn all() -> [PlayerState; 4] {
        [
            PlayerState::Standby,
            PlayerState::Suspend,
            PlayerState::Syncing,
            PlayerState::Playing,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadProgress {
    pub loaded: usize,
    pub total: usize,
}

impl LoadProgress {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.loaded as f64 / self.total as f64
    }
}

/// Consumer of the engine's user-visible side effects.
pub trait StatusSink {
    fn state_changed(&self, state: PlayerState, progress: LoadProgress);

    fn log_entry(&self, entry: &LogEntry);

    /// Fatal, user-facing failure.
    fn alert(&self, message: &str);
}
