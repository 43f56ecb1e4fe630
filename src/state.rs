use std::fmt;

/// The analyzer's last-reported operating state.
///
/// Transitions are driven entirely by the device listener's notifications;
/// the controller never infers a state from command traffic. `None` is the
/// startup/unknown state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    None,
    LoadingRecipe,
    Idle,
    Measuring,
    FlushingIdle,
    FlushingNone,
    FlushingStopped,
    Stopped,
}

impl fmt::Display for DeviceState {
    /// Device vocabulary, as quoted in NACK reasons.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::None => "NONE",
            DeviceState::LoadingRecipe => "LOADING_RECIPE",
            DeviceState::Idle => "IDLE",
            DeviceState::Measuring => "MEASURING",
            DeviceState::FlushingIdle => "FLUSHING_IDLE",
            DeviceState::FlushingNone => "FLUSHING_NONE",
            DeviceState::FlushingStopped => "FLUSHING_STOPPED",
            DeviceState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}
