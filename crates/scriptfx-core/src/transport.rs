//! Host transport snapshot handed to scripts each block.

/// Host transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Not running.
    #[default]
    Stopped,
    /// Playing back.
    Playing,
    /// Paused mid-song.
    Paused,
    /// Recording.
    Recording,
    /// Recording, paused.
    RecordPaused,
}

impl TransportState {
    /// Numeric code exposed to scripts.
    ///
    /// 0 stopped, 1 playing, 2 paused, 5 recording, 6 record paused.
    pub const fn code(self) -> f64 {
        match self {
            Self::Stopped => 0.0,
            Self::Playing => 1.0,
            Self::Paused => 2.0,
            Self::Recording => 5.0,
            Self::RecordPaused => 6.0,
        }
    }

    /// Whether audio is moving forward.
    pub const fn is_rolling(self) -> bool {
        matches!(self, Self::Playing | Self::Recording)
    }
}

/// Tempo, meter and position at the start of a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportInfo {
    /// Beats per minute.
    pub tempo: f64,
    /// Time signature numerator.
    pub ts_num: f64,
    /// Time signature denominator.
    pub ts_denom: f64,
    /// Play state.
    pub state: TransportState,
    /// Song position in seconds.
    pub position_seconds: f64,
    /// Song position in beats.
    pub position_beats: f64,
}

impl Default for TransportInfo {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            ts_num: 4.0,
            ts_denom: 4.0,
            state: TransportState::Stopped,
            position_seconds: 0.0,
            position_beats: 0.0,
        }
    }
}

impl TransportInfo {
    /// Stopped transport at `tempo` BPM, 4/4.
    pub fn stopped(tempo: f64) -> Self {
        Self {
            tempo: tempo.max(1.0),
            ..Self::default()
        }
    }

    /// Samples per beat at `sample_rate`.
    pub fn samples_per_beat(&self, sample_rate: f64) -> f64 {
        sample_rate * 60.0 / self.tempo.max(1.0)
    }

    /// Position after `frames` samples at `sample_rate`, if rolling.
    pub fn advanced(&self, frames: usize, sample_rate: f64) -> Self {
        if !self.state.is_rolling() || sample_rate <= 0.0 {
            return *self;
        }
        let seconds = frames as f64 / sample_rate;
        Self {
            position_seconds: self.position_seconds + seconds,
            position_beats: self.position_beats + seconds * self.tempo / 60.0,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes() {
        assert_eq!(TransportState::Stopped.code(), 0.0);
        assert_eq!(TransportState::Playing.code(), 1.0);
        assert_eq!(TransportState::RecordPaused.code(), 6.0);
    }

    #[test]
    fn samples_per_beat_at_120() {
        let info = TransportInfo::stopped(120.0);
        assert!((info.samples_per_beat(48000.0) - 24000.0).abs() < 1e-9);
    }

    #[test]
    fn advance_only_while_rolling() {
        let stopped = TransportInfo::default();
        assert_eq!(stopped.advanced(48000, 48000.0), stopped);

        let playing = TransportInfo {
            state: TransportState::Playing,
            ..TransportInfo::default()
        };
        let next = playing.advanced(48000, 48000.0);
        assert!((next.position_seconds - 1.0).abs() < 1e-12);
        assert!((next.position_beats - 2.0).abs() < 1e-12);
    }
}
