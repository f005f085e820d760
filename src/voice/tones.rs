//! Short audio cues played around the listening cycle

use std::f32::consts::PI;

use super::playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE};

/// Fade applied to both ends of every note to avoid clicks
const RAMP_MS: u32 = 5;

/// Audio cue kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Single high beep when wake-word listening begins
    Start,
    /// Ascending C5-E5-G5 melody after a successful command
    Success,
    /// Descending A4-F4 pair after any failure
    Error,
}

struct Note {
    frequency: f32,
    offset_ms: u32,
    duration_ms: u32,
    gain: f32,
}

const START_NOTES: &[Note] = &[Note {
    frequency: 660.0,
    offset_ms: 0,
    duration_ms: 200,
    gain: 1.0,
}];

const SUCCESS_NOTES: &[Note] = &[
    Note {
        frequency: 523.25,
        offset_ms: 0,
        duration_ms: 150,
        gain: 0.5,
    },
    Note {
        frequency: 659.25,
        offset_ms: 150,
        duration_ms: 150,
        gain: 0.5,
    },
    Note {
        frequency: 783.99,
        offset_ms: 300,
        duration_ms: 150,
        gain: 0.5,
    },
];

const ERROR_NOTES: &[Note] = &[
    Note {
        frequency: 440.0,
        offset_ms: 0,
        duration_ms: 300,
        gain: 0.5,
    },
    Note {
        frequency: 349.23,
        offset_ms: 300,
        duration_ms: 300,
        gain: 0.5,
    },
];

impl Tone {
    const fn notes(self) -> &'static [Note] {
        match self {
            Self::Start => START_NOTES,
            Self::Success => SUCCESS_NOTES,
            Self::Error => ERROR_NOTES,
        }
    }

    /// Total length of the cue in milliseconds
    #[must_use]
    pub fn duration_ms(self) -> u32 {
        self.notes()
            .iter()
            .map(|n| n.offset_ms + n.duration_ms)
            .max()
            .unwrap_or(0)
    }
}

/// Render a tone to mono f32 samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn render(tone: Tone, sample_rate: u32) -> Vec<f32> {
    let mut out = vec![0.0f32; samples_for(tone.duration_ms(), sample_rate)];
    let ramp = samples_for(RAMP_MS, sample_rate).max(1);

    for note in tone.notes() {
        let start = samples_for(note.offset_ms, sample_rate);
        let len = samples_for(note.duration_ms, sample_rate);
        let ramp = ramp.min(len / 2).max(1);

        for (i, slot) in out.iter_mut().skip(start).take(len).enumerate() {
            let t = i as f32 / sample_rate as f32;
            let envelope = if i < ramp {
                i as f32 / ramp as f32
            } else if i >= len - ramp {
                (len - i) as f32 / ramp as f32
            } else {
                1.0
            };
            *slot += note.gain * envelope * (2.0 * PI * note.frequency * t).sin();
        }
    }

    for sample in &mut out {
        *sample = sample.clamp(-1.0, 1.0);
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn samples_for(ms: u32, sample_rate: u32) -> usize {
    (u64::from(ms) * u64::from(sample_rate) / 1000) as usize
}

/// Plays audio cues without blocking the caller
pub trait TonePlayer: Send + Sync {
    /// Start playing a cue; returns immediately
    fn play(&self, tone: Tone);
}

/// Plays cues on the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceTones;

impl TonePlayer for DeviceTones {
    fn play(&self, tone: Tone) {
        let spawned = std::thread::Builder::new()
            .name("tone".to_string())
            .spawn(move || {
                let samples = render(tone, PLAYBACK_SAMPLE_RATE);
                let result =
                    AudioPlayback::new().and_then(|playback| playback.play_blocking(samples, None));
                if let Err(e) = result {
                    tracing::warn!(?tone, error = %e, "failed to play tone");
                }
            });

        if let Err(e) = spawned {
            tracing::warn!(?tone, error = %e, "failed to spawn tone thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_lengths() {
        assert_eq!(render(Tone::Start, 24000).len(), 4800);
        assert_eq!(render(Tone::Success, 24000).len(), 10800);
        assert_eq!(render(Tone::Error, 16000).len(), 9600);
    }

    #[test]
    fn test_tones_are_audible_and_bounded() {
        for tone in [Tone::Start, Tone::Success, Tone::Error] {
            let samples = render(tone, 24000);
            let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
            assert!(peak > 0.3, "{tone:?} too quiet");
            assert!(peak <= 1.0, "{tone:?} clipped");
        }
    }

    #[test]
    fn test_notes_fade_in() {
        let samples = render(Tone::Error, 24000);
        assert!(samples[0].abs() < f32::EPSILON);
    }
}
