//! Text-to-speech collaborator contract.
//!
//! Synthesis is owned by the host (network TTS, local engine); the
//! coordinator only awaits the resulting buffer and hands it to playback.

use std::time::Duration;

use crate::error::SynthesisError;

/// Audio produced by speech synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    /// Mono PCM f32 samples.
    pub samples: Vec<f32>,

    /// Sample rate of the audio (e.g. 24 000 Hz).
    pub sample_rate: u32,

    /// Duration of the audio.
    pub duration: Duration,
}

impl SpeechAudio {
    /// Wrap mono samples and derive the duration.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            #[allow(clippy::cast_precision_loss)]
            let secs = samples.len() as f64 / f64::from(sample_rate);
            Duration::from_secs_f64(secs)
        };
        Self {
            samples,
            sample_rate,
            duration,
        }
    }

    /// Whether there is anything to play.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Backend-agnostic text-to-speech provider.
///
/// Implementations must be `Send + Sync`: each request is awaited on its
/// own task so the coordinator keeps reacting while synthesis runs.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` to a playable buffer.
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, SynthesisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_sample_count() {
        let audio = SpeechAudio::from_samples(vec![0.0; 24_000], 24_000);
        assert_eq!(audio.duration, Duration::from_secs(1));
        assert!(!audio.is_empty());
    }

    #[test]
    fn zero_rate_has_zero_duration() {
        let audio = SpeechAudio::from_samples(vec![0.0; 10], 0);
        assert_eq!(audio.duration, Duration::ZERO);
    }
}
