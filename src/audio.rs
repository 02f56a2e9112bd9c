//! PCM frame type shared across the capture pipeline.
//!
//! Frames arrive from the voice transport already decoded: mono 16-bit PCM
//! at 48 kHz, one frame per decoder tick.

/// Sample rate of decoded channel audio in Hz.
pub const SAMPLE_RATE_HZ: u32 = 48_000;

/// Channel count of decoded audio (mono).
pub const CHANNELS: u16 = 1;

/// One decoded PCM frame attributed to a single speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    /// Signed 16-bit samples, mono.
    pub samples: Vec<i16>,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Root-mean-square amplitude of the frame, in raw sample units.
    /// An empty frame has zero energy.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = s as f64;
                v * v
            })
            .sum();
        (sum_sq / self.samples.len() as f64).sqrt() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_empty_frame_is_zero() {
        assert_eq!(PcmFrame::new(Vec::new()).rms(), 0.0);
    }

    #[test]
    fn rms_of_constant_frame_equals_amplitude() {
        let frame = PcmFrame::new(vec![100i16; 960]);
        assert!((frame.rms() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn rms_is_sign_independent() {
        let pos = PcmFrame::new(vec![200i16; 480]);
        let neg = PcmFrame::new(vec![-200i16; 480]);
        assert!((pos.rms() - neg.rms()).abs() < 1e-3);
    }
}
