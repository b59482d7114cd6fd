/// Global settings for audio signal processing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AudioSettings {
    /// Sampling rate, in Hz.
    pub sampling_rate: u32,

    /// Frame size, in samples.
    ///
    /// Independent of the number of channels: a stereo frame of size 1024
    /// contains 1024 samples per channel.
    pub frame_size: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sampling_rate: 48_000,
            frame_size: 1024,
        }
    }
}
