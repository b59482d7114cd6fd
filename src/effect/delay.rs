use super::AudioEffectState;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;

/// A single-channel delay line backed by a ring buffer.
///
/// The read cursor trails the write cursor by the delay length; reads and
/// writes move whole frames at a time.
#[derive(Debug, Clone)]
pub struct Delay {
    ring_buffer: Vec<f32>,
    cursor: usize,
    read_cursor: usize,
}

impl Delay {
    pub fn new(delay: usize, frame_size: usize) -> Self {
        let mut delay_line = Self {
            ring_buffer: Vec::new(),
            cursor: 0,
            read_cursor: 0,
        };
        delay_line.resize(delay, frame_size);
        delay_line
    }

    pub fn resize(&mut self, delay: usize, frame_size: usize) {
        self.ring_buffer = vec![0.0; delay + frame_size];
        self.reset();
    }

    pub fn reset(&mut self) {
        self.ring_buffer.fill(0.0);
        self.cursor = 0;
        self.read_cursor = 0;
    }

    /// Positions the read cursor `delay` samples behind the write cursor, for
    /// write-then-read usage with an exact sample delay.
    pub fn set_read_offset(&mut self, delay: usize) {
        let size = self.ring_buffer.len();
        self.read_cursor = (self.cursor + size - (delay % size)) % size;
    }

    /// Reads `out.len()` samples from the delayed end of the line.
    pub fn get(&mut self, out: &mut [f32]) {
        let size = self.ring_buffer.len();
        let count = out.len();

        if self.read_cursor + count <= size {
            out.copy_from_slice(&self.ring_buffer[self.read_cursor..self.read_cursor + count]);
            self.read_cursor += count;
            if self.read_cursor >= size {
                self.read_cursor -= size;
            }
        } else {
            let first = size - self.read_cursor;
            out[..first].copy_from_slice(&self.ring_buffer[self.read_cursor..]);
            out[first..].copy_from_slice(&self.ring_buffer[..count - first]);
            self.read_cursor = count - first;
        }
    }

    /// Writes `samples.len()` samples at the head of the line.
    pub fn put(&mut self, samples: &[f32]) {
        let size = self.ring_buffer.len();
        let count = samples.len();

        if self.cursor + count <= size {
            self.ring_buffer[self.cursor..self.cursor + count].copy_from_slice(samples);
            self.cursor += count;
            if self.cursor >= size {
                self.cursor -= size;
            }
        } else {
            let first = size - self.cursor;
            self.ring_buffer[self.cursor..].copy_from_slice(&samples[..first]);
            self.ring_buffer[..count - first].copy_from_slice(&samples[first..]);
            self.cursor = count - first;
        }
    }
}

/// Delays a mono signal by a whole number of samples.
#[derive(Debug)]
pub struct DelayEffect {
    frame_size: usize,
    max_delay: usize,
    delay: Delay,
    current_delay: usize,
    silence: Vec<f32>,
    num_tail_samples_remaining: usize,
}

/// Settings used to create a [`DelayEffect`].
#[derive(Debug, Copy, Clone)]
pub struct DelayEffectSettings {
    /// The largest supported delay, in samples.
    pub max_delay: usize,
}

/// Parameters for applying a delay effect.
#[derive(Debug, Default, Copy, Clone)]
pub struct DelayEffectParams {
    /// The delay to apply, in samples. Clamped to the effect's maximum.
    pub delay_in_samples: usize,
}

impl DelayEffect {
    pub fn new(audio_settings: &AudioSettings, settings: &DelayEffectSettings) -> Self {
        let mut delay = Delay::new(settings.max_delay, audio_settings.frame_size);
        delay.set_read_offset(settings.max_delay);

        Self {
            frame_size: audio_settings.frame_size,
            max_delay: settings.max_delay,
            delay,
            current_delay: settings.max_delay,
            silence: vec![0.0; audio_settings.frame_size],
            num_tail_samples_remaining: 0,
        }
    }

    pub fn reset(&mut self) {
        self.delay.resize(self.current_delay, self.frame_size);
        self.delay.set_read_offset(self.current_delay);
        self.num_tail_samples_remaining = 0;
    }

    pub fn apply(
        &mut self,
        params: &DelayEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_samples(), output.num_samples());
        assert_eq!(input.num_channels(), 1);
        assert_eq!(output.num_channels(), 1);

        let delay = params.delay_in_samples.min(self.max_delay);
        if delay != self.current_delay {
            self.delay.resize(delay, self.frame_size);
            self.delay.set_read_offset(delay);
            self.current_delay = delay;
        }

        self.delay.put(input.channel(0));
        self.delay.get(output.channel_mut(0));

        self.num_tail_samples_remaining = self.current_delay;
        if self.num_tail_samples_remaining > 0 {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }

    pub fn tail(&mut self, output: &mut AudioBuffer) -> AudioEffectState {
        assert_eq!(output.num_channels(), 1);

        self.delay.put(&self.silence);
        self.delay.get(output.channel_mut(0));

        self.num_tail_samples_remaining =
            self.num_tail_samples_remaining.saturating_sub(self.frame_size);
        if self.num_tail_samples_remaining > 0 {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }

    pub fn tail_size(&self) -> usize {
        self.num_tail_samples_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_line_round_trip() {
        let mut delay = Delay::new(3, 4);
        delay.set_read_offset(3);

        let mut out = [0.0f32; 4];
        delay.put(&[1.0, 2.0, 3.0, 4.0]);
        delay.get(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.0, 1.0]);

        delay.put(&[5.0, 6.0, 7.0, 8.0]);
        delay.get(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_effect_delays_by_requested_amount() {
        let audio_settings = AudioSettings {
            sampling_rate: 48_000,
            frame_size: 4,
        };
        let mut effect = DelayEffect::new(&audio_settings, &DelayEffectSettings { max_delay: 16 });

        let input = AudioBuffer::from_mono(&[1.0, 0.0, 0.0, 0.0]);
        let mut output = AudioBuffer::new(1, 4);

        let state = effect.apply(
            &DelayEffectParams {
                delay_in_samples: 2,
            },
            &input,
            &mut output,
        );

        assert_eq!(output.channel(0), &[0.0, 0.0, 1.0, 0.0]);
        assert_eq!(state, AudioEffectState::TailRemaining);
        assert_eq!(effect.tail_size(), 2);

        let state = effect.tail(&mut output);
        assert_eq!(state, AudioEffectState::TailComplete);
    }
}
