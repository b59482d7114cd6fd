use super::{AudioEffectState, Delay};
use crate::NUM_BANDS;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::iir::{HIGH_CUTOFF_FREQUENCIES, Iir, IirFilterer, LOW_CUTOFF_FREQUENCIES};
use crate::reverb_estimator::Reverb;
use rand::Rng;
use wide::f32x4;

const NUM_DELAYS: usize = 16;
const NUM_ALLPASSES: usize = 4;
const ALLPASS_DELAYS: [usize; NUM_ALLPASSES] = [225, 341, 441, 556];
const ALLPASS_GAIN: f32 = 0.5;

/// A Schroeder allpass diffuser.
#[derive(Debug, Clone)]
struct Allpass {
    buffer: Vec<f32>,
    cursor: usize,
    gain: f32,
}

impl Allpass {
    fn new(delay: usize, gain: f32) -> Self {
        Self {
            buffer: vec![0.0; delay],
            cursor: 0,
            gain,
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.cursor = 0;
    }

    fn apply_sample(&mut self, x: f32) -> f32 {
        let delayed = self.buffer[self.cursor];
        let state = x + self.gain * delayed;
        let y = delayed - self.gain * state;

        self.buffer[self.cursor] = state;
        self.cursor += 1;
        if self.cursor >= self.buffer.len() {
            self.cursor = 0;
        }

        y
    }
}

/// A reverb tail synthesized with a 16-tap feedback delay network.
///
/// Per-tap delay lengths are powers of distinct small primes near
/// `0.15 · RT60 · fs / 16`, per-tap absorptive filters shape the decay per
/// band, taps are mixed with a 16×16 Hadamard matrix, and the output passes
/// through four allpass diffusers and a tone-correction EQ. Parameters are
/// recomputed whenever a band's RT60 changes; filter state carries across the
/// change to avoid clicks.
#[derive(Debug)]
pub struct ReverbEffect {
    sampling_rate: u32,
    frame_size: usize,
    delay_values: [usize; NUM_DELAYS],
    delay_lines: Vec<Delay>,
    allpasses: [Allpass; NUM_ALLPASSES],
    absorptive: Vec<[IirFilterer; NUM_BANDS]>,
    tone_correction: [IirFilterer; NUM_BANDS],
    x_old: Vec<Vec<f32>>,
    x_new: Vec<Vec<f32>>,
    prev_reverb: Reverb,
    have_filters: bool,
    num_tail_frames_remaining: usize,
}

/// Parameters for applying a reverb effect.
#[derive(Debug, Copy, Clone)]
pub struct ReverbEffectParams {
    /// The reverb decay times to render.
    pub reverb: Reverb,
}

impl ReverbEffect {
    pub fn new(audio_settings: &AudioSettings) -> Self {
        let sampling_rate = audio_settings.sampling_rate;
        let frame_size = audio_settings.frame_size;

        let delay_values = Self::calc_delays_for_reverb_time(10.0, sampling_rate);

        let delay_lines = delay_values
            .iter()
            .map(|&delay| Delay::new(delay, frame_size))
            .collect();

        let mut effect = Self {
            sampling_rate,
            frame_size,
            delay_values,
            delay_lines,
            allpasses: [
                Allpass::new(ALLPASS_DELAYS[0], ALLPASS_GAIN),
                Allpass::new(ALLPASS_DELAYS[1], ALLPASS_GAIN),
                Allpass::new(ALLPASS_DELAYS[2], ALLPASS_GAIN),
                Allpass::new(ALLPASS_DELAYS[3], ALLPASS_GAIN),
            ],
            absorptive: vec![[IirFilterer::default(); NUM_BANDS]; NUM_DELAYS],
            tone_correction: [IirFilterer::default(); NUM_BANDS],
            x_old: vec![vec![0.0; frame_size]; NUM_DELAYS],
            x_new: vec![vec![0.0; frame_size]; NUM_DELAYS],
            prev_reverb: Reverb::default(),
            have_filters: false,
            num_tail_frames_remaining: 0,
        };

        effect.reset();
        effect
    }

    pub fn reset(&mut self) {
        for line in &mut self.delay_lines {
            line.reset();
        }
        for allpass in &mut self.allpasses {
            allpass.reset();
        }
        for filters in &mut self.absorptive {
            for filter in filters {
                filter.reset();
            }
        }
        for filter in &mut self.tone_correction {
            filter.reset();
        }

        self.prev_reverb = Reverb {
            reverb_times: [0.1; NUM_BANDS],
        };
        self.have_filters = false;
        self.num_tail_frames_remaining = 0;
    }

    pub fn apply(
        &mut self,
        params: &ReverbEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_samples(), output.num_samples());
        assert_eq!(input.num_channels(), 1);
        assert_eq!(output.num_channels(), 1);

        output.make_silent();

        let mut clamped = params.reverb.reverb_times;
        for rt in &mut clamped {
            *rt = rt.max(0.1);
        }

        if !self.have_filters || clamped != self.prev_reverb.reverb_times {
            self.update_filters(&clamped);
        }

        self.process_frame(Some(input.channel(0)), output.channel_mut(0));

        self.prev_reverb = Reverb {
            reverb_times: clamped,
        };

        let max_reverb_time = clamped.iter().copied().fold(0.0f32, f32::max);
        self.num_tail_frames_remaining =
            2 * ((max_reverb_time * self.sampling_rate as f32) / self.frame_size as f32).ceil()
                as usize;

        if self.num_tail_frames_remaining > 0 {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }

    /// Applies the effect using the previous frame's reverb times.
    pub fn tail_apply(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) -> AudioEffectState {
        let params = ReverbEffectParams {
            reverb: self.prev_reverb,
        };
        self.apply(&params, input, output)
    }

    pub fn tail(&mut self, output: &mut AudioBuffer) -> AudioEffectState {
        assert_eq!(output.num_channels(), 1);

        output.make_silent();
        self.process_frame(None, output.channel_mut(0));

        self.num_tail_frames_remaining = self.num_tail_frames_remaining.saturating_sub(1);
        if self.num_tail_frames_remaining > 0 {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }

    pub fn tail_size(&self) -> usize {
        self.num_tail_frames_remaining * self.frame_size
    }

    fn update_filters(&mut self, reverb_times: &[f32; NUM_BANDS]) {
        for (tap, filters) in self.absorptive.iter_mut().enumerate() {
            let gains = Self::calc_absorptive_gains(
                reverb_times,
                self.delay_values[tap],
                self.sampling_rate,
            );

            filters[0].set_filter(Iir::low_shelf(
                HIGH_CUTOFF_FREQUENCIES[0],
                gains[0],
                self.sampling_rate,
            ));
            filters[1].set_filter(Iir::peaking(
                LOW_CUTOFF_FREQUENCIES[1],
                HIGH_CUTOFF_FREQUENCIES[1],
                gains[1],
                self.sampling_rate,
            ));
            filters[2].set_filter(Iir::high_shelf(
                LOW_CUTOFF_FREQUENCIES[2],
                gains[2],
                self.sampling_rate,
            ));
        }

        let tone_gains = Self::calc_tone_correction_gains(reverb_times);
        self.tone_correction[0].set_filter(Iir::low_shelf(
            HIGH_CUTOFF_FREQUENCIES[0],
            tone_gains[0],
            self.sampling_rate,
        ));
        self.tone_correction[1].set_filter(Iir::peaking(
            LOW_CUTOFF_FREQUENCIES[1],
            HIGH_CUTOFF_FREQUENCIES[1],
            tone_gains[1],
            self.sampling_rate,
        ));
        self.tone_correction[2].set_filter(Iir::high_shelf(
            LOW_CUTOFF_FREQUENCIES[2],
            tone_gains[2],
            self.sampling_rate,
        ));

        self.have_filters = true;
    }

    /// One frame of the FDN loop: read and filter all delay lines, mix with
    /// the Hadamard matrix, feed back (plus input if any), and diffuse the
    /// tap average into the output.
    fn process_frame(&mut self, input: Option<&[f32]>, output: &mut [f32]) {
        let frame_size = self.frame_size;

        for tap in 0..NUM_DELAYS {
            self.delay_lines[tap].get(&mut self.x_old[tap]);

            for filter in &mut self.absorptive[tap] {
                filter.apply_in_place(&mut self.x_old[tap]);
            }
        }

        let mut column_old = [f32x4::splat(0.0); NUM_DELAYS];
        let mut column_new = [f32x4::splat(0.0); NUM_DELAYS];
        let mut offset = 0;
        while offset + 4 <= frame_size {
            for tap in 0..NUM_DELAYS {
                column_old[tap] =
                    f32x4::from(<[f32; 4]>::try_from(&self.x_old[tap][offset..offset + 4]).unwrap());
            }

            Self::multiply_hadamard_matrix(&column_old, &mut column_new);

            for tap in 0..NUM_DELAYS {
                self.x_new[tap][offset..offset + 4].copy_from_slice(&column_new[tap].to_array());
            }

            offset += 4;
        }

        // Scalar remainder for frame sizes that are not multiples of 4.
        for i in offset..frame_size {
            for (tap, row) in HADAMARD_SIGNS.iter().enumerate() {
                let mut sum = 0.0;
                for (other, &sign) in row.iter().enumerate() {
                    sum += sign * self.x_old[other][i];
                }
                self.x_new[tap][i] = 0.25 * sum;
            }
        }

        for tap in 0..NUM_DELAYS {
            if let Some(input) = input {
                for (value, x) in self.x_new[tap].iter_mut().zip(input.iter()) {
                    *value += x;
                }
            }

            self.delay_lines[tap].put(&self.x_new[tap]);
        }

        for tap in 1..NUM_DELAYS {
            let (first, rest) = self.x_old.split_at_mut(tap);
            for (value, x) in first[0].iter_mut().zip(rest[0].iter()) {
                *value += x;
            }
        }

        let scale = 1.0 / NUM_DELAYS as f32;
        for (y, &x) in output.iter_mut().zip(self.x_old[0].iter()) {
            let mut sample = x * scale;
            for allpass in &mut self.allpasses {
                sample = allpass.apply_sample(sample);
            }
            *y = sample;
        }

        for filter in &mut self.tone_correction {
            filter.apply_in_place(output);
        }
    }

    fn calc_delays_for_reverb_time(reverb_time: f32, sampling_rate: u32) -> [usize; NUM_DELAYS] {
        const PRIMES: [u32; NUM_DELAYS] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];

        let delay_sum = 0.15 * reverb_time * sampling_rate as f32;
        let delay_min = (delay_sum / NUM_DELAYS as f32) as u32;

        // Jitter keeps taps from aligning; the stream is seeded so effects
        // are reproducible run-to-run.
        let mut rng = crate::sampling::seeded_rng(0x5D17);

        let mut delays = [0usize; NUM_DELAYS];
        for (delay, &prime) in delays.iter_mut().zip(PRIMES.iter()) {
            let random_offset: u32 = rng.gen_range(0..101);
            *delay = Self::next_power_of_prime(delay_min + random_offset, prime) as usize;
        }

        delays
    }

    fn next_power_of_prime(x: u32, p: u32) -> u32 {
        let exponent = ((x as f32).ln() / (p as f32).ln()).round().max(1.0);
        (p as f32).powf(exponent) as u32
    }

    fn calc_absorptive_gains(
        reverb_times: &[f32; NUM_BANDS],
        delay: usize,
        sampling_rate: u32,
    ) -> [f32; NUM_BANDS] {
        let mut gains = [0.0; NUM_BANDS];
        for (gain, &rt) in gains.iter_mut().zip(reverb_times.iter()) {
            // Floored to keep the IIR filters stable.
            *gain = (-(6.91 * delay as f32) / (rt * sampling_rate as f32))
                .exp()
                .max(1e-8);
        }
        gains
    }

    fn calc_tone_correction_gains(reverb_times: &[f32; NUM_BANDS]) -> [f32; NUM_BANDS] {
        let mut gains = [0.0; NUM_BANDS];
        for (gain, &rt) in gains.iter_mut().zip(reverb_times.iter()) {
            *gain = (1.0 / rt).sqrt();
        }

        let max_gain = gains.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for gain in &mut gains {
            *gain /= max_gain;
        }

        gains
    }

    fn multiply_hadamard_matrix(input: &[f32x4; NUM_DELAYS], output: &mut [f32x4; NUM_DELAYS]) {
        let quarter = f32x4::splat(0.25);
        for (row, out) in HADAMARD_SIGNS.iter().zip(output.iter_mut()) {
            let mut sum = f32x4::splat(0.0);
            for (&sign, &value) in row.iter().zip(input.iter()) {
                if sign > 0.0 {
                    sum += value;
                } else {
                    sum -= value;
                }
            }
            *out = sum * quarter;
        }
    }
}

/// Signs of the 16×16 Hadamard matrix H_16 = H_2 ⊗ H_2 ⊗ H_2 ⊗ H_2.
static HADAMARD_SIGNS: [[f32; NUM_DELAYS]; NUM_DELAYS] = {
    let mut signs = [[0.0f32; NUM_DELAYS]; NUM_DELAYS];
    let mut i = 0;
    while i < NUM_DELAYS {
        let mut j = 0;
        while j < NUM_DELAYS {
            signs[i][j] = if (i & j).count_ones() % 2 == 0 {
                1.0
            } else {
                -1.0
            };
            j += 1;
        }
        i += 1;
    }
    signs
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hadamard_is_orthogonal() {
        for i in 0..NUM_DELAYS {
            for j in 0..NUM_DELAYS {
                let dot: f32 = (0..NUM_DELAYS)
                    .map(|k| HADAMARD_SIGNS[i][k] * HADAMARD_SIGNS[j][k])
                    .sum();
                if i == j {
                    assert_eq!(dot, NUM_DELAYS as f32);
                } else {
                    assert_eq!(dot, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_impulse_response_is_stable_and_decays() {
        let audio_settings = AudioSettings {
            sampling_rate: 48_000,
            frame_size: 1024,
        };
        let mut effect = ReverbEffect::new(&audio_settings);

        let params = ReverbEffectParams {
            reverb: Reverb {
                reverb_times: [1.0; NUM_BANDS],
            },
        };

        let mut impulse_data = vec![0.0f32; 1024];
        impulse_data[0] = 1.0;
        let impulse = AudioBuffer::from_mono(&impulse_data);
        let silence = AudioBuffer::from_mono(&vec![0.0f32; 1024]);

        let mut output = AudioBuffer::new(1, 1024);

        let total_samples = 10 * audio_settings.sampling_rate as usize;
        let num_frames = total_samples / audio_settings.frame_size;

        // Peak magnitude in each 50 ms window.
        let window_size = (0.05 * audio_settings.sampling_rate as f32) as usize;
        let mut rendered = Vec::with_capacity(total_samples);

        for frame in 0..num_frames {
            let input = if frame == 0 { &impulse } else { &silence };
            effect.apply(&params, input, &mut output);
            rendered.extend_from_slice(output.channel(0));
        }

        // No sample exceeds the input peak.
        assert!(rendered.iter().all(|x| x.abs() <= 1.0));

        // After the initial build-up, window peaks are non-increasing (with a
        // small tolerance for diffuser ripple).
        let start = (0.2 * audio_settings.sampling_rate as f32) as usize;
        let window_peaks: Vec<f32> = rendered[start..]
            .chunks(window_size)
            .map(|window| window.iter().fold(0.0f32, |acc, x| acc.max(x.abs())))
            .collect();

        for pair in window_peaks.windows(2) {
            assert!(pair[1] <= pair[0] * 1.05 + 1e-6);
        }
    }

    #[test]
    fn test_tail_drains_to_completion() {
        let audio_settings = AudioSettings {
            sampling_rate: 48_000,
            frame_size: 1024,
        };
        let mut effect = ReverbEffect::new(&audio_settings);

        let params = ReverbEffectParams {
            reverb: Reverb {
                reverb_times: [0.5; NUM_BANDS],
            },
        };

        let mut impulse_data = vec![0.0f32; 1024];
        impulse_data[0] = 1.0;
        let impulse = AudioBuffer::from_mono(&impulse_data);
        let mut output = AudioBuffer::new(1, 1024);

        let mut state = effect.apply(&params, &impulse, &mut output);
        assert_eq!(state, AudioEffectState::TailRemaining);

        let mut iterations = 0;
        while state == AudioEffectState::TailRemaining {
            state = effect.tail(&mut output);
            iterations += 1;
            assert!(iterations < 1000);
        }
    }
}
