use super::AudioEffectState;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;
use crate::fft::Fft;
use crate::impulse_response::ImpulseResponse;
use rustfft::num_complex::Complex32;

/// A multi-channel impulse response, partitioned and transformed into the
/// frequency domain for overlap-save convolution.
///
/// Built on a simulation thread from a reconstructed [`ImpulseResponse`],
/// then handed to the audio thread; applying the convolution never touches
/// the time-domain IR.
#[derive(Debug, Clone)]
pub struct FftIr {
    num_channels: usize,
    num_partitions: usize,
    num_samples: usize,
    frame_size: usize,
    // spectra[channel][partition * bins + bin]
    spectra: Vec<Vec<Complex32>>,
}

impl FftIr {
    /// Partitions and transforms an impulse response, using `frame_size`
    /// samples per partition.
    pub fn new(ir: &ImpulseResponse, frame_size: usize) -> Self {
        let fft = Fft::new(2 * frame_size);
        let num_bins = fft.num_real_bins();
        let num_samples = ir.num_samples();
        let num_partitions = num_samples.div_ceil(frame_size);

        let mut spectra = Vec::with_capacity(ir.num_channels());
        let mut padded = vec![0.0f32; 2 * frame_size];

        for channel in 0..ir.num_channels() {
            let samples = ir.channel(channel);
            let mut channel_spectra = vec![Complex32::default(); num_partitions * num_bins];

            for partition in 0..num_partitions {
                let start = partition * frame_size;
                let end = (start + frame_size).min(num_samples);

                padded.fill(0.0);
                padded[..end - start].copy_from_slice(&samples[start..end]);

                fft.forward_real(
                    &mut padded,
                    &mut channel_spectra[partition * num_bins..(partition + 1) * num_bins],
                );
            }

            spectra.push(channel_spectra);
        }

        Self {
            num_channels: ir.num_channels(),
            num_partitions,
            num_samples,
            frame_size,
            spectra,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    fn partition(&self, channel: usize, partition: usize, num_bins: usize) -> &[Complex32] {
        &self.spectra[channel][partition * num_bins..(partition + 1) * num_bins]
    }
}

/// Convolves a mono signal with a multi-channel IR using partitioned
/// overlap-save convolution.
///
/// Each frame, the input block's spectrum enters a frequency-domain delay
/// line; the output is the inverse transform of the sum of products of past
/// input spectra with the corresponding IR partitions.
#[derive(Debug)]
pub struct OverlapSaveConvolutionEffect {
    frame_size: usize,
    num_channels: usize,
    max_partitions: usize,
    fft: Fft,
    input_buffer: Vec<f32>,
    // Frequency-domain delay line of past input spectra.
    fdl: Vec<Vec<Complex32>>,
    fdl_position: usize,
    accumulator: Vec<Complex32>,
    scratch_time: Vec<f32>,
    num_tail_samples_remaining: usize,
}

/// Settings used to create an [`OverlapSaveConvolutionEffect`].
#[derive(Debug, Copy, Clone)]
pub struct OverlapSaveConvolutionEffectSettings {
    /// Number of IR (and output) channels.
    pub num_channels: usize,

    /// The largest IR length (in samples) this effect will be asked to
    /// convolve with.
    pub ir_size: usize,
}

/// Parameters for applying an [`OverlapSaveConvolutionEffect`].
#[derive(Debug)]
pub struct OverlapSaveConvolutionEffectParams<'a> {
    /// The frequency-domain IR to convolve with.
    pub fft_ir: &'a FftIr,

    /// Number of channels of `fft_ir` to render.
    pub num_channels: usize,

    /// Number of IR samples to render.
    pub num_samples: usize,
}

impl OverlapSaveConvolutionEffect {
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &OverlapSaveConvolutionEffectSettings,
    ) -> Result<Self, EchofieldError> {
        if settings.num_channels == 0 || settings.ir_size == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        let frame_size = audio_settings.frame_size;
        let fft = Fft::new(2 * frame_size);
        let num_bins = fft.num_real_bins();
        let max_partitions = settings.ir_size.div_ceil(frame_size);

        Ok(Self {
            frame_size,
            num_channels: settings.num_channels,
            max_partitions,
            fft,
            input_buffer: vec![0.0; 2 * frame_size],
            fdl: vec![vec![Complex32::default(); num_bins]; max_partitions],
            fdl_position: 0,
            accumulator: vec![Complex32::default(); num_bins],
            scratch_time: vec![0.0; 2 * frame_size],
            num_tail_samples_remaining: 0,
        })
    }

    pub fn reset(&mut self) {
        self.input_buffer.fill(0.0);
        for spectrum in &mut self.fdl {
            spectrum.fill(Complex32::default());
        }
        self.fdl_position = 0;
        self.num_tail_samples_remaining = 0;
    }

    pub fn apply(
        &mut self,
        params: &OverlapSaveConvolutionEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_channels(), 1);
        assert_eq!(input.num_samples(), self.frame_size);
        assert_eq!(output.num_samples(), self.frame_size);
        assert!(output.num_channels() >= params.num_channels.min(self.num_channels));

        self.push_input(Some(input.channel(0)));
        self.render(params, output);

        self.num_tail_samples_remaining = params.num_samples;
        if self.num_tail_samples_remaining > 0 {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }

    /// Renders a frame of tail using the IR from the previous apply call.
    pub fn tail_with_ir(
        &mut self,
        params: &OverlapSaveConvolutionEffectParams,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        self.push_input(None);
        self.render(params, output);

        self.num_tail_samples_remaining = self
            .num_tail_samples_remaining
            .saturating_sub(self.frame_size);
        if self.num_tail_samples_remaining > 0 {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }

    /// Drains tail samples as silence when the IR is no longer available.
    pub fn tail(&mut self, output: &mut AudioBuffer) -> AudioEffectState {
        output.make_silent();
        self.push_input(None);

        self.num_tail_samples_remaining = self
            .num_tail_samples_remaining
            .saturating_sub(self.frame_size);
        if self.num_tail_samples_remaining > 0 {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }

    pub fn tail_size(&self) -> usize {
        self.num_tail_samples_remaining
    }

    fn push_input(&mut self, input: Option<&[f32]>) {
        let frame_size = self.frame_size;

        self.input_buffer.copy_within(frame_size.., 0);
        match input {
            Some(samples) => self.input_buffer[frame_size..].copy_from_slice(samples),
            None => self.input_buffer[frame_size..].fill(0.0),
        }

        self.fdl_position = (self.fdl_position + 1) % self.max_partitions;
        self.scratch_time.copy_from_slice(&self.input_buffer);

        let spectrum = &mut self.fdl[self.fdl_position];
        self.fft.forward_real(&mut self.scratch_time, spectrum);
    }

    fn render(&mut self, params: &OverlapSaveConvolutionEffectParams, output: &mut AudioBuffer) {
        let num_bins = self.fft.num_real_bins();
        let num_channels = params
            .num_channels
            .min(self.num_channels)
            .min(params.fft_ir.num_channels());
        let num_partitions = params
            .fft_ir
            .num_partitions()
            .min(self.max_partitions)
            .min(params.num_samples.div_ceil(self.frame_size));

        for channel in 0..num_channels {
            self.accumulator.fill(Complex32::default());

            for partition in 0..num_partitions {
                let fdl_index =
                    (self.fdl_position + self.max_partitions - partition) % self.max_partitions;
                let input_spectrum = &self.fdl[fdl_index];
                let ir_spectrum = params.fft_ir.partition(channel, partition, num_bins);

                for ((accumulated, &x), &h) in self
                    .accumulator
                    .iter_mut()
                    .zip(input_spectrum.iter())
                    .zip(ir_spectrum.iter())
                {
                    *accumulated += x * h;
                }
            }

            self.fft
                .inverse_real(&mut self.accumulator, &mut self.scratch_time);

            // Overlap-save: only the second half of the block is valid.
            output
                .channel_mut(channel)
                .copy_from_slice(&self.scratch_time[self.frame_size..]);
        }

        for channel in num_channels..output.num_channels() {
            output.channel_mut(channel).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impulse_response::ImpulseResponseSettings;
    use approx::assert_relative_eq;

    /// Reference direct convolution.
    fn convolve_direct(signal: &[f32], ir: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; signal.len() + ir.len() - 1];
        for (i, &x) in signal.iter().enumerate() {
            for (j, &h) in ir.iter().enumerate() {
                out[i + j] += x * h;
            }
        }
        out
    }

    #[test]
    fn test_matches_direct_convolution() {
        let audio_settings = AudioSettings {
            sampling_rate: 48_000,
            frame_size: 64,
        };

        // A 150-sample IR spans three partitions.
        let mut ir = ImpulseResponse::new(&ImpulseResponseSettings {
            duration: 150.0 / 48_000.0,
            order: 0,
            sampling_rate: 48_000,
        });
        for (i, sample) in ir.channel_mut(0).iter_mut().enumerate() {
            *sample = ((i as f32) * 0.11).sin() * (-(i as f32) / 40.0).exp();
        }
        let ir_samples: Vec<f32> = ir.channel(0).to_vec();

        let fft_ir = FftIr::new(&ir, audio_settings.frame_size);

        let mut effect = OverlapSaveConvolutionEffect::try_new(
            &audio_settings,
            &OverlapSaveConvolutionEffectSettings {
                num_channels: 1,
                ir_size: 256,
            },
        )
        .unwrap();

        let signal: Vec<f32> = (0..256).map(|i| ((i as f32) * 0.37).cos()).collect();
        let expected = convolve_direct(&signal, &ir_samples);

        let mut rendered = Vec::new();
        let mut output = AudioBuffer::new(1, 64);
        for block in signal.chunks(64) {
            let input = AudioBuffer::from_mono(block);
            effect.apply(
                &OverlapSaveConvolutionEffectParams {
                    fft_ir: &fft_ir,
                    num_channels: 1,
                    num_samples: ir_samples.len(),
                },
                &input,
                &mut output,
            );
            rendered.extend_from_slice(output.channel(0));
        }

        // Drain the tail.
        let params = OverlapSaveConvolutionEffectParams {
            fft_ir: &fft_ir,
            num_channels: 1,
            num_samples: ir_samples.len(),
        };
        let mut state = AudioEffectState::TailRemaining;
        while state == AudioEffectState::TailRemaining {
            state = effect.tail_with_ir(&params, &mut output);
            rendered.extend_from_slice(output.channel(0));
        }

        for (i, &value) in expected.iter().enumerate() {
            assert_relative_eq!(rendered[i], value, max_relative = 1e-3, epsilon = 1e-3);
        }
    }
}
