//! Multi-channel impulse responses.

use crate::sh;

/// An Ambisonic impulse response, stored as `channels × samples`.
///
/// Energy fields are much smaller than impulse responses, so they are what
/// gets stored in baked data; impulse responses are reconstructed from them
/// at runtime for convolution.
#[derive(Debug, Clone)]
pub struct ImpulseResponse {
    num_channels: usize,
    num_samples: usize,
    data: Vec<f32>,
}

impl ImpulseResponse {
    pub fn new(settings: &ImpulseResponseSettings) -> Self {
        let num_channels = sh::num_coeffs_for_order(settings.order);
        let num_samples = (settings.duration * settings.sampling_rate as f32).ceil() as usize;

        Self {
            num_channels,
            num_samples,
            data: vec![0.0; num_channels * num_samples],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn channel(&self, channel_index: usize) -> &[f32] {
        &self.data[channel_index * self.num_samples..(channel_index + 1) * self.num_samples]
    }

    pub fn channel_mut(&mut self, channel_index: usize) -> &mut [f32] {
        &mut self.data[channel_index * self.num_samples..(channel_index + 1) * self.num_samples]
    }

    pub fn reset(&mut self) {
        self.data.fill(0.0);
    }
}

/// Settings used to create an [`ImpulseResponse`].
#[derive(Debug, Copy, Clone)]
pub struct ImpulseResponseSettings {
    /// Duration, in seconds.
    pub duration: f32,

    /// Ambisonic order. Determines the number of channels.
    pub order: usize,

    /// Sampling rate, in Hz.
    pub sampling_rate: u32,
}
