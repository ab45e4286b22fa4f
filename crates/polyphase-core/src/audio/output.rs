//! Native audio output using cpal.

use super::synth::Synth;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};

/// Default output device driving a [`Synth`].
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// Open the default output device.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("No output device available".to_string()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| Error::Device(format!("Failed to get default config: {}", e)))?;

        if supported.sample_format() != SampleFormat::F32 {
            return Err(Error::Device(format!(
                "Unsupported sample format {:?} (need f32)",
                supported.sample_format()
            )));
        }

        let config: StreamConfig = supported.into();
        log::info!(
            "Audio device: {} ({} Hz, {} channels)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels
        );

        Ok(Self {
            device,
            config,
            stream: None,
        })
    }

    /// Device sample rate; create the synth with this.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Start streaming the synth to the device.
    pub fn start(&mut self, mut synth: Synth) -> Result<()> {
        let channels = self.config.channels as usize;
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    synth.render(data, channels);
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::Device(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| Error::Device(format!("Failed to play stream: {}", e)))?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Pause and drop the stream.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| Error::Device(format!("Failed to stop stream: {}", e)))?;
        }
        Ok(())
    }
}
