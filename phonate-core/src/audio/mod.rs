//! Audio output via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not** block on a mutex or perform I/O. This module satisfies
//! that contract by reading from an SPSC ring buffer consumer whose
//! `pop_slice` is lock-free; the playback loop keeps the ring topped up.
//! When the ring runs dry the callback plays silence and counts the gap.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioOutput` must therefore be created and dropped on the same
//! thread. The session does this inside `spawn_blocking`.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::{
    buffering::AudioConsumer,
    engine::SessionDiagnostics,
    error::{Result, VocoderError},
};
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::Ordering;
use std::sync::{atomic::AtomicBool, Arc};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active output stream.
///
/// **Not `Send`** on Windows/macOS. Create and drop it on one OS thread.
pub struct AudioOutput {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Sample rate the device runs at (Hz).
    pub sample_rate: u32,
    pub channels: u16,
}

/// Frames handled per pass of the output callback. Larger device buffers
/// are split into passes of this size.
#[cfg(feature = "audio-cpal")]
const FEED_BLOCK: usize = 1024;

/// Callback-side reader: pulls mono samples from the ring into a fixed
/// buffer, zero-filling and counting whatever is missing.
#[cfg(feature = "audio-cpal")]
struct OutputFeed {
    consumer: AudioConsumer,
    mono: Vec<f32>,
    running: Arc<AtomicBool>,
    diagnostics: Arc<SessionDiagnostics>,
}

#[cfg(feature = "audio-cpal")]
impl OutputFeed {
    fn new(
        consumer: AudioConsumer,
        running: Arc<AtomicBool>,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Self {
        Self {
            consumer,
            mono: vec![0.0; FEED_BLOCK],
            running,
            diagnostics,
        }
    }

    /// Next `frames` mono samples; `frames` must not exceed `FEED_BLOCK`.
    #[inline]
    fn next_block(&mut self, frames: usize) -> &[f32] {
        use crate::buffering::Consumer;

        let block = &mut self.mono[..frames.min(FEED_BLOCK)];
        if !self.running.load(Ordering::Relaxed) {
            block.fill(0.0);
            return block;
        }
        let got = self.consumer.pop_slice(block);
        if got < block.len() {
            self.diagnostics
                .underrun_samples
                .fetch_add(block.len() - got, Ordering::Relaxed);
            block[got..].fill(0.0);
        }
        for s in block.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
        block
    }

    /// Fill an interleaved device buffer, fanning mono out to `channels`.
    #[inline]
    fn fill<T: Copy>(&mut self, data: &mut [T], channels: usize, convert: impl Fn(f32) -> T) {
        for pass in data.chunks_mut(FEED_BLOCK * channels) {
            let mono = self.next_block(pass.len() / channels);
            for (frame, s) in pass.chunks_mut(channels).zip(mono) {
                frame.fill(convert(*s));
            }
        }
    }
}

impl AudioOutput {
    /// Open an output device by preferred name, otherwise fall back to the
    /// default output device and then the first available one.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        consumer: AudioConsumer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.output_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred output device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list output devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_output_device() {
            default
        } else {
            let mut devices = host
                .output_devices()
                .map_err(|e| VocoderError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(VocoderError::NoDefaultOutputDevice)?;
            warn!("no default output device, falling back to first available output");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let supported = device
            .default_output_config()
            .map_err(|e| VocoderError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "output config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ch = channels.max(1) as usize;
        // Mono is fanned out to every device channel.
        let mut feed = OutputFeed::new(consumer, running, diagnostics);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| feed.fill(data, ch, |s| s),
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    feed.fill(data, ch, |s| (s * i16::MAX as f32) as i16)
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::U16 => device.build_output_stream(
                &config,
                move |data: &mut [u16], _info| {
                    feed.fill(data, ch, |s| ((s * 0.5 + 0.5) * u16::MAX as f32) as u16)
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            fmt => {
                return Err(VocoderError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VocoderError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VocoderError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
            channels,
        })
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioOutput {
    pub fn open_with_preference(
        _consumer: AudioConsumer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
        _diagnostics: Arc<SessionDiagnostics>,
    ) -> Result<Self> {
        Err(VocoderError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(all(test, feature = "audio-cpal"))]
mod tests {
    use super::*;
    use crate::buffering::{create_audio_ring, Producer};

    #[test]
    fn large_device_buffers_are_split_into_fixed_passes() {
        let (mut producer, consumer) = create_audio_ring(8_192);
        let samples: Vec<f32> = (0..3_000).map(|i| (i % 7) as f32 * 0.1).collect();
        assert_eq!(producer.push_slice(&samples), samples.len());

        let diagnostics = Arc::new(SessionDiagnostics::default());
        let mut feed = OutputFeed::new(
            consumer,
            Arc::new(AtomicBool::new(true)),
            Arc::clone(&diagnostics),
        );
        let mut data = vec![1f32; 2 * 4_000];
        feed.fill(&mut data, 2, |s| s);

        assert_eq!(feed.mono.len(), FEED_BLOCK);
        assert_eq!(data[2 * 2_999], samples[2_999]);
        assert_eq!(data[2 * 2_999 + 1], samples[2_999]);
        assert!(data[2 * 3_000..].iter().all(|s| *s == 0.0));
        assert_eq!(diagnostics.snapshot().underrun_samples, 1_000);
    }

    #[test]
    fn stopped_feed_plays_silence() {
        let (mut producer, consumer) = create_audio_ring(1_024);
        producer.push_slice(&[0.5; 64]);
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let mut feed = OutputFeed::new(consumer, Arc::new(AtomicBool::new(false)), diagnostics);
        let mut data = vec![1i16; 64];
        feed.fill(&mut data, 1, |s| (s * i16::MAX as f32) as i16);
        assert!(data.iter().all(|s| *s == 0));
    }
}
