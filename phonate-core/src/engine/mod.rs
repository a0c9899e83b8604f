//! `VocoderSession`: owns the whole audio graph for one voice.
//!
//! ## Lifecycle
//!
//! ```text
//! VocoderSession::new()
//!     └─► warm_up()              → predictor ready, status = WarmingUp → Idle
//!         └─► start()            → device open, playback spawned, status = Running
//!             │   push_frame() / process_image() / update_filter() / update_frequency()
//!             └─► stop()         → filters torn down, pulse state reset, status = Stopped
//! ```
//!
//! `start_offline()` is the device-less variant: it returns the `Renderer`
//! so the caller pulls samples itself (export, tests).
//!
//! ## Control path (one frame)
//!
//! ```text
//! Frame ─► validate ─► TemporalSmoother ─► Synthesizer ─► install queue ─► Renderer
//!                           │
//!                           └─ smoothed f0 ─► SharedFrequency ─────────────► oscillator
//! ```
//!
//! The whole path runs under one control lock, so installs reach the
//! renderer strictly in frame order and a frame never overtakes the one
//! before it.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS. `AudioOutput` is therefore
//! created *inside* the `spawn_blocking` closure so it never crosses a
//! thread boundary. A sync oneshot channel carries the open result back to
//! the `start()` caller.

pub mod render;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub use render::{DiagnosticsSnapshot, PlaybackContext, Renderer, SessionDiagnostics};

use crate::{
    audio::AudioOutput,
    buffering::{audio_ring_capacity, create_audio_ring},
    config::VocoderConfig,
    error::{Result, VocoderError},
    export::ExportSnapshot,
    filter::{filter_channel, FilterSender},
    frame::{validate_pitch, Frame, ImpulseResponse},
    ipc::events::{SessionStatus, SessionStatusEvent, SynthesisEvent},
    predictor::{ImageFrame, PredictorHandle},
    pulse::SharedFrequency,
    smoothing::TemporalSmoother,
    synthesis::{AperiodicityModel, Synthesizer},
};

/// Broadcast channel capacity for slow event consumers.
const BROADCAST_CAP: usize = 256;

/// Highest device rate the output ring is sized for.
const MAX_DEVICE_RATE: u32 = 192_000;

/// Control-side link to a live renderer.
struct RenderLink {
    filters: FilterSender,
    alive: Arc<AtomicBool>,
}

/// State touched only by the control domain.
struct ControlState {
    smoother: TemporalSmoother,
    synthesizer: Synthesizer,
    link: Option<RenderLink>,
    /// Newest installed filter and the f0 it was built for.
    latest: Option<(Arc<ImpulseResponse>, f64)>,
}

/// The top-level session handle.
///
/// `VocoderSession` is `Send + Sync`; wrap it in an `Arc` to share it
/// between a frame-producing task and event consumers.
pub struct VocoderSession {
    config: VocoderConfig,
    predictor: PredictorHandle,
    control: Mutex<ControlState>,
    /// Oscillator pitch, single writer (this session) / single reader.
    frequency: Arc<SharedFrequency>,
    /// `true` while a renderer is attached.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
    synthesis_tx: broadcast::Sender<SynthesisEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    seq: AtomicU64,
    diagnostics: Arc<SessionDiagnostics>,
}

impl VocoderSession {
    /// Create a session. Does not open any device: call `warm_up()` then
    /// `start()`.
    ///
    /// # Errors
    /// `InvalidInput` if the synthesizer cannot be planned for the config.
    pub fn new(config: VocoderConfig, predictor: PredictorHandle) -> Result<Self> {
        let mut config = config;
        config.normalize();
        let synthesizer = Synthesizer::new(config.fft_size, config.sample_rate)?;
        Ok(Self::with_synthesizer(config, predictor, synthesizer))
    }

    /// Like `new`, with a custom aperiodicity model in the synthesizer.
    pub fn with_aperiodicity(
        config: VocoderConfig,
        predictor: PredictorHandle,
        aperiodicity: Box<dyn AperiodicityModel>,
    ) -> Result<Self> {
        let mut config = config;
        config.normalize();
        let synthesizer =
            Synthesizer::with_aperiodicity(config.fft_size, config.sample_rate, aperiodicity)?;
        Ok(Self::with_synthesizer(config, predictor, synthesizer))
    }

    fn with_synthesizer(
        config: VocoderConfig,
        predictor: PredictorHandle,
        synthesizer: Synthesizer,
    ) -> Self {
        let (synthesis_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let smoother = TemporalSmoother::new(
            config.smoothing_mode,
            config.spectral_window,
            config.f0_window,
        );

        info!(
            fft_size = config.fft_size,
            sample_rate = config.sample_rate,
            smoothing = ?config.smoothing_mode,
            crossfade_samples = config.crossfade_samples(),
            "vocoder session created"
        );

        Self {
            config,
            predictor,
            control: Mutex::new(ControlState {
                smoother,
                synthesizer,
                link: None,
                latest: None,
            }),
            frequency: Arc::new(SharedFrequency::default()),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            synthesis_tx,
            status_tx,
            seq: AtomicU64::new(0),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    pub fn config(&self) -> &VocoderConfig {
        &self.config
    }

    /// Load the predictor (weights, dummy inference).
    pub fn warm_up(&self) -> Result<()> {
        self.set_status(SessionStatus::WarmingUp, None);
        info!("warming up predictor");
        if let Err(e) = self.predictor.0.lock().warm_up() {
            self.set_status(SessionStatus::Error, Some(e.to_string()));
            return Err(e);
        }
        self.set_status(SessionStatus::Idle, None);
        info!("predictor ready");
        Ok(())
    }

    /// Open the default output device and start playback.
    ///
    /// Blocks until the device is confirmed open (or fails). Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    /// - `AlreadyRunning` if already started.
    /// - `NoDefaultOutputDevice` / `AudioDevice` / `AudioStream` on device
    ///   failure. The DSP state is left intact, so `start()` may be retried.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start playback on a preferred output device name, falling back to
    /// the default device.
    pub fn start_with_device(&self, preferred_output_device: Option<String>) -> Result<()> {
        let renderer = self.attach()?;

        let capacity = audio_ring_capacity(MAX_DEVICE_RATE, self.config.output_latency_ms);
        let (producer, consumer) = create_audio_ring(capacity);

        let running = Arc::clone(&self.running);
        let diagnostics = Arc::clone(&self.diagnostics);
        let latency_ms = self.config.output_latency_ms;

        // Sync oneshot: playback thread reports open success/failure.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // ── Open device (must happen on THIS thread: cpal::Stream is !Send) ──
            let output = match AudioOutput::open_with_preference(
                consumer,
                Arc::clone(&running),
                preferred_output_device.as_deref(),
                Arc::clone(&diagnostics),
            ) {
                Ok(o) => {
                    let _ = open_tx.send(Ok(o.sample_rate));
                    o
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };

            let device_sample_rate = output.sample_rate;
            let target_fill = (device_sample_rate as usize * latency_ms as usize / 1000).max(1);

            // ── Render until stopped ──
            render::run(PlaybackContext {
                renderer,
                producer,
                running,
                device_sample_rate,
                target_fill,
                diagnostics,
            });

            // Stream drops here, releasing the device on this thread.
            drop(output);
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(device_rate = rate, "session started, playing");
                Ok(())
            }
            Ok(Err(e)) => {
                self.unlink();
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                self.unlink();
                self.set_status(SessionStatus::Error, Some("playback failed to start".into()));
                Err(VocoderError::Other(anyhow::anyhow!(
                    "playback task died unexpectedly"
                )))
            }
        }
    }

    /// Start without an audio device. The caller drives the returned
    /// renderer at the synthesis rate.
    pub fn start_offline(&self) -> Result<Renderer> {
        let renderer = self.attach()?;
        info!("session started offline");
        Ok(renderer)
    }

    /// Tear down both filter slots, reset smoothing and silence the
    /// oscillator. The session may be started again afterwards.
    ///
    /// # Errors
    /// `NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(VocoderError::NotRunning);
        }
        self.detach();
        self.set_status(SessionStatus::Stopped, None);
        info!("session stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Install an externally built impulse response.
    pub fn update_filter(&self, ir: ImpulseResponse) -> Result<Arc<ImpulseResponse>> {
        let mut control = self.control.lock();
        let link = control.link.as_mut().ok_or(VocoderError::NotRunning)?;
        let ir = Arc::new(ir);
        link.filters.send(Arc::clone(&ir))?;
        link.filters.drain_retired();
        control.latest = Some((Arc::clone(&ir), self.frequency.load() as f64));
        Ok(ir)
    }

    /// Set the oscillator pitch directly.
    ///
    /// # Errors
    /// `InvalidInput` for f0 ≤ 0, non-finite, or at or above Nyquist.
    pub fn update_frequency(&self, f0: f64) -> Result<()> {
        validate_pitch(f0, self.config.sample_rate)?;
        self.frequency.store(f0 as f32);
        let mut control = self.control.lock();
        if let Some((_, latest_f0)) = control.latest.as_mut() {
            *latest_f0 = f0;
        }
        Ok(())
    }

    /// Run one frame through smoothing and synthesis and queue the result.
    ///
    /// Returns the installed impulse response.
    ///
    /// # Errors
    /// - `NotRunning` before `start()`.
    /// - `SpectrumLength` / `InvalidInput` for malformed frames; these are
    ///   caller-contract violations.
    /// - `FilterQueueFull` if the renderer has stopped draining.
    ///
    /// On any error the smoothing windows, pitch and installed filter are
    /// left as they were.
    pub fn push_frame(&self, frame: &Frame) -> Result<Arc<ImpulseResponse>> {
        let mut guard = self.control.lock();
        let control = &mut *guard;
        let link = control.link.as_mut().ok_or(VocoderError::NotRunning)?;

        self.diagnostics
            .frames_received
            .fetch_add(1, Ordering::Relaxed);

        let checked = frame
            .validate(self.config.bins())
            .and_then(|()| validate_pitch(frame.f0, self.config.sample_rate));
        if let Err(e) = checked {
            self.reject(&e);
            return Err(e);
        }

        // ── 1. Smooth (staged: the windows only change once installed) ──
        let staged = control.smoother.stage(frame);

        // ── 2. Synthesize ──
        let ir = match control.synthesizer.synthesize(
            &staged.smoothed.spectrum,
            staged.smoothed.f0,
            self.config.fractional_time_shift,
        ) {
            Ok(ir) => Arc::new(ir),
            Err(e) => {
                self.reject(&e);
                return Err(e);
            }
        };

        // ── 3. Hand off to the renderer ──
        if let Err(e) = link.filters.send(Arc::clone(&ir)) {
            warn!("filter install dropped: {e}");
            return Err(e);
        }
        let smoothed = control.smoother.commit(staged);
        self.frequency.store(smoothed.f0 as f32);
        let retired = link.filters.drain_retired();
        control.latest = Some((Arc::clone(&ir), smoothed.f0));

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        debug!(seq, f0 = smoothed.f0, retired, "frame synthesized");
        let _ = self.synthesis_tx.send(SynthesisEvent {
            seq,
            f0: smoothed.f0,
            peak_index: ir.peak_index(),
            rms: ir.rms(),
        });

        Ok(ir)
    }

    /// Accept a predictor result. `None` (predictor not ready) skips the
    /// cycle entirely: no smoothing, no install, no eviction.
    pub fn push_prediction(&self, prediction: Option<Frame>) -> Result<Option<Arc<ImpulseResponse>>> {
        match prediction {
            Some(frame) => self.push_frame(&frame).map(Some),
            None => {
                if !self.is_running() {
                    return Err(VocoderError::NotRunning);
                }
                self.diagnostics
                    .frames_skipped
                    .fetch_add(1, Ordering::Relaxed);
                debug!("predictor not ready; frame skipped");
                Ok(None)
            }
        }
    }

    /// Predict from `image` and push the result.
    pub fn process_image(&self, image: &ImageFrame) -> Result<Option<Arc<ImpulseResponse>>> {
        let prediction = self.predictor.0.lock().predict(image)?;
        self.push_prediction(prediction)
    }

    /// The newest installed filter and its f0, for offline rendering.
    pub fn export_snapshot(&self) -> Option<ExportSnapshot> {
        self.control
            .lock()
            .latest
            .as_ref()
            .map(|(ir, f0)| ExportSnapshot {
                impulse_response: Arc::clone(ir),
                f0: *f0,
                sample_rate: self.config.sample_rate,
            })
    }

    /// Current oscillator pitch in Hz (0 when silent).
    pub fn frequency(&self) -> f32 {
        self.frequency.load()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn subscribe_synthesis(&self) -> broadcast::Receiver<SynthesisEvent> {
        self.synthesis_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Build a renderer wired to this session and mark it running.
    fn attach(&self) -> Result<Renderer> {
        let mut control = self.control.lock();
        if self.running.load(Ordering::SeqCst) || control.link.is_some() {
            return Err(VocoderError::AlreadyRunning);
        }

        self.diagnostics.reset();
        let (filters, receiver) = filter_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let renderer = Renderer::new(
            &self.config,
            Arc::clone(&self.frequency),
            receiver,
            Arc::clone(&alive),
            Arc::clone(&self.diagnostics),
        );
        control.link = Some(RenderLink { filters, alive });
        self.running.store(true, Ordering::SeqCst);
        drop(control);

        self.set_status(SessionStatus::Running, None);
        Ok(renderer)
    }

    /// Disconnect the renderer, leaving smoothing and pitch untouched.
    fn unlink(&self) {
        if let Some(link) = self.control.lock().link.take() {
            link.alive.store(false, Ordering::Release);
            link.filters.drain_retired();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Disconnect the renderer and reset control-side state.
    fn detach(&self) {
        self.unlink();
        let mut control = self.control.lock();
        control.smoother.reset();
        control.latest = None;
        self.frequency.store(0.0);
    }

    fn reject(&self, e: &VocoderError) {
        self.diagnostics
            .frames_rejected
            .fetch_add(1, Ordering::Relaxed);
        error!("rejected frame: {e}");
    }

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for VocoderSession {
    fn drop(&mut self) {
        if let Some(link) = self.control.get_mut().link.take() {
            link.alive.store(false, Ordering::Release);
        }
        self.running.store(false, Ordering::SeqCst);
    }
}
