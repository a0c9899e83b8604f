//! Sample-rate domain.
//!
//! ## Per-sample chain
//!
//! ```text
//! SharedFrequency ─► SquareOscillator ─► PulseGenerator ─► × output_gain
//!                                                              │
//!                                   shared input history (len = fft_size)
//!                                         │                 │
//!                                   FIR(active)       FIR(incoming)
//!                                         └── × gains ──────┘ ─► out
//! ```
//!
//! `Renderer::render` never allocates or blocks. New filters arrive
//! through the wait-free install queue at block boundaries; the crossfade
//! advances once per sample. Both slots read the same input history, so an
//! incoming filter starts with the full tail of recent pulses.
//!
//! `run` is the playback loop: it keeps the device ring topped up by
//! rendering fixed blocks, converting them to the device rate and pushing
//! them into the ring. It runs inside `spawn_blocking`.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, OnceLock,
};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{AudioProducer, Observer, Producer},
    config::VocoderConfig,
    filter::{FilterBank, FilterReceiver, Occupancy},
    frame::ImpulseResponse,
    pulse::{PulseGenerator, SharedFrequency, SquareOscillator},
};

/// Samples rendered per playback iteration (20 ms at 8 kHz).
pub const RENDER_BLOCK: usize = 160;

const DEFAULT_IDLE_SLEEP_MS: u64 = 2;

/// Counters shared between the session, renderer and device callback.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_received: AtomicUsize,
    pub frames_skipped: AtomicUsize,
    pub frames_rejected: AtomicUsize,
    pub filters_installed: AtomicUsize,
    pub crossfades_completed: AtomicUsize,
    pub blocks_rendered: AtomicUsize,
    pub underrun_samples: AtomicUsize,
    pub dropped_samples: AtomicUsize,
    /// Filters freed on the render thread because the retire channel was full.
    pub filters_released_on_render: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.frames_received.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
        self.frames_rejected.store(0, Ordering::Relaxed);
        self.filters_installed.store(0, Ordering::Relaxed);
        self.crossfades_completed.store(0, Ordering::Relaxed);
        self.blocks_rendered.store(0, Ordering::Relaxed);
        self.underrun_samples.store(0, Ordering::Relaxed);
        self.dropped_samples.store(0, Ordering::Relaxed);
        self.filters_released_on_render.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            filters_installed: self.filters_installed.load(Ordering::Relaxed),
            crossfades_completed: self.crossfades_completed.load(Ordering::Relaxed),
            blocks_rendered: self.blocks_rendered.load(Ordering::Relaxed),
            underrun_samples: self.underrun_samples.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
            filters_released_on_render: self.filters_released_on_render.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_received: usize,
    pub frames_skipped: usize,
    pub frames_rejected: usize,
    pub filters_installed: usize,
    pub crossfades_completed: usize,
    pub blocks_rendered: usize,
    pub underrun_samples: usize,
    pub dropped_samples: usize,
    pub filters_released_on_render: usize,
}

/// Owns every audio-graph node for one session run.
pub struct Renderer {
    frequency: Arc<SharedFrequency>,
    filters: FilterReceiver,
    bank: FilterBank,
    oscillator: SquareOscillator,
    pulses: PulseGenerator,
    /// Excitation history written twice (`i` and `i + len`) so the last
    /// `len` samples are always one contiguous slice.
    history: Vec<f32>,
    write_pos: usize,
    len: usize,
    /// Samples since the last non-zero excitation; past `len` the filters
    /// can only produce silence.
    quiet_for: usize,
    step_per_sample: f32,
    gain: f32,
    /// Cleared by the session on stop.
    alive: Arc<AtomicBool>,
    torn_down: bool,
    sample_rate: u32,
    diagnostics: Arc<SessionDiagnostics>,
}

impl Renderer {
    pub fn new(
        config: &VocoderConfig,
        frequency: Arc<SharedFrequency>,
        filters: FilterReceiver,
        alive: Arc<AtomicBool>,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Self {
        let len = config.fft_size;
        Self {
            frequency,
            filters,
            bank: FilterBank::new(config.crossfade_curve),
            oscillator: SquareOscillator::new(config.sample_rate),
            pulses: PulseGenerator::new(),
            history: vec![0.0; len * 2],
            write_pos: 0,
            len,
            quiet_for: len,
            step_per_sample: config.crossfade_step_per_sample(),
            gain: config.output_gain,
            alive,
            torn_down: false,
            sample_rate: config.sample_rate,
            diagnostics,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn occupancy(&self) -> Occupancy {
        self.bank.occupancy()
    }

    pub fn bank(&self) -> &FilterBank {
        &self.bank
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Fill `out` with the next samples. After the session stops, the
    /// filters are torn down once and the output is silence.
    pub fn render(&mut self, out: &mut [f32]) {
        if !self.is_alive() {
            self.teardown();
            out.fill(0.0);
            return;
        }

        while let Some(ir) = self.filters.try_recv() {
            if let Some(discarded) = self.bank.install(ir) {
                self.retire(discarded);
            }
            self.diagnostics
                .filters_installed
                .fetch_add(1, Ordering::Relaxed);
        }

        let frequency = self.frequency.load();
        for y in out.iter_mut() {
            let square = self.oscillator.next_sample(frequency);
            let x = self.pulses.next_sample(square) * self.gain;
            *y = self.filter_sample(x);

            if let Some(retired) = self.bank.advance(self.step_per_sample) {
                self.retire(retired);
                self.diagnostics
                    .crossfades_completed
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        self.diagnostics
            .blocks_rendered
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn filter_sample(&mut self, x: f32) -> f32 {
        let n = self.len;
        self.history[self.write_pos] = x;
        self.history[self.write_pos + n] = x;
        // Oldest → newest, ending with `x`.
        let start = self.write_pos + 1;
        self.write_pos = (self.write_pos + 1) % n;

        if x != 0.0 {
            self.quiet_for = 0;
        } else if self.quiet_for < n {
            self.quiet_for += 1;
        }
        if self.quiet_for >= n {
            return 0.0;
        }

        let window = &self.history[start..start + n];
        let (active_gain, incoming_gain) = self.bank.gains();
        let mut y = 0.0;
        if let Some(active) = self.bank.active() {
            y += active_gain * convolve_tail(window, active.samples());
        }
        if let Some(incoming) = self.bank.incoming() {
            y += incoming_gain * convolve_tail(window, incoming.samples());
        }
        y
    }

    /// Hand `ir` back to the control thread, counting it if it had to be
    /// freed here instead.
    #[inline]
    fn retire(&self, ir: Arc<ImpulseResponse>) {
        if !self.filters.retire(ir) {
            self.diagnostics
                .filters_released_on_render
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop both filter slots and reset the excitation state.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        for ir in self.bank.clear().into_iter().flatten() {
            self.retire(ir);
        }
        while let Some(ir) = self.filters.try_recv() {
            self.retire(ir);
        }
        self.pulses.reset();
        self.oscillator.reset();
        self.history.fill(0.0);
        self.write_pos = 0;
        self.quiet_for = self.len;
        self.torn_down = true;
        debug!("renderer torn down");
    }
}

/// `Σ h[k] · x[n − k]` where `window` ends at `x[n]`.
#[inline]
fn convolve_tail(window: &[f32], h: &[f32]) -> f32 {
    let m = h.len().min(window.len());
    window[window.len() - m..]
        .iter()
        .zip(h[..m].iter().rev())
        .map(|(x, h)| x * h)
        .sum()
}

/// Everything the playback loop needs, passed as one struct so the
/// `spawn_blocking` closure stays tidy.
pub struct PlaybackContext {
    pub renderer: Renderer,
    pub producer: AudioProducer,
    pub running: Arc<AtomicBool>,
    pub device_sample_rate: u32,
    /// Keep at least this many device-rate samples queued.
    pub target_fill: usize,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// Run the blocking playback loop until `ctx.running` becomes false.
pub fn run(mut ctx: PlaybackContext) {
    info!(
        synthesis_rate = ctx.renderer.sample_rate(),
        device_rate = ctx.device_sample_rate,
        target_fill = ctx.target_fill,
        "playback started"
    );

    let mut converter = match RateConverter::new(
        ctx.renderer.sample_rate(),
        ctx.device_sample_rate,
        RENDER_BLOCK,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to create rate converter: {e}");
            return;
        }
    };

    let mut block = vec![0f32; RENDER_BLOCK];

    loop {
        if !ctx.running.load(Ordering::Relaxed) || !ctx.renderer.is_alive() {
            break;
        }

        if ctx.producer.occupied_len() >= ctx.target_fill {
            std::thread::sleep(Duration::from_millis(idle_sleep_ms()));
            continue;
        }

        ctx.renderer.render(&mut block);
        let converted = converter.process(&block);
        if converted.is_empty() {
            continue;
        }

        let pushed = ctx.producer.push_slice(&converted);
        if pushed < converted.len() {
            let dropped = converted.len() - pushed;
            ctx.diagnostics
                .dropped_samples
                .fetch_add(dropped, Ordering::Relaxed);
            warn!(dropped, "device ring full: dropped rendered samples");
        }
    }

    // Flush the teardown path so slots are released on this thread.
    ctx.renderer.render(&mut []);

    let snap = ctx.diagnostics.snapshot();
    info!(
        blocks_rendered = snap.blocks_rendered,
        filters_installed = snap.filters_installed,
        crossfades_completed = snap.crossfades_completed,
        underrun_samples = snap.underrun_samples,
        dropped_samples = snap.dropped_samples,
        "playback stopped"
    );
    if snap.filters_released_on_render > 0 {
        warn!(
            count = snap.filters_released_on_render,
            "retired-filter channel overflowed; filters were freed on the render thread"
        );
    }
}

fn idle_sleep_ms() -> u64 {
    static IDLE_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *IDLE_SLEEP_MS.get_or_init(|| {
        std::env::var("PHONATE_RENDER_IDLE_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_IDLE_SLEEP_MS)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::INSTALL_QUEUE_CAPACITY;
    use crate::filter::filter_channel;

    fn config() -> VocoderConfig {
        VocoderConfig {
            fft_size: 16,
            sample_rate: 8_000,
            output_gain: 1.0,
            ..VocoderConfig::default()
        }
    }

    struct Rig {
        renderer: Renderer,
        frequency: Arc<SharedFrequency>,
        alive: Arc<AtomicBool>,
        tx: crate::filter::FilterSender,
        diagnostics: Arc<SessionDiagnostics>,
    }

    fn rig(config: &VocoderConfig) -> Rig {
        let frequency = Arc::new(SharedFrequency::new(0.0));
        let alive = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let (tx, rx) = filter_channel();
        let renderer = Renderer::new(
            config,
            Arc::clone(&frequency),
            rx,
            Arc::clone(&alive),
            Arc::clone(&diagnostics),
        );
        Rig {
            renderer,
            frequency,
            alive,
            tx,
            diagnostics,
        }
    }

    fn delta(len: usize, at: usize) -> Arc<ImpulseResponse> {
        let mut s = vec![0.0; len];
        s[at] = 1.0;
        Arc::new(ImpulseResponse::new(s))
    }

    #[test]
    fn retire_overflow_is_counted_not_logged() {
        let mut r = rig(&config());
        for _ in 0..2 {
            for _ in 0..INSTALL_QUEUE_CAPACITY {
                r.tx.send(delta(16, 0)).unwrap();
            }
            r.renderer.render(&mut [0.0; 1]);
        }
        // 126 preempted filters, 66 of them fit the retire channel.
        assert_eq!(r.diagnostics.snapshot().filters_released_on_render, 60);
        assert_eq!(r.tx.drain_retired(), INSTALL_QUEUE_CAPACITY + 2);
    }

    #[test]
    fn convolve_tail_matches_direct_form() {
        let window = [0.0, 0.0, 1.0, 0.0, 2.0];
        let h = [1.0, 0.5, 0.25];
        // x[n] = 2, x[n-1] = 0, x[n-2] = 1 → 2·1 + 0·0.5 + 1·0.25
        assert_eq!(convolve_tail(&window, &h), 2.25);
    }

    #[test]
    fn silent_without_filters_or_pitch() {
        let mut r = rig(&config());
        let mut out = [1.0f32; 64];
        r.renderer.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        r.tx.send(delta(16, 0)).unwrap();
        r.renderer.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0), "no pitch, no pulses");
    }

    #[test]
    fn delta_filter_reproduces_pulse_train() {
        let mut r = rig(&config());
        r.frequency.store(500.0); // 16-sample period at 8 kHz
        r.tx.send(delta(16, 0)).unwrap();
        let mut out = [0.0f32; 64];
        r.renderer.render(&mut out);
        let pulses: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > 0.5)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(pulses, vec![0, 16, 32, 48]);
        assert_eq!(r.renderer.occupancy(), Occupancy::Single);
    }

    #[test]
    fn delayed_tap_shifts_output() {
        let mut r = rig(&config());
        r.frequency.store(500.0);
        r.tx.send(delta(16, 5)).unwrap();
        let mut out = [0.0f32; 32];
        r.renderer.render(&mut out);
        assert_eq!(out[5], 1.0);
        assert_eq!(out[21], 1.0);
        assert_eq!(out.iter().filter(|s| **s != 0.0).count(), 2);
    }

    #[test]
    fn output_gain_scales_excitation() {
        let cfg = VocoderConfig {
            output_gain: 0.2,
            ..config()
        };
        let mut r = rig(&cfg);
        r.frequency.store(500.0);
        r.tx.send(delta(16, 0)).unwrap();
        let mut out = [0.0f32; 4];
        r.renderer.render(&mut out);
        assert!((out[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn crossfade_completes_and_retires_old_filter() {
        let cfg = config();
        let mut r = rig(&cfg);
        r.frequency.store(500.0);
        let old = delta(16, 0);
        let weak_old = Arc::downgrade(&old);
        r.tx.send(old).unwrap();
        let mut out = vec![0.0f32; 32];
        r.renderer.render(&mut out);

        r.tx.send(delta(16, 1)).unwrap();
        r.renderer.render(&mut out[..1]);
        assert_eq!(r.renderer.occupancy(), Occupancy::Dual);

        let mut long = vec![0.0f32; cfg.crossfade_samples() + 16];
        r.renderer.render(&mut long);
        assert_eq!(r.renderer.occupancy(), Occupancy::Single);
        assert_eq!(r.tx.drain_retired(), 1);
        assert!(weak_old.upgrade().is_none());

        let snap = r.diagnostics.snapshot();
        assert_eq!(snap.filters_installed, 2);
        assert_eq!(snap.crossfades_completed, 1);
    }

    #[test]
    fn crossfade_output_is_mix_of_both_filters() {
        let cfg = config();
        let mut r = rig(&cfg);
        r.frequency.store(500.0);
        r.tx.send(delta(16, 0)).unwrap();
        let mut out = vec![0.0f32; 16];
        r.renderer.render(&mut out);

        // Next pulse lands at the start of this block; old tap at 0, new at 2.
        r.tx.send(delta(16, 2)).unwrap();
        r.renderer.render(&mut out);
        assert!(out[0] > 0.99, "outgoing still dominant: {}", out[0]);
        assert!(out[2] > 0.0 && out[2] < 0.01, "incoming barely audible: {}", out[2]);
    }

    #[test]
    fn stop_tears_down_and_silences() {
        let mut r = rig(&config());
        r.frequency.store(500.0);
        r.tx.send(delta(16, 0)).unwrap();
        let mut out = [0.0f32; 8];
        r.renderer.render(&mut out);
        assert_eq!(r.renderer.occupancy(), Occupancy::Single);

        r.alive.store(false, Ordering::Release);
        let mut out = [1.0f32; 8];
        r.renderer.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(r.renderer.occupancy(), Occupancy::Empty);
        assert_eq!(r.tx.drain_retired(), 1);
    }
}
