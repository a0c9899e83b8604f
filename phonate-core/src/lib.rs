//! # phonate-core
//!
//! Frame-synchronous speech vocoder: spectral envelope + f0 in, voiced
//! audio out.
//!
//! ## Architecture
//!
//! ```text
//! control domain                               sample-rate domain
//! ──────────────                               ──────────────────
//! Predictor ─► Frame ─► TemporalSmoother        SquareOscillator ◄── SharedFrequency
//!                            │                        │
//!                       Synthesizer                PulseGenerator × gain
//!                            │                        │
//!               Arc<ImpulseResponse> ──SPSC──►  FilterBank (active ⇄ incoming, crossfade)
//!                                                     │
//!                                         rubato ─► SPSC ring ─► cpal output
//! ```
//!
//! The render path never locks or allocates; filters are handed over
//! through a wait-free queue and retired filters are dropped on the
//! control thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod filter;
pub mod frame;
pub mod ipc;
pub mod predictor;
pub mod pulse;
pub mod smoothing;
pub mod synthesis;

// Convenience re-exports for downstream crates
pub use config::VocoderConfig;
pub use engine::{DiagnosticsSnapshot, Renderer, VocoderSession};
pub use error::{Result, VocoderError};
pub use export::{render_offline, write_wav, ExportSnapshot};
pub use filter::{CrossfadeCurve, FilterBank, Occupancy};
pub use frame::{Frame, ImpulseResponse, PowerSpectrum, SmoothedFrame};
pub use ipc::events::{SessionStatus, SessionStatusEvent, SynthesisEvent};
pub use predictor::{ImageFrame, Predictor, PredictorHandle, QuantizationParams, StubPredictor};
pub use smoothing::{SmoothingMode, StagedFrame, TemporalSmoother, WindowPolicy};
pub use synthesis::{AperiodicityModel, Synthesizer, ZeroAperiodicity};
