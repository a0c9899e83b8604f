//! Session event payloads.
//!
//! | Event | Emitted when |
//! |-------|--------------|
//! | `SynthesisEvent` | a frame has been synthesized and queued for install |
//! | `SessionStatusEvent` | the session changes state |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Synthesis events
// ---------------------------------------------------------------------------

/// One synthesized filter, summarised for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Smoothed f0 (Hz) the filter was synthesized for.
    pub f0: f64,
    /// Index of the largest-magnitude tap.
    pub peak_index: usize,
    /// RMS of the impulse response.
    pub rms: f32,
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Lifecycle state of a `VocoderSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, `start()` not yet called.
    Idle,
    /// Predictor is loading.
    WarmingUp,
    /// Audio graph running and accepting frames.
    Running,
    /// Stopped; the session may be started again.
    Stopped,
    /// Device or render failure.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_event_serializes_with_camel_case_fields() {
        let event = SynthesisEvent {
            seq: 4,
            f0: 110.0,
            peak_index: 512,
            rms: 0.25,
        };
        let json = serde_json::to_value(&event).expect("serialize synthesis event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["peakIndex"], 512);
        assert_eq!(json["f0"], 110.0);

        let round_trip: SynthesisEvent =
            serde_json::from_value(json).expect("deserialize synthesis event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = SessionStatusEvent {
            status: SessionStatus::WarmingUp,
            detail: Some("loading predictor".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "warmingup");
        assert_eq!(json["detail"], "loading predictor");

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, SessionStatus::WarmingUp);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<SessionStatus>(r#""Running""#).is_err());
    }
}
