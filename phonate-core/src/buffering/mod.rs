//! Lock-free SPSC rings between the control, render and device threads.
//!
//! Uses `ringbuf::HeapRb` whose `try_push` / `push_slice` / `pop_slice`
//! are wait-free and safe to call from a real-time audio callback.

use std::sync::Arc;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

use crate::frame::ImpulseResponse;

/// Producer half of the device ring, held by the render thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the device ring, held by the cpal output callback.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Producer half of the filter install queue, held by the session.
pub type InstallProducer = ringbuf::HeapProd<Arc<ImpulseResponse>>;

/// Consumer half of the filter install queue, held by the renderer.
pub type InstallConsumer = ringbuf::HeapCons<Arc<ImpulseResponse>>;

/// Pending installs allowed in flight. Frames arrive at camera rate while
/// the renderer drains once per block, so this never fills in practice.
pub const INSTALL_QUEUE_CAPACITY: usize = 64;

/// Device ring capacity for `latency_ms` of audio at `sample_rate`,
/// doubled so the render thread can stay one block ahead.
pub fn audio_ring_capacity(sample_rate: u32, latency_ms: u32) -> usize {
    let per_ms = (sample_rate as usize).div_ceil(1000);
    (per_ms * latency_ms.max(1) as usize * 2).max(1024)
}

/// Create a matched producer/consumer pair for device-rate samples.
pub fn create_audio_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}

/// Create the control → render queue for new impulse responses.
pub fn create_install_queue() -> (InstallProducer, InstallConsumer) {
    HeapRb::<Arc<ImpulseResponse>>::new(INSTALL_QUEUE_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_ring_capacity_scales_with_rate_and_latency() {
        assert_eq!(audio_ring_capacity(48_000, 60), 48 * 60 * 2);
        // Tiny configurations are floored.
        assert_eq!(audio_ring_capacity(8_000, 1), 1024);
    }

    #[test]
    fn install_queue_preserves_order() {
        let (mut tx, mut rx) = create_install_queue();
        let a = Arc::new(ImpulseResponse::new(vec![1.0]));
        let b = Arc::new(ImpulseResponse::new(vec![2.0]));
        assert!(tx.try_push(Arc::clone(&a)).is_ok());
        assert!(tx.try_push(Arc::clone(&b)).is_ok());
        assert_eq!(rx.try_pop().map(|ir| ir.samples()[0]), Some(1.0));
        assert_eq!(rx.try_pop().map(|ir| ir.samples()[0]), Some(2.0));
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn install_queue_reports_full() {
        let (mut tx, _rx) = create_install_queue();
        let ir = Arc::new(ImpulseResponse::new(vec![0.0]));
        for _ in 0..INSTALL_QUEUE_CAPACITY {
            assert!(tx.try_push(Arc::clone(&ir)).is_ok());
        }
        assert!(tx.try_push(ir).is_err());
    }
}
