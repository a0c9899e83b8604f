//! Filter slots and crossfade.
//!
//! ## Occupancy
//!
//! ```text
//! Empty ──install──► Single ──install──► Dual(progress) ──progress = 1──► Single
//!                                          │    ▲
//!                                          └────┘ install (preempt: drop outgoing,
//!                                                  incoming → outgoing, restart at 0)
//! ```
//!
//! At most one crossfade is ever in flight. [`FilterBank`] is a plain state
//! machine with no I/O; the renderer owns it on the sample-rate domain and
//! forwards whatever it retires back to the control thread through
//! [`FilterReceiver::retire`] so deallocation never happens on the audio
//! thread.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::buffering::{
    create_install_queue, Consumer, InstallConsumer, InstallProducer, Producer,
    INSTALL_QUEUE_CAPACITY,
};
use crate::error::{Result, VocoderError};
use crate::frame::ImpulseResponse;

/// Gain law applied while two filters are mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossfadeCurve {
    /// incoming = p², outgoing = 1 − p². Gains always sum to 1.
    #[default]
    Complementary,
    /// incoming = p², outgoing = (1 − p)². Sum is `1 − 2p(1 − p)`.
    Symmetric,
}

/// Progress of one crossfade, `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossfade {
    progress: f32,
    curve: CrossfadeCurve,
}

impl Crossfade {
    pub fn new(curve: CrossfadeCurve) -> Self {
        Self {
            progress: 0.0,
            curve,
        }
    }

    /// Move forward by `step`, clamped to 1. Returns `true` once complete.
    #[inline]
    pub fn advance(&mut self, step: f32) -> bool {
        self.progress = (self.progress + step.max(0.0)).min(1.0);
        self.is_complete()
    }

    pub fn restart(&mut self) {
        self.progress = 0.0;
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    #[inline]
    pub fn incoming_gain(&self) -> f32 {
        self.progress * self.progress
    }

    #[inline]
    pub fn outgoing_gain(&self) -> f32 {
        match self.curve {
            CrossfadeCurve::Complementary => 1.0 - self.progress * self.progress,
            CrossfadeCurve::Symmetric => {
                let rest = 1.0 - self.progress;
                rest * rest
            }
        }
    }
}

/// Filter occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    Empty,
    Single,
    Dual,
}

/// Active/incoming impulse-response slots plus crossfade state.
#[derive(Debug, Clone)]
pub struct FilterBank {
    /// The only filter when `Single`, the outgoing one when `Dual`.
    active: Option<Arc<ImpulseResponse>>,
    incoming: Option<Arc<ImpulseResponse>>,
    fade: Crossfade,
}

impl FilterBank {
    pub fn new(curve: CrossfadeCurve) -> Self {
        Self {
            active: None,
            incoming: None,
            fade: Crossfade::new(curve),
        }
    }

    pub fn occupancy(&self) -> Occupancy {
        match (&self.active, &self.incoming) {
            (None, _) => Occupancy::Empty,
            (Some(_), None) => Occupancy::Single,
            (Some(_), Some(_)) => Occupancy::Dual,
        }
    }

    /// Install a new filter.
    ///
    /// Returns the filter that was discarded by a preempting install, if any.
    pub fn install(&mut self, ir: Arc<ImpulseResponse>) -> Option<Arc<ImpulseResponse>> {
        match self.occupancy() {
            Occupancy::Empty => {
                self.active = Some(ir);
                None
            }
            Occupancy::Single => {
                self.incoming = Some(ir);
                self.fade.restart();
                None
            }
            Occupancy::Dual => {
                let discarded = self.active.take();
                self.active = self.incoming.take();
                self.incoming = Some(ir);
                self.fade.restart();
                discarded
            }
        }
    }

    /// Advance the crossfade by `step`.
    ///
    /// Returns the outgoing filter when the crossfade completes on this call.
    #[inline]
    pub fn advance(&mut self, step: f32) -> Option<Arc<ImpulseResponse>> {
        if self.incoming.is_none() {
            return None;
        }
        if self.fade.advance(step) {
            let retired = self.active.take();
            self.active = self.incoming.take();
            self.fade.restart();
            return retired;
        }
        None
    }

    /// `(active/outgoing gain, incoming gain)` for the current state.
    #[inline]
    pub fn gains(&self) -> (f32, f32) {
        match self.occupancy() {
            Occupancy::Empty => (0.0, 0.0),
            Occupancy::Single => (1.0, 0.0),
            Occupancy::Dual => (self.fade.outgoing_gain(), self.fade.incoming_gain()),
        }
    }

    pub fn progress(&self) -> Option<f32> {
        self.incoming.as_ref().map(|_| self.fade.progress())
    }

    pub fn active(&self) -> Option<&Arc<ImpulseResponse>> {
        self.active.as_ref()
    }

    pub fn incoming(&self) -> Option<&Arc<ImpulseResponse>> {
        self.incoming.as_ref()
    }

    /// The filter that will be audible once any crossfade completes.
    pub fn newest(&self) -> Option<&Arc<ImpulseResponse>> {
        self.incoming.as_ref().or(self.active.as_ref())
    }

    /// Tear down both slots, returning whatever they held.
    pub fn clear(&mut self) -> [Option<Arc<ImpulseResponse>>; 2] {
        self.fade.restart();
        [self.active.take(), self.incoming.take()]
    }
}

/// Control-side end of the filter handoff.
pub struct FilterSender {
    installs: InstallProducer,
    retired: Receiver<Arc<ImpulseResponse>>,
}

/// Render-side end of the filter handoff.
pub struct FilterReceiver {
    installs: InstallConsumer,
    retired: Sender<Arc<ImpulseResponse>>,
}

/// Create a matched install queue + retirement channel.
pub fn filter_channel() -> (FilterSender, FilterReceiver) {
    let (installs_tx, installs_rx) = create_install_queue();
    // Each install retires at most one filter, plus two on teardown.
    let (retired_tx, retired_rx) = crossbeam_channel::bounded(INSTALL_QUEUE_CAPACITY + 2);
    (
        FilterSender {
            installs: installs_tx,
            retired: retired_rx,
        },
        FilterReceiver {
            installs: installs_rx,
            retired: retired_tx,
        },
    )
}

impl FilterSender {
    /// Queue `ir` for installation on the next render block.
    ///
    /// # Errors
    /// `FilterQueueFull` when the renderer has not drained the queue.
    pub fn send(&mut self, ir: Arc<ImpulseResponse>) -> Result<()> {
        self.installs
            .try_push(ir)
            .map_err(|_| VocoderError::FilterQueueFull)
    }

    /// Drop every filter the renderer has handed back. Returns the count.
    pub fn drain_retired(&self) -> usize {
        self.retired.try_iter().count()
    }
}

impl FilterReceiver {
    /// Next pending install, if any. Wait-free.
    #[inline]
    pub fn try_recv(&mut self) -> Option<Arc<ImpulseResponse>> {
        self.installs.try_pop()
    }

    /// Hand a filter back to the control thread for deallocation.
    ///
    /// Returns `false` if the channel was full and the filter was dropped
    /// here instead. A closed channel means the session is gone; that is
    /// not counted as an overflow.
    #[must_use]
    pub fn retire(&self, ir: Arc<ImpulseResponse>) -> bool {
        !matches!(self.retired.try_send(ir), Err(TrySendError::Full(_)))
    }
}

impl std::fmt::Debug for FilterSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterSender").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for FilterReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterReceiver").finish_non_exhaustive()
    }
}
