//! Temporal smoothing of predictor output.
//!
//! Two independent bounded histories (spectral envelope and f0) are kept;
//! every push returns their arithmetic mean. Spectra are averaged in the
//! linear power domain; the predictor's log10 values are converted first.
//!
//! The update policy is fixed when the smoother is built:
//! - [`WindowPolicy::Sliding`]: true sliding window up to capacity
//!   (continuous camera mode).
//! - [`WindowPolicy::Truncating`]: the window is cut back to the newest
//!   value on every push (single-shot mode), so the output is a replace,
//!   not an average, across frames.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::frame::{Frame, PowerSpectrum, SmoothedFrame};

/// How frames arrive, and therefore how the windows are updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMode {
    /// Frames stream in from a live source; average across a sliding window.
    #[default]
    Continuous,
    /// Frames are produced one at a time on demand; no cross-frame averaging.
    SingleShot,
}

/// Window update strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Keep only the most recent value.
    Truncating,
    /// Keep up to `capacity` most recent values.
    Sliding { capacity: usize },
}

impl WindowPolicy {
    /// Policy for `mode`; `capacity` only matters for the sliding variant.
    pub fn for_mode(mode: SmoothingMode, capacity: usize) -> Self {
        match mode {
            SmoothingMode::Continuous => WindowPolicy::Sliding {
                capacity: capacity.max(1),
            },
            SmoothingMode::SingleShot => WindowPolicy::Truncating,
        }
    }

    fn capacity(self) -> usize {
        match self {
            WindowPolicy::Truncating => 1,
            WindowPolicy::Sliding { capacity } => capacity.max(1),
        }
    }
}

/// Values that can be averaged element-wise.
pub trait Averageable: Clone {
    /// Arithmetic mean of a non-empty run of values.
    fn mean<'a, I>(values: I, count: usize) -> Self
    where
        I: Iterator<Item = &'a Self>,
        Self: 'a;
}

impl Averageable for f64 {
    fn mean<'a, I>(values: I, count: usize) -> Self
    where
        I: Iterator<Item = &'a Self>,
    {
        values.sum::<f64>() / count as f64
    }
}

impl Averageable for Vec<f64> {
    fn mean<'a, I>(mut values: I, count: usize) -> Self
    where
        I: Iterator<Item = &'a Self>,
    {
        let Some(first) = values.next() else {
            return Vec::new();
        };
        let mut sum = first.clone();
        for v in values {
            for (acc, x) in sum.iter_mut().zip(v) {
                *acc += x;
            }
        }
        let inv = 1.0 / count as f64;
        sum.iter_mut().for_each(|x| *x *= inv);
        sum
    }
}

/// Bounded history of the most recent values of `T`.
#[derive(Debug, Clone)]
pub struct SmoothingWindow<T> {
    policy: WindowPolicy,
    values: VecDeque<T>,
}

impl<T: Averageable> SmoothingWindow<T> {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            values: VecDeque::with_capacity(policy.capacity()),
        }
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Append `value`, evict per policy, return the window mean.
    pub fn push(&mut self, value: T) -> T {
        self.insert(value);
        T::mean(self.values.iter(), self.values.len())
    }

    /// The mean `push(value)` would return, leaving the window untouched.
    pub fn peek(&self, value: &T) -> T {
        let keep = self.values.len().min(self.policy.capacity() - 1);
        let skip = self.values.len() - keep;
        T::mean(
            self.values.iter().skip(skip).chain(std::iter::once(value)),
            keep + 1,
        )
    }

    /// Append `value` and evict per policy.
    pub fn insert(&mut self, value: T) {
        self.values.push_back(value);
        let capacity = self.policy.capacity();
        while self.values.len() > capacity {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// A frame averaged against the current windows but not yet recorded in
/// them. Pass it to [`TemporalSmoother::commit`] once it has been used.
#[derive(Debug, Clone)]
pub struct StagedFrame {
    linear: Vec<f64>,
    f0: f64,
    pub smoothed: SmoothedFrame,
}

/// Spectral + f0 smoother fed once per frame.
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    spectra: SmoothingWindow<Vec<f64>>,
    f0s: SmoothingWindow<f64>,
}

impl TemporalSmoother {
    pub fn new(mode: SmoothingMode, spectral_capacity: usize, f0_capacity: usize) -> Self {
        Self {
            spectra: SmoothingWindow::new(WindowPolicy::for_mode(mode, spectral_capacity)),
            f0s: SmoothingWindow::new(WindowPolicy::for_mode(mode, f0_capacity)),
        }
    }

    /// Push one validated frame and return the smoothed linear values.
    pub fn push(&mut self, frame: &Frame) -> SmoothedFrame {
        let staged = self.stage(frame);
        self.commit(staged)
    }

    /// Average `frame` against the windows without recording it.
    pub fn stage(&self, frame: &Frame) -> StagedFrame {
        let linear = PowerSpectrum::from_log10(&frame.log_spectrum).0;
        let smoothed = SmoothedFrame {
            spectrum: PowerSpectrum(self.spectra.peek(&linear)),
            f0: self.f0s.peek(&frame.f0),
        };
        StagedFrame {
            linear,
            f0: frame.f0,
            smoothed,
        }
    }

    /// Record a staged frame in both windows.
    pub fn commit(&mut self, staged: StagedFrame) -> SmoothedFrame {
        self.spectra.insert(staged.linear);
        self.f0s.insert(staged.f0);
        staged.smoothed
    }

    /// Number of spectra and f0 values currently held.
    pub fn depth(&self) -> (usize, usize) {
        (self.spectra.len(), self.f0s.len())
    }

    pub fn reset(&mut self) {
        self.spectra.clear();
        self.f0s.clear();
    }
}
