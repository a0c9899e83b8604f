//! Affine int8/int32 quantisation used by quantised model backends.
//!
//! `q = trunc(x / scale + zero_point)` on the way in,
//! `x = (q - zero_point) * scale` on the way out.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantizationParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantizationParams {
    /// A zero or non-finite scale is stored as 1, matching models that
    /// omit the scale entirely.
    pub fn new(scale: f32, zero_point: i32) -> Self {
        let scale = if scale == 0.0 || !scale.is_finite() {
            1.0
        } else {
            scale
        };
        Self { scale, zero_point }
    }

    pub fn quantize(&self, values: &[f32]) -> Vec<i32> {
        values
            .iter()
            .map(|x| (x / self.scale + self.zero_point as f32).trunc() as i32)
            .collect()
    }

    pub fn dequantize(&self, values: &[i32]) -> Vec<f32> {
        values
            .iter()
            .map(|q| (*q - self.zero_point) as f32 * self.scale)
            .collect()
    }
}

impl Default for QuantizationParams {
    fn default() -> Self {
        Self::new(1.0, 0)
    }
}
