//! Signal conditioning used by step detection and heading estimation.
//!
//! - [`moving_average`]: centered moving average with zero padding ("same"-mode convolution)
//! - [`ButterworthLowPass`]: second-order low-pass designed by the bilinear transform
//! - [`ButterworthLowPass::filtfilt`]: zero-phase forward-backward filtering
//!
//! The zero-phase filter runs the causal filter over the signal, then again over the reversed
//! output. The phase delays of the two passes cancel, so features such as a turn in the heading
//! signal stay at the sample where they happened. To keep the edges clean the signal is first
//! mirrored at both ends and the filter state is settled on the first padded sample before each
//! pass.
use nalgebra::Vector3;
use std::f64::consts::{PI, SQRT_2};

/// Maximum number of samples mirrored onto each end before zero-phase filtering.
pub const MAX_PAD: usize = 100;
/// Iterations used to settle the filter state on a constant input.
pub const WARMUP_ITERATIONS: usize = 1000;

/// Centered moving average of `signal` over `window` samples, treating samples outside the signal
/// as zero.
///
/// Output sample `i` is the sum of `signal[i - window / 2 ..= i + (window - 1) / 2]` divided by
/// `window`, so the output has the same length as the input and decays towards the edges.
pub fn moving_average(signal: &[f64], window: usize) -> Vec<f64> {
    if window == 0 {
        return signal.to_vec();
    }
    let n = signal.len() as isize;
    let before = (window / 2) as isize;
    let after = ((window - 1) / 2) as isize;
    (0..n)
        .map(|i| {
            let lo = (i - before).max(0);
            let hi = (i + after).min(n - 1);
            // summed per window so equal neighborhoods give bit-identical results
            let sum: f64 = signal[lo as usize..=hi as usize].iter().sum();
            sum / window as f64
        })
        .collect()
}

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population variance; 0 for an empty slice.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Second-order Butterworth low-pass filter in direct form II transposed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ButterworthLowPass {
    /// Numerator coefficients `b0, b1, b2`.
    pub b: [f64; 3],
    /// Denominator coefficients `a1, a2` (`a0` is 1).
    pub a: [f64; 2],
}
impl ButterworthLowPass {
    /// Design a filter with cutoff `wn`, given as a fraction of the Nyquist frequency.
    pub fn new(wn: f64) -> Self {
        let c = (PI * wn / 2.0).tan();
        let d = c * c + SQRT_2 * c + 1.0;
        let b0 = c * c / d;
        ButterworthLowPass {
            b: [b0, 2.0 * b0, b0],
            a: [2.0 * (c * c - 1.0) / d, (1.0 - SQRT_2 * c + c * c) / d],
        }
    }
    /// One filter update.
    pub fn step(&self, x: f64, state: &mut [f64; 2]) -> f64 {
        let y = self.b[0] * x + state[0];
        state[0] = self.b[1] * x - self.a[0] * y + state[1];
        state[1] = self.b[2] * x - self.a[1] * y;
        y
    }
    /// Causal filtering of a whole signal from the given state.
    pub fn lfilter(&self, signal: &[f64], state: &mut [f64; 2]) -> Vec<f64> {
        signal.iter().map(|&x| self.step(x, state)).collect()
    }
    /// Filter state after a long run of the constant input `x0`.
    fn settled_state(&self, x0: f64) -> [f64; 2] {
        let mut state = [0.0; 2];
        for _ in 0..WARMUP_ITERATIONS {
            self.step(x0, &mut state);
        }
        state
    }
    /// Zero-phase filtering: mirror-pad, forward pass, backward pass, trim.
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n < 2 {
            return signal.to_vec();
        }
        let pad = MAX_PAD.min(n / 2);
        let mut padded = Vec::with_capacity(n + 2 * pad);
        padded.extend(signal[1..=pad].iter().rev());
        padded.extend_from_slice(signal);
        padded.extend(signal[n - 1 - pad..n - 1].iter().rev());

        let mut state = self.settled_state(padded[0]);
        let mut forward = self.lfilter(&padded, &mut state);
        forward.reverse();
        let mut state = self.settled_state(forward[0]);
        let mut backward = self.lfilter(&forward, &mut state);
        backward.reverse();
        backward[pad..pad + n].to_vec()
    }
    /// Zero-phase filtering of each axis of a vector series independently.
    pub fn filtfilt_vectors(&self, signal: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let axes: Vec<Vec<f64>> = (0..3)
            .map(|axis| {
                let component: Vec<f64> = signal.iter().map(|v| v[axis]).collect();
                self.filtfilt(&component)
            })
            .collect();
        (0..signal.len())
            .map(|i| Vector3::new(axes[0][i], axes[1][i], axes[2][i]))
            .collect()
    }
}
