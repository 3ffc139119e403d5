//! Single-sided amplitude spectrum of a trace.

use crate::error::ScopeError;
use crate::waveform::WaveformTrace;
use log::debug;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spectrum {
    /// Bin frequencies in Hz, `k / (n * dt)` for `k < n / 2`
    pub frequencies: Vec<f64>,
    /// Amplitude in volts, `2 / n * |X_k|`
    pub magnitudes: Vec<f64>,
}

impl Spectrum {
    /// FFT of the trace voltages, sample spacing taken from the first two times.
    pub fn from_trace(trace: &WaveformTrace) -> Result<Self, ScopeError> {
        let dt = trace
            .sample_interval()
            .ok_or_else(|| ScopeError::Data("spectrum needs at least 2 samples".into()))?;
        Self::from_samples(&trace.voltages(), dt)
    }

    pub fn from_samples(voltages: &[f64], dt: f64) -> Result<Self, ScopeError> {
        let n = voltages.len();
        if n < 2 {
            return Err(ScopeError::Data("spectrum needs at least 2 samples".into()));
        }
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(ScopeError::Data(format!("invalid sample spacing {dt}")));
        }

        let mut buffer: Vec<Complex<f64>> =
            voltages.iter().map(|&v| Complex::new(v, 0.0)).collect();
        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(n).process(&mut buffer);

        let half = n / 2;
        let resolution = 1.0 / (n as f64 * dt);
        let scale = 2.0 / n as f64;
        let frequencies = (0..half).map(|k| k as f64 * resolution).collect();
        let magnitudes = buffer[..half].iter().map(|c| c.norm() * scale).collect();

        debug!("FFT of {n} samples, resolution {resolution:.3} Hz");
        Ok(Self {
            frequencies,
            magnitudes,
        })
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Frequency of the strongest bin, ignoring DC.
    pub fn peak_frequency(&self) -> Option<f64> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.frequencies[i])
    }

    /// Copy of the bins at or below `max_hz`.
    pub fn limited(&self, max_hz: f64) -> Self {
        let keep = self.frequencies.iter().take_while(|&&f| f <= max_hz).count();
        Self {
            frequencies: self.frequencies[..keep].to_vec(),
            magnitudes: self.magnitudes[..keep].to_vec(),
        }
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.frequencies.iter().copied().zip(self.magnitudes.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, amplitude: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / rate).sin())
            .collect()
    }

    #[test]
    fn test_peak_and_amplitude_of_sine() {
        let spectrum = Spectrum::from_samples(&sine(1000.0, 0.5, 100_000.0, 1000), 1e-5).unwrap();
        assert_eq!(spectrum.len(), 500);
        assert!((spectrum.peak_frequency().unwrap() - 1000.0).abs() < 1e-6);
        let peak = spectrum.magnitudes[10];
        assert!((peak - 0.5).abs() < 1e-9, "{peak}");
    }

    #[test]
    fn test_dc_is_skipped_for_peak() {
        let mut samples = sine(250.0, 0.1, 1000.0, 100);
        samples.iter_mut().for_each(|v| *v += 5.0);
        let spectrum = Spectrum::from_samples(&samples, 1e-3).unwrap();
        assert!((spectrum.peak_frequency().unwrap() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_limited() {
        let spectrum = Spectrum::from_samples(&sine(10.0, 1.0, 100.0, 100), 0.01).unwrap();
        let limited = spectrum.limited(20.0);
        assert_eq!(limited.frequencies.last().copied(), Some(20.0));
        assert_eq!(limited.len(), limited.magnitudes.len());
    }

    #[test]
    fn test_rejects_degenerate_input() {
        assert!(Spectrum::from_samples(&[1.0], 1e-3).is_err());
        assert!(Spectrum::from_samples(&[1.0, 2.0], 0.0).is_err());
        assert!(Spectrum::from_trace(&WaveformTrace::default()).is_err());
    }
}
