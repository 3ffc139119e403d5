use crate::error::ScopeError;
use crate::spectrum::Spectrum;
use crate::waveform::WaveformTrace;
use textplots::{Chart, Plot, Shape};

/// Everything a front end needs to draw a trace, optionally with its spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotData {
    pub title: String,
    /// (time s, voltage V)
    pub time_domain: Vec<[f64; 2]>,
    /// Spectrum limited to the configured maximum frequency
    pub spectrum: Option<Spectrum>,
    pub peak_frequency: Option<f64>,
}

impl PlotData {
    pub fn from_trace(trace: &WaveformTrace, with_fft: bool, fft_max_hz: f64) -> Result<Self, ScopeError> {
        if trace.is_empty() {
            return Err(ScopeError::Validation("trace has no samples to plot".into()));
        }

        let time_domain = trace.samples.iter().map(|s| [s.time, s.voltage]).collect();
        let (spectrum, peak_frequency) = if with_fft {
            let full = Spectrum::from_trace(trace)?;
            let peak = full.peak_frequency();
            (Some(full.limited(fft_max_hz)), peak)
        } else {
            (None, None)
        };

        let title = if trace.channel > 0 {
            format!("C{} - {} samples", trace.channel, trace.len())
        } else {
            format!("{} samples", trace.len())
        };

        Ok(Self {
            title,
            time_domain,
            spectrum,
            peak_frequency,
        })
    }
}

/// Determine the best scale and unit for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else if max_value >= 1e-6 {
        (1e6, "μ")
    } else if max_value >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    }
}

fn frequency_scale(max_hz: f64) -> (f64, &'static str) {
    if max_hz >= 1e6 {
        (1e-6, "M")
    } else if max_hz >= 1e3 {
        (1e-3, "k")
    } else {
        (1.0, "")
    }
}

/// Plot a trace as voltage over time in the terminal, with dynamic SI scaling
pub fn plot_trace(
    trace: &WaveformTrace,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), ScopeError> {
    if trace.is_empty() {
        return Err(ScopeError::Validation("Cannot plot empty trace".into()));
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(60);

    let min_value = trace.min().unwrap_or(0.0);
    let max_value = trace.max().unwrap_or(0.0);
    let (value_scale, value_unit) = determine_scale(max_value.abs().max(min_value.abs()));
    let (time_scale, time_unit) = determine_scale(trace.duration());

    let frame: Vec<(f32, f32)> = trace
        .samples
        .iter()
        .map(|s| ((s.time * time_scale) as f32, (s.voltage * value_scale) as f32))
        .collect();

    let t_end = (trace.duration() * time_scale) as f32;

    println!("Channel {} trace", trace.channel);
    println!("X-axis: {}s | Y-axis: {}V", time_unit, value_unit);
    println!(
        "Range: {} samples over {:.3} {}s | Values: {:.3} to {:.3} {}V",
        trace.len(),
        t_end,
        time_unit,
        min_value * value_scale,
        max_value * value_scale,
        value_unit
    );
    println!("{}", "─".repeat(width));

    Chart::new(width as u32, height as u32, 0.0, t_end.max(f32::EPSILON))
        .lineplot(&Shape::Lines(&frame))
        .nice();

    println!("Time ({}s) →", time_unit);

    Ok(())
}

/// Plot an amplitude spectrum in the terminal
pub fn plot_spectrum(
    spectrum: &Spectrum,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), ScopeError> {
    if spectrum.is_empty() {
        return Err(ScopeError::Validation("Cannot plot empty spectrum".into()));
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(40);

    let max_hz = spectrum.frequencies.last().copied().unwrap_or(0.0);
    let max_mag = spectrum.magnitudes.iter().copied().fold(0.0, f64::max);
    let (freq_scale, freq_unit) = frequency_scale(max_hz);
    let (mag_scale, mag_unit) = determine_scale(max_mag);

    let frame: Vec<(f32, f32)> = spectrum
        .points()
        .map(|(f, m)| ((f * freq_scale) as f32, (m * mag_scale) as f32))
        .collect();

    println!("Amplitude spectrum");
    println!("X-axis: {}Hz | Y-axis: {}V", freq_unit, mag_unit);
    if let Some(peak) = spectrum.peak_frequency() {
        println!("Peak at {:.3} {}Hz", peak * freq_scale, freq_unit);
    }
    println!("{}", "─".repeat(width));

    Chart::new(
        width as u32,
        height as u32,
        0.0,
        ((max_hz * freq_scale) as f32).max(f32::EPSILON),
    )
    .lineplot(&Shape::Lines(&frame))
    .nice();

    println!("Frequency ({}Hz) →", freq_unit);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_trace() -> WaveformTrace {
        let voltages: Vec<f64> = (0..1000)
            .map(|i| (2.0 * std::f64::consts::PI * 1000.0 * i as f64 / 1e6).sin() * 0.01)
            .collect();
        WaveformTrace::from_voltages(1, &voltages, 1e6)
    }

    #[test]
    fn test_determine_scale() {
        assert_eq!(determine_scale(5.0), (1.0, ""));
        assert_eq!(determine_scale(0.005), (1e3, "m"));
        assert_eq!(determine_scale(5e-6), (1e6, "μ"));
        assert_eq!(determine_scale(5e-9), (1e9, "n"));
        assert_eq!(determine_scale(5e-12), (1e12, "p"));
    }

    #[test]
    fn test_plot_data_with_and_without_fft() {
        let trace = sine_trace();
        let plain = PlotData::from_trace(&trace, false, 2e6).unwrap();
        assert_eq!(plain.time_domain.len(), 1000);
        assert!(plain.spectrum.is_none());

        let with_fft = PlotData::from_trace(&trace, true, 5e3).unwrap();
        let spectrum = with_fft.spectrum.unwrap();
        assert!(spectrum.frequencies.iter().all(|&f| f <= 5e3));
        assert!((with_fft.peak_frequency.unwrap() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_terminal_plots() {
        let trace = sine_trace();
        assert!(plot_trace(&trace, Some(80), Some(20)).is_ok());
        let spectrum = Spectrum::from_trace(&trace).unwrap();
        assert!(plot_spectrum(&spectrum, Some(80), Some(20)).is_ok());
    }

    #[test]
    fn test_plot_empty_data() {
        assert!(plot_trace(&WaveformTrace::default(), None, None).is_err());
        assert!(PlotData::from_trace(&WaveformTrace::default(), false, 1.0).is_err());
        assert!(plot_spectrum(&Spectrum::default(), None, None).is_err());
    }
}
