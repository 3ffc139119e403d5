//! Typed operations on one scope channel, on top of an [`InstrumentLink`].

use crate::error::ScopeError;
use crate::link::InstrumentLink;
use crate::scpi::{self, Identity, TriggerMode};
use crate::units::{self, Unit};
use crate::utils::poll_until;
use crate::waveform::WaveformTrace;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Divisions across the screen that one period should roughly fill when fitting.
const FIT_DIVISIONS_PER_PERIOD: f64 = 7.0;

/// Vertical and horizontal scale read back before an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSetup {
    pub volts_per_div: f64,
    pub offset: f64,
    pub sample_rate: f64,
}

/// What [`Scope::fit_wave`] measured and changed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FitReport {
    pub frequency: Option<f64>,
    pub max_voltage: Option<f64>,
    pub time_per_div: Option<f64>,
    pub volts_per_div: Option<f64>,
}

impl std::fmt::Display for FitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.frequency, self.time_per_div) {
            (Some(freq), Some(tdiv)) => {
                write!(f, "signal at {freq:.3} Hz, time/div {}", units::format_engineering(tdiv, Unit::Second))?;
                if let Some(vdiv) = self.volts_per_div {
                    write!(f, ", volts/div {}", units::format_engineering(vdiv, Unit::Volt))?;
                }
                Ok(())
            }
            _ => write!(f, "no signal frequency measured, volts/div left at 1 V"),
        }
    }
}

/// Command-layer handle for one channel.
///
/// Every method is a short request/response exchange; nothing is cached, so
/// the values returned always reflect the instrument.
pub struct Scope<'a> {
    link: &'a mut dyn InstrumentLink,
    channel: u8,
}

impl<'a> Scope<'a> {
    pub fn new(link: &'a mut dyn InstrumentLink, channel: u8) -> Result<Self, ScopeError> {
        if !(1..=4).contains(&channel) {
            return Err(ScopeError::Validation(format!(
                "channel {channel} does not exist, expected 1 to 4"
            )));
        }
        Ok(Self { link, channel })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn resource(&self) -> &str {
        self.link.resource()
    }

    pub fn identity(&mut self) -> Result<Identity, ScopeError> {
        scpi::parse_identity(&self.link.query(scpi::IDN)?)
    }

    /// Validate `input` and send it as the channel's volts/division.
    ///
    /// Nothing is sent when the input is rejected.
    pub fn set_volts_per_div(&mut self, input: &str) -> Result<f64, ScopeError> {
        let volts = units::parse_volts_per_div(input)?;
        self.apply_volts_per_div(volts)?;
        Ok(volts)
    }

    pub fn set_time_per_div(&mut self, input: &str) -> Result<f64, ScopeError> {
        let seconds = units::parse_time_per_div(input)?;
        self.apply_time_per_div(seconds)?;
        Ok(seconds)
    }

    /// Send an already validated volts/division.
    pub fn apply_volts_per_div(&mut self, volts: f64) -> Result<(), ScopeError> {
        info!("C{}: volts/div -> {}", self.channel, units::format_engineering(volts, Unit::Volt));
        self.link.send(&scpi::set_volts_per_div(self.channel, volts))
    }

    pub fn apply_time_per_div(&mut self, seconds: f64) -> Result<(), ScopeError> {
        info!("time/div -> {}", units::format_engineering(seconds, Unit::Second));
        self.link.send(&scpi::set_time_per_div(seconds))
    }

    pub fn volts_per_div(&mut self) -> Result<f64, ScopeError> {
        let reply = self.link.query(&scpi::volts_per_div_query(self.channel))?;
        scpi::parse_volts_per_div(&reply, self.channel)
    }

    pub fn time_per_div(&mut self) -> Result<f64, ScopeError> {
        scpi::parse_time_per_div(&self.link.query(scpi::TIME_DIV_QUERY)?)
    }

    pub fn offset(&mut self) -> Result<f64, ScopeError> {
        let reply = self.link.query(&scpi::offset_query(self.channel))?;
        scpi::parse_offset(&reply, self.channel)
    }

    pub fn sample_rate(&mut self) -> Result<f64, ScopeError> {
        scpi::parse_sample_rate(&self.link.query(scpi::SAMPLE_RATE_QUERY)?)
    }

    /// Signal frequency from the scope's cycle measurement.
    pub fn frequency(&mut self) -> Result<f64, ScopeError> {
        scpi::parse_frequency(&self.link.query(scpi::FREQUENCY_QUERY)?)
    }

    pub fn max_voltage(&mut self) -> Result<f64, ScopeError> {
        let reply = self.link.query(&scpi::max_voltage_query(self.channel))?;
        scpi::parse_max_voltage(&reply, self.channel)
    }

    pub fn set_trigger_level(&mut self, volts: f64) -> Result<(), ScopeError> {
        self.link.send(&scpi::set_trigger_level(self.channel, volts))
    }

    pub fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<(), ScopeError> {
        self.link.send(&scpi::set_trigger_mode(mode))
    }

    pub fn trigger_mode(&mut self) -> Result<TriggerMode, ScopeError> {
        scpi::parse_trigger_mode(&self.link.query(scpi::TRIGGER_MODE_QUERY)?)
    }

    pub fn arm_single(&mut self) -> Result<(), ScopeError> {
        self.link.send(scpi::ARM)
    }

    /// Block until the acquisition has stopped or `timeout` has passed.
    pub fn wait_for_stop(&mut self, timeout: Duration) -> Result<(), ScopeError> {
        let link = &mut *self.link;
        poll_until(
            || scpi::parse_sample_status_stopped(&link.query(scpi::SAMPLE_STATUS_QUERY)?),
            timeout,
            Duration::from_millis(50),
        )?;
        Ok(())
    }

    /// Read back the scale settings an acquisition needs for conversion.
    pub fn acquisition_setup(&mut self) -> Result<AcquisitionSetup, ScopeError> {
        Ok(AcquisitionSetup {
            volts_per_div: self.volts_per_div()?,
            offset: self.offset()?,
            sample_rate: self.sample_rate()?,
        })
    }

    /// Transfer the channel's waveform and convert it to volts over time.
    pub fn acquire(&mut self) -> Result<WaveformTrace, ScopeError> {
        let setup = self.acquisition_setup()?;
        if !(setup.sample_rate > 0.0) {
            return Err(ScopeError::Parse(format!(
                "sample rate {} is not positive",
                setup.sample_rate
            )));
        }
        debug!("C{} acquisition setup: {setup:?}", self.channel);

        let raw = self.link.query_raw(&scpi::waveform_query(self.channel))?;
        let payload = scpi::decode_waveform_block(&raw)?;
        if payload.is_empty() {
            return Err(ScopeError::Parse(format!(
                "C{} returned an empty waveform",
                self.channel
            )));
        }

        let voltages = scpi::codes_to_voltages(payload, setup.volts_per_div, setup.offset);
        info!(
            "Acquired {} samples from C{} at {:.3e} Sa/s",
            voltages.len(),
            self.channel,
            setup.sample_rate
        );
        Ok(WaveformTrace::from_voltages(
            self.channel,
            &voltages,
            setup.sample_rate,
        ))
    }

    /// Scale the display so roughly one period of the signal fills the
    /// screen, then arm a single trigger at the peak.
    ///
    /// Without a frequency measurement only volts/div is reset to 1 V.
    pub fn fit_wave(&mut self) -> Result<FitReport, ScopeError> {
        let frequency = match self.frequency() {
            Ok(f) if f > 0.0 => Some(f),
            Ok(_) => None,
            Err(ScopeError::Parse(reason)) => {
                warn!("No frequency measurement: {reason}");
                None
            }
            Err(e) => return Err(e),
        };

        self.apply_volts_per_div(1.0)?;
        let max_voltage = match self.max_voltage() {
            Ok(v) => Some(v),
            Err(ScopeError::Parse(reason)) => {
                warn!("No max voltage measurement: {reason}");
                None
            }
            Err(e) => return Err(e),
        };

        let mut report = FitReport {
            frequency,
            max_voltage,
            volts_per_div: Some(1.0),
            ..FitReport::default()
        };

        let Some(freq) = frequency else {
            return Ok(report);
        };

        let per_div = (1.0 / freq) / FIT_DIVISIONS_PER_PERIOD;
        let tdiv = units::nearest_tdiv(per_div);
        self.apply_time_per_div(tdiv)?;
        report.time_per_div = Some(tdiv);

        if let Some(max) = max_voltage {
            let vdiv = units::clamp_volts_per_div(max);
            self.apply_volts_per_div(vdiv)?;
            report.volts_per_div = Some(vdiv);
            self.set_trigger_level(max)?;
            self.set_trigger_mode(TriggerMode::Single)?;
        }

        info!("Fit wave: {report}");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SimHandle;

    #[test]
    fn test_valid_scale_sends_exactly_one_command() {
        let sim = SimHandle::new();
        let mut link = sim.open_scope("SIM::t").unwrap();
        let mut scope = Scope::new(&mut link, 1).unwrap();

        assert_eq!(scope.set_volts_per_div("2V").unwrap(), 2.0);
        assert_eq!(sim.commands(), vec!["C1:VDIV 2.000E+00V"]);

        sim.clear_commands();
        scope.set_time_per_div("500 us").unwrap();
        assert_eq!(sim.commands(), vec!["TDIV 5.000E-04S"]);
    }

    #[test]
    fn test_invalid_scale_sends_nothing() {
        let sim = SimHandle::new();
        let mut link = sim.open_scope("SIM::t").unwrap();
        let mut scope = Scope::new(&mut link, 1).unwrap();

        for bad in ["abc", "20 V", ""] {
            assert!(matches!(scope.set_volts_per_div(bad), Err(ScopeError::Validation(_))));
        }
        assert!(scope.set_time_per_div("1 V").is_err());
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn test_channel_out_of_range() {
        let mut link = crate::link::SimulatedScope::new("SIM::t");
        assert!(Scope::new(&mut link, 0).is_err());
        assert!(Scope::new(&mut link, 5).is_err());
    }

    #[test]
    fn test_acquire_converts_codes() {
        let sim = SimHandle::new();
        sim.update(|s| {
            s.points = 1000;
            s.volts_per_div[1] = 0.5;
        });
        let mut link = sim.open_scope("SIM::t").unwrap();
        let trace = Scope::new(&mut link, 2).unwrap().acquire().unwrap();

        assert_eq!(trace.channel, 2);
        assert_eq!(trace.len(), 1000);
        assert_eq!(trace.sample_interval(), Some(1e-6));
        // 1 V sine quantised at 0.5 V/div / 25 codes
        let max = trace.max().unwrap();
        assert!((max - 1.0).abs() <= 0.02, "{max}");
        assert_eq!(
            sim.commands(),
            vec!["C2:VDIV?", "C2:OFST?", "SARA?", "C2:WF? DAT2"]
        );
    }

    #[test]
    fn test_acquire_empty_block_is_parse_error() {
        let sim = SimHandle::new();
        sim.update(|s| s.points = 0);
        let mut link = sim.open_scope("SIM::t").unwrap();
        let err = Scope::new(&mut link, 1).unwrap().acquire().unwrap_err();
        assert!(matches!(err, ScopeError::Parse(_)));
    }

    #[test]
    fn test_fit_wave_sets_scale_and_trigger() {
        let sim = SimHandle::new();
        sim.set_signal(1000.0, 2.0);
        let mut link = sim.open_scope("SIM::t").unwrap();
        let report = Scope::new(&mut link, 1).unwrap().fit_wave().unwrap();

        // (1 / 1 kHz) / 7 = 142.9 us -> 100 us
        assert_eq!(report.time_per_div, Some(100e-6));
        assert_eq!(report.volts_per_div, Some(2.0));
        let state = sim.state();
        assert_eq!(state.time_per_div, 100e-6);
        assert_eq!(state.volts_per_div[0], 2.0);
        assert_eq!(state.trigger_level[0], 2.0);
        assert_eq!(state.trigger_mode, TriggerMode::Single);
    }

    #[test]
    fn test_wait_for_stop() {
        let mut link = crate::link::SimulatedScope::new("SIM::t");
        let mut scope = Scope::new(&mut link, 1).unwrap();
        scope.arm_single().unwrap();
        scope.wait_for_stop(Duration::from_millis(200)).unwrap();
    }
}
