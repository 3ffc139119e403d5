//! Application context shared by the front ends.
//!
//! [`ScopeApp`] owns the configuration, the single instrument session and
//! everything the UI displays. Each user action is one synchronous method;
//! any link failure closes the session and flips the status to
//! [`ConnectionStatus::Disconnected`].

use crate::commands::Scope;
use crate::config::AppConfig;
use crate::error::ScopeError;
use crate::hooks::{HookContext, HookOutcome, HookTable};
use crate::link::{Connector, DefaultConnector};
use crate::logger::{CaptureLog, CaptureRecord};
use crate::plotting::PlotData;
use crate::scpi::Identity;
use crate::session::SessionSlot;
use crate::units::{self, Unit};
use crate::waveform::{self, WaveformTrace};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Scope Connected!",
            ConnectionStatus::Disconnected => "No Scope!",
        }
    }
}

/// Scale settings as last confirmed by the instrument; `None` shows as "-".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AcquisitionParameters {
    pub volts_per_div: Option<f64>,
    pub time_per_div: Option<f64>,
}

impl AcquisitionParameters {
    pub fn volts_per_div_label(&self) -> String {
        self.volts_per_div
            .map(|v| units::format_engineering(v, Unit::Volt))
            .unwrap_or_else(|| "- V".to_string())
    }

    pub fn time_per_div_label(&self) -> String {
        self.time_per_div
            .map(|t| units::format_engineering(t, Unit::Second))
            .unwrap_or_else(|| "- s".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: MessageLevel,
    pub text: String,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == MessageLevel::Error
    }
}

pub struct ScopeApp {
    config: AppConfig,
    connector: Box<dyn Connector>,
    session: SessionSlot,
    status: ConnectionStatus,
    displayed: AcquisitionParameters,
    last_trace: Option<WaveformTrace>,
    last_trace_path: Option<PathBuf>,
    save_dir: PathBuf,
    /// Name captures by timestamp instead of `custom_filename`
    pub use_timestamp: bool,
    pub custom_filename: String,
    hooks: HookTable,
    capture_log: Option<CaptureLog>,
    message: Option<StatusMessage>,
}

impl ScopeApp {
    pub fn new(config: AppConfig) -> Self {
        Self::with_connector(config, Box::new(DefaultConnector))
    }

    /// Build a context that opens instruments through `connector`.
    pub fn with_connector(config: AppConfig, connector: Box<dyn Connector>) -> Self {
        let capture_log = config
            .storage
            .capture_log
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| CaptureLog::new(p, 1));

        Self {
            save_dir: config.storage.data_dir.clone(),
            use_timestamp: config.storage.timestamp_filenames,
            custom_filename: String::new(),
            connector,
            session: SessionSlot::new(),
            status: ConnectionStatus::Disconnected,
            displayed: AcquisitionParameters::default(),
            last_trace: None,
            last_trace_path: None,
            hooks: HookTable::new(),
            capture_log,
            message: None,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Replace the configuration. The open session, if any, is closed.
    pub fn set_config(&mut self, config: AppConfig) -> Result<(), ScopeError> {
        config.validate()?;
        self.disconnect();
        self.save_dir = config.storage.data_dir.clone();
        self.use_timestamp = config.storage.timestamp_filenames;
        self.config = config;
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn displayed(&self) -> AcquisitionParameters {
        self.displayed
    }

    pub fn last_trace(&self) -> Option<&WaveformTrace> {
        self.last_trace.as_ref()
    }

    pub fn last_trace_path(&self) -> Option<&Path> {
        self.last_trace_path.as_deref()
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookTable {
        &mut self.hooks
    }

    pub fn message(&self) -> Option<&StatusMessage> {
        self.message.as_ref()
    }

    pub fn connect(&mut self) -> Result<(), ScopeError> {
        let result = self.open_session();
        if result.is_err() {
            self.drop_session();
            self.displayed = AcquisitionParameters::default();
        }
        let resource = self.config.instrument.resource.clone();
        self.finish(result, |_| format!("Connected to {resource}"))
    }

    pub fn disconnect(&mut self) {
        self.drop_session();
        self.displayed = AcquisitionParameters::default();
        self.message = Some(StatusMessage::info("Disconnected"));
    }

    pub fn identity(&mut self) -> Result<Identity, ScopeError> {
        let result = self.ensure_session().and_then(|()| self.scope()?.identity());
        self.finish(result, |id| id.to_string())
    }

    /// Validate and apply new scale settings. Empty inputs are left alone.
    ///
    /// Both inputs are checked before anything is sent, and each displayed
    /// value changes only after its command went through.
    pub fn update_scale(&mut self, vdiv_input: &str, tdiv_input: &str) -> Result<(), ScopeError> {
        let result = self.try_update_scale(vdiv_input, tdiv_input);
        self.finish(result, |applied| applied.clone()).map(drop)
    }

    fn try_update_scale(&mut self, vdiv_input: &str, tdiv_input: &str) -> Result<String, ScopeError> {
        let vdiv = non_empty(vdiv_input)
            .map(units::parse_volts_per_div)
            .transpose()?;
        let tdiv = non_empty(tdiv_input)
            .map(units::parse_time_per_div)
            .transpose()?;
        if vdiv.is_none() && tdiv.is_none() {
            return Ok("Nothing to update".to_string());
        }

        self.ensure_session()?;
        let (mut scope, displayed) = self.scope_and_params()?;
        let mut applied = Vec::new();
        if let Some(v) = vdiv {
            scope.apply_volts_per_div(v)?;
            displayed.volts_per_div = Some(v);
            applied.push(format!("volts/div {}", units::format_engineering(v, Unit::Volt)));
        }
        if let Some(t) = tdiv {
            scope.apply_time_per_div(t)?;
            displayed.time_per_div = Some(t);
            applied.push(format!("time/div {}", units::format_engineering(t, Unit::Second)));
        }
        Ok(format!("Set {}", applied.join(", ")))
    }

    /// Acquire the configured channel and keep the trace in memory.
    pub fn acquire(&mut self) -> Result<&WaveformTrace, ScopeError> {
        let result = self.ensure_session().and_then(|()| self.scope()?.acquire());
        let trace = self.finish(result, |t| format!("Acquired {} samples", t.len()))?;
        self.last_trace_path = None;
        Ok(self.last_trace.insert(trace))
    }

    /// Acquire, then save to `save_dir` under a timestamp or the custom name.
    pub fn acquire_and_save(&mut self) -> Result<PathBuf, ScopeError> {
        let result = self.try_acquire_and_save();
        self.finish(result, |path| format!("Saved {}", path.display()))
    }

    fn try_acquire_and_save(&mut self) -> Result<PathBuf, ScopeError> {
        let filename = waveform::capture_filename(self.use_timestamp, &self.custom_filename)?;
        self.ensure_session()?;
        let trace = self.scope()?.acquire()?;
        let path = self.save_dir.join(filename);
        trace.save_csv(&path)?;

        self.record_capture(&trace, &path);
        self.last_trace = Some(trace);
        self.last_trace_path = Some(path.clone());
        Ok(path)
    }

    fn record_capture(&mut self, trace: &WaveformTrace, path: &Path) {
        let Some(log) = self.capture_log.as_mut() else {
            return;
        };
        let record = CaptureRecord {
            timestamp: Utc::now(),
            resource: self.config.instrument.resource.clone(),
            channel: trace.channel,
            volts_per_div: self.displayed.volts_per_div,
            time_per_div: self.displayed.time_per_div,
            sample_rate: trace.sample_interval().map(|dt| 1.0 / dt),
            samples: trace.len(),
            path: path.to_path_buf(),
        };
        if let Err(e) = log.add(record) {
            warn!("Capture log disabled after repeated failures: {e}");
            self.capture_log = None;
        }
    }

    /// Save the last acquired trace to `path`.
    pub fn save_last(&mut self, path: &Path) -> Result<(), ScopeError> {
        let result = match &self.last_trace {
            Some(trace) => trace.save_csv(path),
            None => Err(ScopeError::Validation("no trace has been acquired yet".into())),
        };
        if result.is_ok() {
            self.last_trace_path = Some(path.to_path_buf());
        }
        self.finish_local(result, |_| format!("Saved {}", path.display()))
    }

    pub fn plot_last(&mut self, with_fft: bool) -> Result<PlotData, ScopeError> {
        let max_hz = self.config.plot.fft_max_frequency_hz;
        let result = match &self.last_trace {
            Some(trace) => PlotData::from_trace(trace, with_fft, max_hz),
            None => Err(ScopeError::Validation("no trace has been acquired yet".into())),
        };
        self.finish_local(result, |plot| plot.title.clone())
    }

    /// Load a saved trace and build its plot. Does not touch the instrument.
    pub fn plot_file(&mut self, path: &Path, with_fft: bool) -> Result<PlotData, ScopeError> {
        let max_hz = self.config.plot.fft_max_frequency_hz;
        let result = WaveformTrace::load_csv(path).and_then(|trace| {
            let mut plot = PlotData::from_trace(&trace, with_fft, max_hz)?;
            if let Some(name) = path.file_name() {
                plot.title = name.to_string_lossy().into_owned();
            }
            Ok(plot)
        });
        self.finish_local(result, |plot| format!("Plotted {}", plot.title))
    }

    pub fn change_folder(&mut self, dir: &Path) -> Result<(), ScopeError> {
        let result = if dir.is_file() {
            Err(ScopeError::Validation(format!("{} is a file", dir.display())))
        } else {
            self.save_dir = dir.to_path_buf();
            Ok(())
        };
        self.finish_local(result, |_| format!("Saving to {}", dir.display()))
    }

    /// Run function button `index` (0 for F1).
    pub fn run_hook(&mut self, index: usize) -> Result<HookOutcome, ScopeError> {
        let result = self.ensure_session().and_then(|()| {
            let channel = self.config.instrument.channel;
            let hooks = &self.hooks;
            let session = self
                .session
                .get()
                .ok_or_else(|| ScopeError::connection(self.config.instrument.resource.as_str(), "not connected"))?;
            let mut ctx = HookContext {
                params: &mut self.displayed,
                scope: Scope::new(session.link(), channel)?,
            };
            hooks.run(index, &mut ctx)
        });
        let label = self
            .hooks
            .get(index)
            .map(|s| format!("{} ({})", s.label, s.name))
            .unwrap_or_else(|| format!("F{}", index + 1));
        self.finish(result, |outcome| match outcome {
            HookOutcome::Nothing => format!("{label}: nothing to do"),
            HookOutcome::Message(text) => format!("{label}: {text}"),
            HookOutcome::Fitted(report) => format!("{label}: {report}"),
        })
    }

    fn open_session(&mut self) -> Result<(), ScopeError> {
        let address = self.config.instrument.address()?;
        let timeouts = self.config.instrument.connection();
        self.session
            .connect(self.connector.as_ref(), address, &timeouts)?;

        let mut scope = self.scope()?;
        let displayed = AcquisitionParameters {
            volts_per_div: Some(scope.volts_per_div()?),
            time_per_div: Some(scope.time_per_div()?),
        };
        self.displayed = displayed;
        self.status = ConnectionStatus::Connected;
        Ok(())
    }

    fn ensure_session(&mut self) -> Result<(), ScopeError> {
        if self.session.is_connected() {
            return Ok(());
        }
        if !self.config.instrument.auto_connect {
            return Err(ScopeError::connection(
                self.config.instrument.resource.as_str(),
                "not connected",
            ));
        }
        info!("No session, connecting to {}", self.config.instrument.resource);
        self.open_session()
    }

    fn scope(&mut self) -> Result<Scope<'_>, ScopeError> {
        Ok(self.scope_and_params()?.0)
    }

    fn scope_and_params(&mut self) -> Result<(Scope<'_>, &mut AcquisitionParameters), ScopeError> {
        let channel = self.config.instrument.channel;
        let resource = &self.config.instrument.resource;
        let session = self
            .session
            .get()
            .ok_or_else(|| ScopeError::connection(resource.as_str(), "not connected"))?;
        Ok((Scope::new(session.link(), channel)?, &mut self.displayed))
    }

    fn drop_session(&mut self) {
        self.session.disconnect();
        self.status = ConnectionStatus::Disconnected;
    }

    /// Mirror `result` of an instrument action into the status message and
    /// handle link failures.
    fn finish<T>(
        &mut self,
        result: Result<T, ScopeError>,
        describe: impl FnOnce(&T) -> String,
    ) -> Result<T, ScopeError> {
        self.report(result, true, describe)
    }

    /// Like [`Self::finish`] for actions that never talk to the instrument;
    /// the session and status are left alone whatever the error.
    fn finish_local<T>(
        &mut self,
        result: Result<T, ScopeError>,
        describe: impl FnOnce(&T) -> String,
    ) -> Result<T, ScopeError> {
        self.report(result, false, describe)
    }

    fn report<T>(
        &mut self,
        result: Result<T, ScopeError>,
        used_link: bool,
        describe: impl FnOnce(&T) -> String,
    ) -> Result<T, ScopeError> {
        match &result {
            Ok(value) => {
                let text = describe(value);
                info!("{text}");
                self.message = Some(StatusMessage::info(text));
            }
            Err(e) => {
                if used_link && e.is_link_failure() {
                    warn!("Instrument link lost: {e}");
                    self.drop_session();
                } else {
                    error!("{e}");
                }
                self.message = Some(StatusMessage::error(e.to_string()));
            }
        }
        result
    }
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SimHandle;
    use tempfile::tempdir;

    fn sim_app(sim: &SimHandle, dir: &Path) -> ScopeApp {
        let mut config = AppConfig::default();
        config.instrument.resource = "SIM::app".into();
        config.storage.data_dir = dir.to_path_buf();
        config.storage.capture_log = Some(dir.join("captures.jsonl"));
        ScopeApp::with_connector(config, Box::new(sim.clone()))
    }

    #[test]
    fn test_initial_state() {
        let app = ScopeApp::new(AppConfig::default());
        assert_eq!(app.status(), ConnectionStatus::Disconnected);
        assert_eq!(app.status().label(), "No Scope!");
        assert_eq!(app.displayed().volts_per_div_label(), "- V");
    }

    #[test]
    fn test_connect_reads_settings() {
        let sim = SimHandle::new();
        let dir = tempdir().unwrap();
        let mut app = sim_app(&sim, dir.path());
        app.connect().unwrap();
        assert_eq!(app.status().label(), "Scope Connected!");
        assert_eq!(app.displayed().volts_per_div, Some(1.0));
        assert_eq!(app.displayed().time_per_div, Some(1e-3));
    }

    #[test]
    fn test_update_scale_skips_empty_and_validates_first() {
        let sim = SimHandle::new();
        let dir = tempdir().unwrap();
        let mut app = sim_app(&sim, dir.path());
        app.connect().unwrap();
        sim.clear_commands();

        assert!(matches!(app.update_scale("2V", "abc"), Err(ScopeError::Validation(_))));
        assert!(sim.commands().is_empty());
        assert_eq!(app.status(), ConnectionStatus::Connected);
        assert!(app.message().unwrap().is_error());

        app.update_scale("", "2 ms").unwrap();
        assert_eq!(sim.commands(), vec!["TDIV 2.000E-03S"]);
        assert_eq!(app.displayed().time_per_div, Some(2e-3));
        assert_eq!(app.displayed().volts_per_div, Some(1.0));
    }

    #[test]
    fn test_acquire_and_save_names_and_logs() {
        let sim = SimHandle::new();
        sim.update(|s| s.points = 100);
        let dir = tempdir().unwrap();
        let mut app = sim_app(&sim, dir.path());

        app.use_timestamp = false;
        app.custom_filename = "run1".into();
        let path = app.acquire_and_save().unwrap();
        assert_eq!(path, dir.path().join("run1.csv"));
        assert_eq!(app.last_trace_path(), Some(path.as_path()));
        assert_eq!(WaveformTrace::load_csv(&path).unwrap().len(), 100);

        let records = CaptureLog::read_all(&dir.path().join("captures.jsonl")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].samples, 100);
    }

    #[test]
    fn test_bad_filename_fails_before_acquiring() {
        let sim = SimHandle::new();
        let dir = tempdir().unwrap();
        let mut app = sim_app(&sim, dir.path());
        app.use_timestamp = false;
        app.custom_filename = "  ".into();
        assert!(matches!(app.acquire_and_save(), Err(ScopeError::Validation(_))));
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn test_plot_last_requires_trace() {
        let sim = SimHandle::new();
        let dir = tempdir().unwrap();
        let mut app = sim_app(&sim, dir.path());
        assert!(app.plot_last(false).is_err());
        app.acquire().unwrap();
        let plot = app.plot_last(true).unwrap();
        assert!(plot.spectrum.is_some());
    }

    #[test]
    fn test_no_auto_connect_is_connection_error() {
        let sim = SimHandle::new();
        let dir = tempdir().unwrap();
        let mut app = sim_app(&sim, dir.path());
        app.config.instrument.auto_connect = false;
        assert!(matches!(app.acquire(), Err(ScopeError::Connection { .. })));
        assert_eq!(sim.open_sessions(), 0);
    }

    #[test]
    fn test_failed_plots_keep_session() {
        let sim = SimHandle::new();
        let dir = tempdir().unwrap();
        let mut app = sim_app(&sim, dir.path());
        app.connect().unwrap();

        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "Time (s),Voltage (V)\n0,abc\n").unwrap();
        assert!(matches!(app.plot_file(&bad, false), Err(ScopeError::Data(_))));
        assert!(app.plot_file(&dir.path().join("missing.csv"), true).is_err());
        assert_eq!(app.status(), ConnectionStatus::Connected);
        assert_eq!(sim.open_sessions(), 1);

        sim.update(|s| s.points = 1);
        assert_eq!(app.acquire().unwrap().len(), 1);
        assert!(matches!(app.plot_last(true), Err(ScopeError::Data(_))));
        assert!(app.message().unwrap().is_error());
        assert_eq!(app.status(), ConnectionStatus::Connected);
        assert_eq!(sim.open_sessions(), 1);

        // The session is still usable afterwards
        app.update_scale("2V", "").unwrap();
        assert_eq!(app.displayed().volts_per_div, Some(2.0));
    }

    #[test]
    fn test_change_folder_rejects_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f.csv");
        std::fs::write(&file, "").unwrap();
        let mut app = ScopeApp::new(AppConfig::default());
        assert!(app.change_folder(&file).is_err());
        app.change_folder(dir.path()).unwrap();
        assert_eq!(app.save_dir(), dir.path());
    }

    #[test]
    fn test_run_hook_fit_updates_display() {
        let sim = SimHandle::new();
        sim.set_signal(1000.0, 2.0);
        let dir = tempdir().unwrap();
        let mut app = sim_app(&sim, dir.path());
        let outcome = app.run_hook(0).unwrap();
        assert!(matches!(outcome, HookOutcome::Fitted(_)));
        assert_eq!(app.displayed().time_per_div, Some(100e-6));
        assert_eq!(app.displayed().volts_per_div, Some(2.0));
        assert_eq!(app.run_hook(5).unwrap(), HookOutcome::Nothing);
    }
}
