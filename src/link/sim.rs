//! In-process stand-in for an SDS1104X-E.
//!
//! Answers the same command forms as the real scope, with a sine wave on
//! every channel. Used by the test suite and by `SIM::` resource addresses
//! so the front ends can be exercised without hardware.

use super::{ConnectionConfig, Connector, InstrumentLink, ResourceAddress};
use crate::error::ScopeError;
use crate::scpi::{self, TriggerMode};
use log::debug;
use parking_lot::Mutex;
use std::f64::consts::PI;
use std::sync::Arc;

pub const SIM_IDN: &str = "Siglent Technologies,SDS1104X-E,SDSMMEBQ4R5668,8.1.6.1.37R2";

/// Shared state behind every [`SimulatedScope`] opened from the same handle.
#[derive(Debug, Clone)]
pub struct SimState {
    pub online: bool,
    pub volts_per_div: [f64; 4],
    pub offset: [f64; 4],
    pub time_per_div: f64,
    pub trigger_level: [f64; 4],
    pub trigger_mode: TriggerMode,
    pub sample_rate: f64,
    pub points: usize,
    pub signal_frequency: f64,
    pub signal_amplitude: f64,
    /// Every command written, in order
    pub commands: Vec<String>,
    pub open_sessions: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            online: true,
            volts_per_div: [1.0; 4],
            offset: [0.0; 4],
            time_per_div: 1e-3,
            trigger_level: [0.0; 4],
            trigger_mode: TriggerMode::Auto,
            sample_rate: 1e6,
            points: 10_000,
            signal_frequency: 1e3,
            signal_amplitude: 1.0,
            commands: Vec::new(),
            open_sessions: 0,
        }
    }
}

/// Cloneable handle used to inspect and steer a simulated instrument.
///
/// It doubles as a [`Connector`]: every link it opens shares this state, so a
/// test can take the scope offline or count sessions after handing the
/// connector to the application.
#[derive(Debug, Clone, Default)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    pub fn set_signal(&self, frequency: f64, amplitude: f64) {
        let mut state = self.state.lock();
        state.signal_frequency = frequency;
        state.signal_amplitude = amplitude;
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }

    pub fn state(&self) -> SimState {
        self.state.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut SimState)) {
        f(&mut self.state.lock());
    }

    pub fn open_scope(&self, resource: &str) -> Result<SimulatedScope, ScopeError> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(ScopeError::connection(resource, "instrument is powered off"));
        }
        state.open_sessions += 1;
        drop(state);
        Ok(SimulatedScope {
            resource: resource.to_string(),
            state: self.state.clone(),
            open: true,
        })
    }
}

impl Connector for SimHandle {
    fn open(
        &self,
        address: &ResourceAddress,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn InstrumentLink>, ScopeError> {
        Ok(Box::new(self.open_scope(&address.to_string())?))
    }
}

pub struct SimulatedScope {
    resource: String,
    state: Arc<Mutex<SimState>>,
    open: bool,
}

impl SimulatedScope {
    /// A standalone simulator with its own state.
    pub fn new(resource: &str) -> Self {
        let state = SimState {
            open_sessions: 1,
            ..SimState::default()
        };
        Self {
            resource: resource.to_string(),
            state: Arc::new(Mutex::new(state)),
            open: true,
        }
    }

    fn check(&self, command: &str) -> Result<(), ScopeError> {
        if !self.open {
            return Err(ScopeError::connection(self.resource.as_str(), "session is closed"));
        }
        if !self.state.lock().online {
            return Err(ScopeError::communication(
                std::io::Error::from(std::io::ErrorKind::BrokenPipe),
                format!("writing '{command}'"),
            ));
        }
        Ok(())
    }

    fn record(&self, command: &str) {
        debug!("sim >> {command}");
        self.state.lock().commands.push(command.to_string());
    }

    /// Apply a setting command; returns false when it is not understood.
    fn apply(state: &mut SimState, command: &str) -> bool {
        let (head, arg) = match command.split_once(' ') {
            Some((h, a)) => (h.trim(), a.trim()),
            None => (command.trim(), ""),
        };
        let (channel, name) = split_channel(head);
        let value = scpi::parse_scaled_number(arg);

        match (channel, name.to_ascii_uppercase().as_str(), value) {
            (Some(ch), "VDIV", Some(v)) => state.volts_per_div[ch] = v,
            (Some(ch), "OFST", Some(v)) => state.offset[ch] = v,
            (Some(ch), "TRLV", Some(v)) => state.trigger_level[ch] = v,
            (None, "TDIV", Some(v)) => state.time_per_div = v,
            (None, "TRMD", _) => match arg.parse::<TriggerMode>() {
                Ok(mode) => state.trigger_mode = mode,
                Err(_) => return false,
            },
            (None, "ARM", _) => state.trigger_mode = TriggerMode::Single,
            (None, "STOP", _) => state.trigger_mode = TriggerMode::Stop,
            _ => return false,
        }
        true
    }

    fn answer(state: &SimState, command: &str) -> Option<String> {
        let (head, arg) = match command.split_once(' ') {
            Some((h, a)) => (h.trim(), a.trim()),
            None => (command.trim(), ""),
        };
        let (channel, name) = split_channel(head);
        let n = channel.map(|c| c + 1).unwrap_or(1);

        let reply = match (channel, name.to_ascii_uppercase().as_str()) {
            (None, "*IDN?") => SIM_IDN.to_string(),
            (Some(ch), "VDIV?") => format!("C{n}:VDIV {}V", scpi::sci(state.volts_per_div[ch])),
            (Some(ch), "OFST?") => format!("C{n}:OFST {}V", scpi::sci(state.offset[ch])),
            (Some(ch), "TRLV?") => format!("C{n}:TRLV {}V", scpi::sci(state.trigger_level[ch])),
            (Some(ch), "PAVA?") if arg.eq_ignore_ascii_case("MAX") => format!(
                "C{n}:PAVA MAX,{}V",
                scpi::sci(state.signal_amplitude - state.offset[ch])
            ),
            (None, "TDIV?") => format!("TDIV {}S", scpi::sci(state.time_per_div)),
            (None, "SARA?") => format!("SARA {}Sa/s", scpi::sci(state.sample_rate)),
            (None, "CYMT?") => format!("CYMT {}Hz", scpi::sci(state.signal_frequency)),
            (None, "TRMD?") => format!("TRMD {}", state.trigger_mode),
            (None, "SAST?") => "SAST Stop".to_string(),
            _ => return None,
        };
        Some(reply)
    }

    fn waveform(state: &SimState, channel: usize) -> Vec<u8> {
        let vdiv = state.volts_per_div[channel];
        let offset = state.offset[channel];
        let codes: Vec<u8> = (0..state.points)
            .map(|i| {
                let t = i as f64 / state.sample_rate;
                let v = state.signal_amplitude * (2.0 * PI * state.signal_frequency * t).sin();
                let code = ((v + offset) * 25.0 / vdiv).round().clamp(-127.0, 127.0) as i32;
                scpi::voltage_code_to_byte(code)
            })
            .collect();

        let mut reply = format!("C{}:WF DAT2,#9{:09}", channel + 1, codes.len()).into_bytes();
        reply.extend_from_slice(&codes);
        reply
    }
}

/// `C2:VDIV?` -> (Some(1), "VDIV?")
fn split_channel(head: &str) -> (Option<usize>, &str) {
    if let Some((prefix, rest)) = head.split_once(':') {
        let mut chars = prefix.chars();
        if matches!(chars.next(), Some('C' | 'c')) {
            if let Ok(n) = chars.as_str().parse::<usize>() {
                if (1..=4).contains(&n) {
                    return (Some(n - 1), rest);
                }
            }
        }
    }
    (None, head)
}

impl InstrumentLink for SimulatedScope {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, command: &str) -> Result<(), ScopeError> {
        self.check(command)?;
        self.record(command);
        let mut state = self.state.lock();
        if !command.contains('?') && !Self::apply(&mut state, command) {
            debug!("sim ignored '{command}'");
        }
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, ScopeError> {
        self.check(command)?;
        self.record(command);
        let state = self.state.lock();
        Self::answer(&state, command)
            .ok_or_else(|| ScopeError::Timeout(format!("no reply to '{command}'")))
    }

    fn query_raw(&mut self, command: &str) -> Result<Vec<u8>, ScopeError> {
        self.check(command)?;
        self.record(command);
        let state = self.state.lock();
        let (head, arg) = command.split_once(' ').unwrap_or((command, ""));
        match split_channel(head) {
            (Some(ch), name) if name.eq_ignore_ascii_case("WF?") && arg.trim() == "DAT2" => {
                Ok(Self::waveform(&state, ch))
            }
            _ => Self::answer(&state, command)
                .map(String::into_bytes)
                .ok_or_else(|| ScopeError::Timeout(format!("no reply to '{command}'"))),
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.state.lock();
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
    }
}

impl Drop for SimulatedScope {
    fn drop(&mut self) {
        self.close();
    }
}
