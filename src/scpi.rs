//! SCPI vocabulary of the SDS1000X-E family: command strings, reply parsers
//! and the `WF? DAT2` waveform block.
//!
//! Replies are matched with the same header-echo patterns the scope uses
//! (`C1:VDIV 2.00E+00V`, `SARA 1.00GSa/s`), so every parser also checks that
//! the reply belongs to the query that was sent.

use crate::error::ScopeError;
use byteorder::ReadBytesExt;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::LazyLock;

static IDN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^,]+),([^,]+),([^,]+),([^,\s]+)").expect("valid regex"));
static VDIV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:C(\d):)?VDIV\s+(\S+)").expect("valid regex"));
static OFST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:C(\d):)?OFST\s+(\S+)").expect("valid regex"));
static TDIV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^TDIV\s+(\S+)").expect("valid regex"));
static SARA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SARA\s+(\S+)").expect("valid regex"));
static CYMT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CYMT\s+(\S+)").expect("valid regex"));
static PAVA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:C(\d):)?PAVA\s+(\w+),(\S+)").expect("valid regex"));
static TRMD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^TRMD\s+(\w+)").expect("valid regex"));
static SAST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SAST\s+(.+)$").expect("valid regex"));
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*(\S*)\s*$").expect("valid regex")
});

// Command builders

pub const IDN: &str = "*IDN?";
pub const TIME_DIV_QUERY: &str = "TDIV?";
pub const SAMPLE_RATE_QUERY: &str = "SARA?";
pub const FREQUENCY_QUERY: &str = "CYMT?";
pub const SAMPLE_STATUS_QUERY: &str = "SAST?";
pub const TRIGGER_MODE_QUERY: &str = "TRMD?";
pub const ARM: &str = "ARM";

pub fn set_volts_per_div(channel: u8, volts: f64) -> String {
    format!("C{channel}:VDIV {}V", sci_with(volts, 3))
}

pub fn volts_per_div_query(channel: u8) -> String {
    format!("C{channel}:VDIV?")
}

pub fn set_time_per_div(seconds: f64) -> String {
    format!("TDIV {}S", sci_with(seconds, 3))
}

pub fn offset_query(channel: u8) -> String {
    format!("C{channel}:OFST?")
}

pub fn max_voltage_query(channel: u8) -> String {
    format!("C{channel}:PAVA? MAX")
}

pub fn set_trigger_level(channel: u8, volts: f64) -> String {
    format!("C{channel}:TRLV {}V", sci_with(volts, 3))
}

pub fn set_trigger_mode(mode: TriggerMode) -> String {
    format!("TRMD {mode}")
}

pub fn waveform_query(channel: u8) -> String {
    format!("C{channel}:WF? DAT2")
}

/// Scientific notation as the scope prints it: `2.00E+00`.
pub fn sci(value: f64) -> String {
    sci_with(value, 2)
}

pub fn sci_with(value: f64, decimals: usize) -> String {
    let raw = format!("{value:.decimals$E}");
    match raw.split_once('E') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            format!("{mantissa}E{exp:+03}")
        }
        None => raw,
    }
}

/// Multiplier for an SI prefix character.
pub fn si_prefix(c: char) -> Option<f64> {
    match c {
        'p' => Some(1e-12),
        'n' => Some(1e-9),
        'u' | 'µ' | 'μ' => Some(1e-6),
        'm' => Some(1e-3),
        'k' | 'K' => Some(1e3),
        'M' => Some(1e6),
        'G' => Some(1e9),
        _ => None,
    }
}

/// Split `"500 mV"` into `(500.0, "mV")`.
pub fn split_number(text: &str) -> Option<(f64, &str)> {
    let caps = NUMBER_RE.captures(text)?;
    let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let suffix = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    Some((value, suffix))
}

/// Parse a number with an optional SI-prefixed unit (`2.00E+00V`, `1.00GSa/s`, `500uS`).
pub fn parse_scaled_number(text: &str) -> Option<f64> {
    let (value, suffix) = split_number(text)?;
    let mut chars = suffix.chars();
    let scale = match chars.next() {
        Some(c) if chars.as_str().chars().next().is_some_and(char::is_alphabetic) => {
            si_prefix(c).unwrap_or(1.0)
        }
        _ => 1.0,
    };
    let scaled = value * scale;
    scaled.is_finite().then_some(scaled)
}

fn capture_value(caps: &Captures, index: usize, what: &str, reply: &str) -> Result<f64, ScopeError> {
    let token = caps
        .get(index)
        .map(|m| m.as_str())
        .ok_or_else(|| ScopeError::Parse(format!("no {what} in '{reply}'")))?;
    parse_scaled_number(token)
        .ok_or_else(|| ScopeError::Parse(format!("{what} '{token}' is not a number")))
}

fn check_channel(caps: &Captures, channel: u8, reply: &str) -> Result<(), ScopeError> {
    match caps.get(1).map(|m| m.as_str()) {
        Some(echoed) if echoed != channel.to_string() => Err(ScopeError::Parse(format!(
            "reply '{reply}' is for channel {echoed}, expected {channel}"
        ))),
        _ => Ok(()),
    }
}

fn captures<'r>(re: &Regex, reply: &'r str, what: &str) -> Result<Captures<'r>, ScopeError> {
    re.captures(reply.trim())
        .ok_or_else(|| ScopeError::Parse(format!("unexpected reply for {what}: '{reply}'")))
}

pub fn parse_volts_per_div(reply: &str, channel: u8) -> Result<f64, ScopeError> {
    let caps = captures(&VDIV_RE, reply, "volts/div")?;
    check_channel(&caps, channel, reply)?;
    capture_value(&caps, 2, "volts/div", reply)
}

pub fn parse_offset(reply: &str, channel: u8) -> Result<f64, ScopeError> {
    let caps = captures(&OFST_RE, reply, "offset")?;
    check_channel(&caps, channel, reply)?;
    capture_value(&caps, 2, "offset", reply)
}

pub fn parse_time_per_div(reply: &str) -> Result<f64, ScopeError> {
    let caps = captures(&TDIV_RE, reply, "time/div")?;
    capture_value(&caps, 1, "time/div", reply)
}

pub fn parse_sample_rate(reply: &str) -> Result<f64, ScopeError> {
    let caps = captures(&SARA_RE, reply, "sample rate")?;
    capture_value(&caps, 1, "sample rate", reply)
}

pub fn parse_frequency(reply: &str) -> Result<f64, ScopeError> {
    let caps = captures(&CYMT_RE, reply, "frequency")?;
    capture_value(&caps, 1, "frequency", reply)
}

pub fn parse_max_voltage(reply: &str, channel: u8) -> Result<f64, ScopeError> {
    let caps = captures(&PAVA_RE, reply, "max voltage")?;
    check_channel(&caps, channel, reply)?;
    if !caps[2].eq_ignore_ascii_case("MAX") {
        return Err(ScopeError::Parse(format!("expected MAX measurement in '{reply}'")));
    }
    capture_value(&caps, 3, "max voltage", reply)
}

pub fn parse_trigger_mode(reply: &str) -> Result<TriggerMode, ScopeError> {
    let caps = captures(&TRMD_RE, reply, "trigger mode")?;
    caps[1].parse()
}

/// True once the acquisition has finished (`SAST Stop`).
pub fn parse_sample_status_stopped(reply: &str) -> Result<bool, ScopeError> {
    let caps = captures(&SAST_RE, reply, "sample status")?;
    Ok(caps[1].trim().eq_ignore_ascii_case("Stop"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial_num: String,
    pub fw_version: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (s/n {}, fw {})", self.manufacturer, self.model, self.serial_num, self.fw_version)
    }
}

pub fn parse_identity(reply: &str) -> Result<Identity, ScopeError> {
    let caps = captures(&IDN_RE, reply, "*IDN?")?;
    Ok(Identity {
        manufacturer: caps[1].trim().to_string(),
        model: caps[2].trim().to_string(),
        serial_num: caps[3].trim().to_string(),
        fw_version: caps[4].trim().to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    Auto,
    Norm,
    Single,
    Stop,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerMode::Auto => "AUTO",
            TriggerMode::Norm => "NORM",
            TriggerMode::Single => "SINGLE",
            TriggerMode::Stop => "STOP",
        };
        f.write_str(s)
    }
}

impl FromStr for TriggerMode {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(TriggerMode::Auto),
            "NORM" | "NORMAL" => Ok(TriggerMode::Norm),
            "SINGLE" => Ok(TriggerMode::Single),
            "STOP" => Ok(TriggerMode::Stop),
            other => Err(ScopeError::Parse(format!("invalid trigger mode '{other}'"))),
        }
    }
}

/// Locate the IEEE 488.2 definite-length block in a `WF? DAT2` reply and
/// return its payload.
///
/// Bytes after the declared payload (the `\n\n` trailer) are ignored.
pub fn decode_waveform_block(raw: &[u8]) -> Result<&[u8], ScopeError> {
    let hash = raw
        .iter()
        .position(|&b| b == b'#')
        .ok_or_else(|| ScopeError::Parse("waveform reply has no data block".into()))?;

    let digits = raw
        .get(hash + 1)
        .and_then(|&b| (b as char).to_digit(10))
        .filter(|&n| n > 0)
        .ok_or_else(|| ScopeError::Parse("invalid block length digit".into()))? as usize;

    let len_start = hash + 2;
    let len_bytes = raw
        .get(len_start..len_start + digits)
        .ok_or_else(|| ScopeError::Parse("block header truncated".into()))?;
    let len = std::str::from_utf8(len_bytes)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| ScopeError::Parse("block length is not a number".into()))?;

    let data_start = len_start + digits;
    raw.get(data_start..data_start + len).ok_or_else(|| {
        ScopeError::Parse(format!(
            "block declares {len} bytes but only {} arrived",
            raw.len().saturating_sub(data_start)
        ))
    })
}

/// Convert one ADC code to volts.
///
/// Codes above 127 are negative; the SDS1000X-E programming guide subtracts
/// 255 (not 256) and so does this.
pub fn code_to_voltage(code: u8, volts_per_div: f64, offset: f64) -> f64 {
    let mut code = code as i32;
    if code > 127 {
        code -= 255;
    }
    code as f64 * (volts_per_div / 25.0) - offset
}

/// Inverse of the sign handling in [`code_to_voltage`] for codes in -127..=127.
pub fn voltage_code_to_byte(code: i32) -> u8 {
    let code = code.clamp(-127, 127);
    if code < 0 { (code + 255) as u8 } else { code as u8 }
}

pub fn codes_to_voltages(payload: &[u8], volts_per_div: f64, offset: f64) -> Vec<f64> {
    let mut rdr = Cursor::new(payload);
    let mut voltages = Vec::with_capacity(payload.len());
    while let Ok(code) = rdr.read_u8() {
        voltages.push(code_to_voltage(code, volts_per_div, offset));
    }
    voltages
}
