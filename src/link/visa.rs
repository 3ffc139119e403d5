use super::{ConnectionConfig, InstrumentLink, MAX_REPLY_SIZE};
use crate::error::ScopeError;
use crate::scpi;
use log::debug;
use std::ffi::CString;
use std::io::{Read, Write};
use visa_rs::flags::AccessMode;
use visa_rs::{DefaultRM, Instrument};

const READ_CHUNK: usize = 4096;

/// Session opened through the vendor VISA library (USB, GPIB, VXI-11, HiSLIP).
///
/// The resource manager is kept alive for as long as the instrument, since
/// closing it ends every session it opened.
pub struct VisaLink {
    resource: String,
    instrument: Option<Instrument>,
    _rm: DefaultRM,
}

impl VisaLink {
    pub fn open(resource: &str, config: &ConnectionConfig) -> Result<Self, ScopeError> {
        let rm = DefaultRM::new()
            .map_err(|e| ScopeError::connection(resource, format!("VISA resource manager: {e}")))?;
        let rsc = CString::new(resource)
            .map_err(|e| ScopeError::connection(resource, e.to_string()))?
            .into();

        debug!("Opening VISA resource {resource}");
        let instrument = rm
            .open(&rsc, AccessMode::NO_LOCK, config.connect_timeout)
            .map_err(|e| ScopeError::connection(resource, e.to_string()))?;

        Ok(Self {
            resource: resource.to_string(),
            instrument: Some(instrument),
            _rm: rm,
        })
    }

    fn instrument(&mut self) -> Result<&mut Instrument, ScopeError> {
        let resource = &self.resource;
        self.instrument
            .as_mut()
            .ok_or_else(|| ScopeError::connection(resource.as_str(), "session is closed"))
    }

    fn read_chunk(&mut self, reply: &mut Vec<u8>, context: &str) -> Result<(), ScopeError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self
            .instrument()?
            .read(&mut chunk)
            .map_err(|e| ScopeError::communication(e, context))?;
        if n == 0 {
            return Err(ScopeError::communication(
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
                context,
            ));
        }
        reply.extend_from_slice(&chunk[..n]);
        if reply.len() > MAX_REPLY_SIZE {
            return Err(ScopeError::Parse(format!(
                "reply exceeds maximum {MAX_REPLY_SIZE} bytes"
            )));
        }
        Ok(())
    }
}

impl InstrumentLink for VisaLink {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn is_open(&self) -> bool {
        self.instrument.is_some()
    }

    fn send(&mut self, command: &str) -> Result<(), ScopeError> {
        debug!(">> {command}");
        self.instrument()?
            .write_all(format!("{command}\n").as_bytes())
            .map_err(|e| ScopeError::communication(e, format!("writing '{command}'")))
    }

    fn query(&mut self, command: &str) -> Result<String, ScopeError> {
        self.send(command)?;
        let context = format!("reading reply to '{command}'");
        let mut reply = Vec::new();
        while !reply.ends_with(b"\n") {
            self.read_chunk(&mut reply, &context)?;
        }
        let reply = String::from_utf8(reply)
            .map_err(|_| ScopeError::Parse(format!("reply to '{command}' is not UTF-8")))?;
        let reply = reply.trim().to_string();
        debug!("<< {reply}");
        Ok(reply)
    }

    fn query_raw(&mut self, command: &str) -> Result<Vec<u8>, ScopeError> {
        self.send(command)?;
        let context = format!("reading reply to '{command}'");
        let mut reply = Vec::new();
        loop {
            self.read_chunk(&mut reply, &context)?;
            if reply.contains(&b'#') {
                // Keep reading until the declared block length has arrived
                if scpi::decode_waveform_block(&reply).is_ok() {
                    break;
                }
            } else if reply.ends_with(b"\n") {
                break;
            }
        }
        debug!("<< {} raw bytes", reply.len());
        Ok(reply)
    }

    fn close(&mut self) {
        if self.instrument.take().is_some() {
            debug!("Closed VISA session {}", self.resource);
        }
    }
}
