//! Instrument link: the transport between the command layer and the scope.
//!
//! Everything above this module talks to an instrument through the
//! [`InstrumentLink`] trait, so the same command code drives a raw SCPI socket,
//! the vendor VISA library (feature `visa`) or the in-process simulator.

use crate::error::ScopeError;
use log::debug;
use std::fmt;
use std::time::Duration;

pub mod sim;
pub mod tcp;
#[cfg(feature = "visa")]
pub mod visa;

pub use sim::{SimHandle, SimulatedScope};
pub use tcp::SocketLink;
#[cfg(feature = "visa")]
pub use visa::VisaLink;

/// Port used by Siglent scopes for raw SCPI over LAN.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Largest reply accepted from the instrument.
pub const MAX_REPLY_SIZE: usize = 64 * 1024 * 1024;

/// Request/response primitives every transport provides.
pub trait InstrumentLink: Send {
    /// Resource string this link was opened with
    fn resource(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Write a command that produces no reply.
    fn send(&mut self, command: &str) -> Result<(), ScopeError>;

    /// Write a command and read back one line of text, without the terminator.
    fn query(&mut self, command: &str) -> Result<String, ScopeError>;

    /// Write a command and read back the complete raw reply, including any
    /// echoed header and definite-length block.
    fn query_raw(&mut self, command: &str) -> Result<Vec<u8>, ScopeError>;

    /// Release the session. Calling it again is a no-op.
    fn close(&mut self);
}

/// Parsed form of a VISA-style resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// `TCPIP0::host::port::SOCKET`, `TCPIP0::host::INSTR` or plain `host:port`
    Socket { host: String, port: u16 },
    /// `USB0::vid::pid::serial::0::INSTR`, opened through VISA
    Usb { resource: String },
    /// `SIM::name`, the built-in simulated instrument
    Simulated { name: String },
}

impl ResourceAddress {
    pub fn parse(resource: &str) -> Result<Self, ScopeError> {
        let trimmed = resource.trim();
        if trimmed.is_empty() {
            return Err(ScopeError::connection(resource, "empty resource address"));
        }

        let parts: Vec<&str> = trimmed.split("::").collect();
        let interface = parts[0].to_ascii_uppercase();

        if parts.len() == 1 {
            // Plain "host:port" shorthand
            return match trimmed.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() => {
                    let port = port.parse::<u16>().map_err(|_| {
                        ScopeError::connection(resource, format!("invalid port '{port}'"))
                    })?;
                    Ok(ResourceAddress::Socket {
                        host: host.to_string(),
                        port,
                    })
                }
                _ => Err(ScopeError::connection(
                    resource,
                    "unrecognised resource address",
                )),
            };
        }

        if interface.starts_with("TCPIP") {
            let host = parts[1].to_string();
            if host.is_empty() {
                return Err(ScopeError::connection(resource, "missing host"));
            }
            return match parts.as_slice() {
                [_, _] => Ok(ResourceAddress::Socket {
                    host,
                    port: DEFAULT_SCPI_PORT,
                }),
                [_, _, last] if last.eq_ignore_ascii_case("INSTR") => {
                    Ok(ResourceAddress::Socket {
                        host,
                        port: DEFAULT_SCPI_PORT,
                    })
                }
                [_, _, port, last] if last.eq_ignore_ascii_case("SOCKET") => {
                    let port = port.parse::<u16>().map_err(|_| {
                        ScopeError::connection(resource, format!("invalid port '{port}'"))
                    })?;
                    Ok(ResourceAddress::Socket { host, port })
                }
                _ => Err(ScopeError::connection(
                    resource,
                    "unsupported TCPIP resource form",
                )),
            };
        }

        if interface.starts_with("USB") {
            if parts.len() < 4 {
                return Err(ScopeError::connection(
                    resource,
                    "USB resource needs vendor, product and serial",
                ));
            }
            return Ok(ResourceAddress::Usb {
                resource: trimmed.to_string(),
            });
        }

        if interface == "SIM" {
            let name = parts.get(1).copied().unwrap_or("default");
            return Ok(ResourceAddress::Simulated {
                name: if name.is_empty() { "default" } else { name }.to_string(),
            });
        }

        Err(ScopeError::connection(
            resource,
            format!("unsupported interface '{}'", parts[0]),
        ))
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAddress::Socket { host, port } => write!(f, "TCPIP0::{host}::{port}::SOCKET"),
            ResourceAddress::Usb { resource } => write!(f, "{resource}"),
            ResourceAddress::Simulated { name } => write!(f, "SIM::{name}"),
        }
    }
}

/// Timeouts for an instrument session.
///
/// Slow acquisitions (long time bases, large memory depths) may need a
/// longer `read_timeout`; everything else is answered within milliseconds.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for opening the session
    pub connect_timeout: Duration,
    /// Timeout for reading a reply
    pub read_timeout: Duration,
    /// Timeout for writing a command
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// Builder for opening an [`InstrumentLink`].
///
/// ```no_run
/// use std::time::Duration;
/// use sds_scope::link::LinkBuilder;
///
/// let link = LinkBuilder::new()
///     .resource("TCPIP0::192.168.1.91::5025::SOCKET")
///     .read_timeout(Duration::from_secs(10))
///     .open()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Default)]
pub struct LinkBuilder {
    resource: Option<String>,
    config: ConnectionConfig,
}

impl LinkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    /// Set the full connection configuration
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn open(self) -> Result<Box<dyn InstrumentLink>, ScopeError> {
        let resource = self
            .resource
            .ok_or_else(|| ScopeError::connection("", "resource address must be specified"))?;
        let address = ResourceAddress::parse(&resource)?;
        open_link(&address, &self.config)
    }
}

/// Open a link for an already parsed address.
pub fn open_link(
    address: &ResourceAddress,
    config: &ConnectionConfig,
) -> Result<Box<dyn InstrumentLink>, ScopeError> {
    debug!("Opening instrument link to {address}");
    match address {
        ResourceAddress::Socket { host, port } => {
            Ok(Box::new(SocketLink::connect(host, *port, config)?))
        }
        ResourceAddress::Simulated { .. } => Ok(Box::new(SimulatedScope::new(&address.to_string()))),
        #[cfg(feature = "visa")]
        ResourceAddress::Usb { resource } => Ok(Box::new(VisaLink::open(resource, config)?)),
        #[cfg(not(feature = "visa"))]
        ResourceAddress::Usb { resource } => Err(ScopeError::connection(
            resource.as_str(),
            "USB resources need the vendor VISA library; rebuild with --features visa",
        )),
    }
}

/// Something that can open instrument links.
///
/// The application context goes through this seam rather than calling
/// [`open_link`] directly, so tests can hand it a simulator they keep a handle to.
pub trait Connector: Send {
    fn open(
        &self,
        address: &ResourceAddress,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn InstrumentLink>, ScopeError>;
}

/// Opens real transports based on the address kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    fn open(
        &self,
        address: &ResourceAddress,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn InstrumentLink>, ScopeError> {
        open_link(address, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_forms() {
        assert_eq!(
            ResourceAddress::parse("TCPIP0::192.168.1.91::5025::SOCKET").unwrap(),
            ResourceAddress::Socket {
                host: "192.168.1.91".into(),
                port: 5025
            }
        );
        assert_eq!(
            ResourceAddress::parse("TCPIP::scope.lab::INSTR").unwrap(),
            ResourceAddress::Socket {
                host: "scope.lab".into(),
                port: DEFAULT_SCPI_PORT
            }
        );
        assert_eq!(
            ResourceAddress::parse("127.0.0.1:6000").unwrap(),
            ResourceAddress::Socket {
                host: "127.0.0.1".into(),
                port: 6000
            }
        );
    }

    #[test]
    fn test_parse_usb_and_sim() {
        let usb = ResourceAddress::parse("USB0::0xF4EC::0xEE38::SDSMMEBQ4R5668::0::INSTR").unwrap();
        assert!(matches!(usb, ResourceAddress::Usb { .. }));
        assert_eq!(
            ResourceAddress::parse("sim::bench").unwrap(),
            ResourceAddress::Simulated {
                name: "bench".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "GPIB0::7::INSTR", "TCPIP0::host::abc::SOCKET", "USB0::1", "nonsense"] {
            let err = ResourceAddress::parse(bad).unwrap_err();
            assert!(matches!(err, ScopeError::Connection { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn test_display_round_trips() {
        let addr = ResourceAddress::Socket {
            host: "10.0.0.2".into(),
            port: 5025,
        };
        assert_eq!(ResourceAddress::parse(&addr.to_string()).unwrap(), addr);
    }

    #[test]
    fn test_builder_opens_simulator_and_requires_resource() {
        let mut link = LinkBuilder::new()
            .resource("SIM::builder")
            .read_timeout(Duration::from_millis(100))
            .open()
            .unwrap();
        assert!(link.is_open());
        assert!(link.query("*IDN?").unwrap().contains("SDS1104X-E"));
        link.close();
        assert!(!link.is_open());

        assert!(matches!(LinkBuilder::new().open(), Err(ScopeError::Connection { .. })));
    }

    #[cfg(not(feature = "visa"))]
    #[test]
    fn test_usb_without_visa_is_connection_error() {
        let addr = ResourceAddress::parse("USB0::0xF4EC::0xEE38::SER::0::INSTR").unwrap();
        let err = open_link(&addr, &ConnectionConfig::default()).err().unwrap();
        assert!(matches!(err, ScopeError::Connection { .. }));
    }
}
