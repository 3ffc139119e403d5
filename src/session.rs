//! Ownership of the live instrument connection.

use crate::error::ScopeError;
use crate::link::{ConnectionConfig, Connector, InstrumentLink, ResourceAddress};
use log::{debug, info};

/// One open instrument link.
///
/// The link is closed when the session is dropped.
pub struct Session {
    address: ResourceAddress,
    link: Box<dyn InstrumentLink>,
}

impl Session {
    pub fn open(
        connector: &dyn Connector,
        address: ResourceAddress,
        config: &ConnectionConfig,
    ) -> Result<Self, ScopeError> {
        let link = connector.open(&address, config)?;
        info!("Session opened on {address}");
        Ok(Self { address, link })
    }

    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    pub fn link(&mut self) -> &mut dyn InstrumentLink {
        self.link.as_mut()
    }

    pub fn close(&mut self) {
        if self.link.is_open() {
            self.link.close();
            info!("Session on {} closed", self.address);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Holds at most one [`Session`].
#[derive(Default)]
pub struct SessionSlot {
    current: Option<Session>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.current.as_ref().is_some_and(Session::is_open)
    }

    /// Replace any existing session with a new one.
    ///
    /// The old session is closed before the new one is opened. On failure the
    /// slot is left empty.
    pub fn connect(
        &mut self,
        connector: &dyn Connector,
        address: ResourceAddress,
        config: &ConnectionConfig,
    ) -> Result<&mut Session, ScopeError> {
        self.disconnect();
        let session = Session::open(connector, address, config)?;
        Ok(self.current.insert(session))
    }

    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.current.take() {
            debug!("Dropping session on {}", session.address());
            session.close();
        }
    }

    /// The live session, if any. A session whose link has closed is discarded.
    pub fn get(&mut self) -> Option<&mut Session> {
        if !self.is_connected() {
            self.current = None;
        }
        self.current.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SimHandle;

    fn sim_address() -> ResourceAddress {
        ResourceAddress::parse("SIM::slot").unwrap()
    }

    #[test]
    fn test_reconnect_keeps_one_session() {
        let sim = SimHandle::new();
        let mut slot = SessionSlot::new();
        let config = ConnectionConfig::default();

        slot.connect(&sim, sim_address(), &config).unwrap();
        slot.connect(&sim, sim_address(), &config).unwrap();
        assert_eq!(sim.open_sessions(), 1);

        slot.disconnect();
        slot.disconnect();
        assert_eq!(sim.open_sessions(), 0);
        assert!(!slot.is_connected());
    }

    #[test]
    fn test_failed_connect_leaves_slot_empty() {
        let sim = SimHandle::new();
        let mut slot = SessionSlot::new();
        let config = ConnectionConfig::default();

        slot.connect(&sim, sim_address(), &config).unwrap();
        sim.set_online(false);
        assert!(slot.connect(&sim, sim_address(), &config).is_err());
        assert!(slot.get().is_none());
        assert_eq!(sim.open_sessions(), 0);
    }

    #[test]
    fn test_closed_link_is_discarded() {
        let sim = SimHandle::new();
        let mut slot = SessionSlot::new();
        slot.connect(&sim, sim_address(), &ConnectionConfig::default())
            .unwrap()
            .link()
            .close();
        assert!(slot.get().is_none());
    }
}
