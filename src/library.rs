// src/library.rs

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use log::{debug, info};

use crate::common::{
    device::{DeviceIdentifier, DeviceKind, VERNIER_VENDOR_ID},
    error::GoIoError,
    hal_traits::{DeviceConnector, PacketChannel},
};
use crate::session::{OpenRegistry, Session, SessionConfig};

/// Transport error type of a connector's channels.
pub type ChannelError<K> = <<K as DeviceConnector>::Channel as PacketChannel>::Error;

/// Library context: device discovery plus the registry that keeps each device open at most once.
///
/// Initialization is counted: every `init()` needs a matching `uninit()`. Both may only be
/// called from the thread that created the context.
pub struct Library<K: DeviceConnector> {
    connector: K,
    creator: ThreadId,
    init_count: u32,
    snapshots: HashMap<DeviceKind, Vec<DeviceIdentifier>>,
    registry: OpenRegistry,
}

impl<K> Library<K>
where
    K: DeviceConnector,
    ChannelError<K>: Send + 'static,
{
    /// Creates an uninitialized context owned by the calling thread.
    pub fn new(connector: K) -> Self {
        Library {
            connector,
            creator: thread::current().id(),
            init_count: 0,
            snapshots: HashMap::new(),
            registry: OpenRegistry::new(),
        }
    }

    fn ensure_creator(&self) -> Result<(), GoIoError<ChannelError<K>>> {
        if thread::current().id() == self.creator {
            Ok(())
        } else {
            Err(GoIoError::OwnershipViolation)
        }
    }

    fn ensure_initialized(&self) -> Result<(), GoIoError<ChannelError<K>>> {
        self.ensure_creator()?;
        if self.init_count == 0 {
            return Err(GoIoError::NotInitialized);
        }
        Ok(())
    }

    /// Initializes the context (or adds one more reference to it).
    ///
    /// # Returns
    ///
    /// The number of outstanding `init()` calls.
    pub fn init(&mut self) -> Result<u32, GoIoError<ChannelError<K>>> {
        self.ensure_creator()?;
        self.init_count += 1;
        if self.init_count == 1 {
            info!("GoIO library initialized");
        }
        Ok(self.init_count)
    }

    /// Drops one reference. The last one forgets every device list snapshot.
    ///
    /// Sessions opened through the context stay usable until they are closed.
    pub fn uninit(&mut self) -> Result<u32, GoIoError<ChannelError<K>>> {
        self.ensure_initialized()?;
        self.init_count -= 1;
        if self.init_count == 0 {
            self.snapshots.clear();
            info!(
                "GoIO library uninitialized ({} sessions still open)",
                self.registry.open_count()
            );
        }
        Ok(self.init_count)
    }

    pub fn is_initialized(&self) -> bool {
        self.init_count > 0
    }

    /// Re-enumerates attached devices of `kind` and stores the snapshot.
    ///
    /// # Returns
    ///
    /// The number of devices found.
    pub fn update_list_of_available_devices(
        &mut self,
        kind: DeviceKind,
    ) -> Result<usize, GoIoError<ChannelError<K>>> {
        self.ensure_initialized()?;
        let found = self.connector.list_devices(VERNIER_VENDOR_ID, kind.product_id());
        debug!("Found {} {} devices", found.len(), kind);
        let n = found.len();
        self.snapshots.insert(kind, found);
        Ok(n)
    }

    /// The `n`th device of `kind` in the last snapshot.
    pub fn nth_available_device(
        &self,
        kind: DeviceKind,
        n: usize,
    ) -> Result<DeviceIdentifier, GoIoError<ChannelError<K>>> {
        self.ensure_initialized()?;
        self.snapshots
            .get(&kind)
            .and_then(|list| list.get(n))
            .cloned()
            .ok_or(GoIoError::DeviceNotFound)
    }

    /// Opens a session on an attached device.
    ///
    /// # Errors
    ///
    /// * `NotInitialized` if `init()` has not been called.
    /// * `AlreadyOpen` if a session for the device is still open.
    /// * `DeviceNotFound` if the device is not (or no longer) attached.
    /// * Anything [`Session::open`] reports while initializing the device.
    pub fn open(
        &mut self,
        id: &DeviceIdentifier,
        config: SessionConfig,
    ) -> Result<Session<K::Channel>, GoIoError<ChannelError<K>>> {
        self.ensure_initialized()?;
        if self.registry.is_open(&id.name) {
            return Err(GoIoError::AlreadyOpen);
        }
        if id.kind().is_none()
            || !self.connector.list_devices(id.vendor_id, id.product_id).contains(id)
        {
            return Err(GoIoError::DeviceNotFound);
        }
        let channel = self.connector.connect(id).map_err(GoIoError::Io)?;
        Session::open_with_registry(channel, id, config, &self.registry)
    }

    /// Number of sessions opened through this context that are still open.
    pub fn open_sessions(&self) -> usize {
        self.registry.open_count()
    }

    pub fn connector_mut(&mut self) -> &mut K {
        &mut self.connector
    }
}
