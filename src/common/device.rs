// src/common/device.rs

use core::fmt;

/// USB vendor id shared by every device in the Go! family.
pub const VERNIER_VENDOR_ID: u16 = 0x08F7;

pub const GO_TEMP_PRODUCT_ID: u16 = 0x0002;
pub const GO_LINK_PRODUCT_ID: u16 = 0x0003;
pub const GO_MOTION_PRODUCT_ID: u16 = 0x0004;
pub const MINI_GC_PRODUCT_ID: u16 = 0x0007;

/// Opaque name plus vendor/product ids; identifies one physical device instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentifier {
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentifier {
    pub fn new(name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        DeviceIdentifier { name: name.into(), vendor_id, product_id }
    }

    /// Device class named by the ids, if it is one this crate knows.
    pub fn kind(&self) -> Option<DeviceKind> {
        DeviceKind::from_ids(self.vendor_id, self.product_id)
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:04x}:{:04x})", self.name, self.vendor_id, self.product_id)
    }
}

/// Where a device class keeps its DDS record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NvMemoryLocation {
    /// Inside the interface itself.
    Local,
    /// Inside the attached sensor; only smart sensors carry one.
    Remote,
    /// No nonvolatile memory; the record is populated with class defaults.
    None,
}

/// Encoding of samples inside a measurement packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SampleFormat {
    /// Up to 3 samples per packet, `i16` little-endian.
    I16,
    /// One sample per packet, `i32` little-endian.
    I32,
}

impl SampleFormat {
    pub fn max_samples_per_packet(self) -> usize {
        match self {
            SampleFormat::I16 => 3,
            SampleFormat::I32 => 1,
        }
    }
}

/// Device classes of the Go! family and their capabilities.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    GoTemp,
    GoLink,
    GoMotion,
    MiniGc,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 4] =
        [DeviceKind::GoTemp, DeviceKind::GoLink, DeviceKind::GoMotion, DeviceKind::MiniGc];

    pub fn from_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        if vendor_id != VERNIER_VENDOR_ID {
            return None;
        }
        match product_id {
            GO_TEMP_PRODUCT_ID => Some(DeviceKind::GoTemp),
            GO_LINK_PRODUCT_ID => Some(DeviceKind::GoLink),
            GO_MOTION_PRODUCT_ID => Some(DeviceKind::GoMotion),
            MINI_GC_PRODUCT_ID => Some(DeviceKind::MiniGc),
            _ => None,
        }
    }

    pub fn product_id(self) -> u16 {
        match self {
            DeviceKind::GoTemp => GO_TEMP_PRODUCT_ID,
            DeviceKind::GoLink => GO_LINK_PRODUCT_ID,
            DeviceKind::GoMotion => GO_MOTION_PRODUCT_ID,
            DeviceKind::MiniGc => MINI_GC_PRODUCT_ID,
        }
    }

    pub fn nv_memory(self) -> NvMemoryLocation {
        match self {
            DeviceKind::GoTemp => NvMemoryLocation::Local,
            DeviceKind::GoLink | DeviceKind::MiniGc => NvMemoryLocation::Remote,
            DeviceKind::GoMotion => NvMemoryLocation::None,
        }
    }

    /// Whether the interface reports the id of the attached sensor.
    pub fn reports_sensor_id(self) -> bool {
        matches!(self, DeviceKind::GoLink | DeviceKind::MiniGc)
    }

    /// Whether the analog input channel must follow the probe type.
    pub fn has_probe_dependent_channel(self) -> bool {
        matches!(self, DeviceKind::GoLink | DeviceKind::MiniGc)
    }

    pub fn sample_format(self) -> SampleFormat {
        match self {
            DeviceKind::GoMotion => SampleFormat::I32,
            _ => SampleFormat::I16,
        }
    }

    /// Resolution of the measurement period, in seconds.
    pub fn measurement_tick(self) -> f64 {
        0.001
    }

    pub fn min_measurement_period(self) -> f64 {
        match self {
            DeviceKind::GoTemp => 0.010,
            DeviceKind::GoLink | DeviceKind::MiniGc => 0.002,
            DeviceKind::GoMotion => 0.020,
        }
    }

    pub fn max_measurement_period(self) -> f64 {
        60.0
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::GoTemp => "Go! Temp",
            DeviceKind::GoLink => "Go! Link",
            DeviceKind::GoMotion => "Go! Motion",
            DeviceKind::MiniGc => "Mini GC",
        };
        f.write_str(name)
    }
}
