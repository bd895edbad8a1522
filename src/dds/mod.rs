// src/dds/mod.rs

// DDS ("Digital Data Sensor") memory: the nonvolatile descriptor of a smart sensor.

pub mod defaults;
mod record;

pub use record::{
    CalibrationPage, DdsRecord, LotCode, CHECKSUM_OFFSET, DDS_RECORD_LEN, LONG_NAME_LEN,
    MAX_CAL_PAGES, SHORT_NAME_LEN, UNITS_LEN,
};
#[cfg(test)]
pub(crate) use record::sample_record;

/// Sensor numbers at or above this identify smart sensors that carry DDS memory.
pub const SMART_SENSOR_MIN_ID: u8 = 20;

/// Whether a sensor number reported by `GetSensorId` belongs to a smart sensor.
pub fn is_smart_sensor(sensor_number: u8) -> bool {
    sensor_number >= SMART_SENSOR_MIN_ID
}
