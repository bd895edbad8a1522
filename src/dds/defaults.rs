// src/dds/defaults.rs

//! Class-appropriate records for devices or sensors that carry no usable DDS memory.

use super::record::{CalibrationPage, DdsRecord};
use crate::common::crc::ChecksumAlgorithm;
use crate::common::device::DeviceKind;
use crate::common::types::CalibrationEquation;

const FEET_PER_METRE: f32 = 3.280_839_9;

// Go! Temp raw counts are 1/128 °C, so volts (raw * 5 / 32768) times 51.2 gives °C.
const GO_TEMP_DEGC_PER_VOLT: f32 = 51.2;

/// Record for a plain analog voltage input: identity calibration in volts.
pub fn generic_analog(sensor_number: u8) -> DdsRecord {
    let mut rec = DdsRecord::default();
    rec.set_sensor_number(sensor_number);
    rec.set_long_name("Voltage");
    rec.set_short_name("V");
    rec.set_significant_figures(3);
    rec.set_typ_sample_period(0.1);
    rec.set_calibration_equation(CalibrationEquation::Linear.as_i8());
    rec.set_y_min(0.0);
    rec.set_y_max(5.0);
    set_pages(&mut rec, &[CalibrationPage::new(0.0, 1.0, 0.0, "V")]);
    rec
}

/// Record for a Go! Temp whose memory could not be trusted.
pub fn go_temp() -> DdsRecord {
    let mut rec = DdsRecord::default();
    rec.set_sensor_number(60);
    rec.set_long_name("Temperature");
    rec.set_short_name("Temp");
    rec.set_significant_figures(3);
    rec.set_min_sample_period(0.01);
    rec.set_typ_sample_period(0.5);
    rec.set_calibration_equation(CalibrationEquation::Linear.as_i8());
    rec.set_y_min(-20.0);
    rec.set_y_max(110.0);
    set_pages(
        &mut rec,
        &[
            CalibrationPage::new(0.0, GO_TEMP_DEGC_PER_VOLT, 0.0, "deg C"),
            CalibrationPage::new(32.0, GO_TEMP_DEGC_PER_VOLT * 1.8, 0.0, "deg F"),
            CalibrationPage::new(273.15, GO_TEMP_DEGC_PER_VOLT, 0.0, "K"),
        ],
    );
    rec
}

/// Record for a Go! Motion: distance pages in metres and feet.
pub fn go_motion() -> DdsRecord {
    let mut rec = DdsRecord::default();
    rec.set_sensor_number(69);
    rec.set_long_name("Position");
    rec.set_short_name("Pos");
    rec.set_significant_figures(3);
    rec.set_min_sample_period(0.02);
    rec.set_typ_sample_period(0.05);
    rec.set_calibration_equation(CalibrationEquation::Linear.as_i8());
    rec.set_y_min(0.15);
    rec.set_y_max(6.0);
    set_pages(
        &mut rec,
        &[
            CalibrationPage::new(0.0, 1.0, 0.0, "m"),
            CalibrationPage::new(0.0, FEET_PER_METRE, 0.0, "ft"),
        ],
    );
    rec
}

/// Default record for a device class, checksum filled in.
pub fn for_device(kind: DeviceKind, sensor_number: u8, algorithm: ChecksumAlgorithm) -> DdsRecord {
    let mut rec = match kind {
        DeviceKind::GoTemp => go_temp(),
        DeviceKind::GoMotion => go_motion(),
        DeviceKind::GoLink | DeviceKind::MiniGc => generic_analog(sensor_number),
    };
    rec.update_checksum(algorithm);
    rec
}

fn set_pages(rec: &mut DdsRecord, pages: &[CalibrationPage]) {
    // `pages` is never empty and never longer than MAX_CAL_PAGES here
    let highest = pages.len().saturating_sub(1) as u8;
    if rec.set_highest_valid_cal_page_index(highest).is_err() {
        return;
    }
    for (i, page) in pages.iter().enumerate() {
        let _ = rec.set_calibration_page(i as u8, page.clone());
    }
    let _ = rec.set_active_cal_page(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{ChecksumStatus, ValidationMode};

    #[test]
    fn test_motion_pages() {
        let rec = go_motion();
        assert_eq!(rec.highest_valid_cal_page_index(), 1);
        assert_eq!(rec.calibration_page(0).unwrap().units(), "m");
        let feet = rec.calibration_page(1).unwrap();
        assert_eq!(feet.units(), "ft");
        assert!((feet.b - 3.280_839_9).abs() < 1e-6);
        assert_eq!(rec.active_cal_page(), 0);
    }

    #[test]
    fn test_generic_identity_calibration() {
        let rec = generic_analog(0);
        let page = rec.active_calibration_page();
        assert_eq!((page.a, page.b), (0.0, 1.0));
        assert_eq!(page.units(), "V");
        assert_eq!(rec.calibration_equation(), 1);
    }

    #[test]
    fn test_for_device_has_valid_checksum() {
        for kind in DeviceKind::ALL {
            let rec = for_device(kind, 3, ChecksumAlgorithm::Xor8);
            assert_eq!(
                rec.validate(ValidationMode::Strict, ChecksumAlgorithm::Xor8).unwrap(),
                ChecksumStatus::Valid
            );
        }
        assert_eq!(for_device(DeviceKind::GoLink, 3, ChecksumAlgorithm::Xor8).sensor_number(), 3);
    }

    #[test]
    fn test_go_temp_pages() {
        let rec = go_temp();
        assert_eq!(rec.highest_valid_cal_page_index(), 2);
        assert_eq!(rec.calibration_page(2).unwrap().units(), "K");
    }
}
