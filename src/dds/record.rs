// src/dds/record.rs

use heapless::String as BoundedString;

use crate::common::crc::ChecksumAlgorithm;
use crate::common::error::GoIoError;
use crate::common::types::{ChecksumStatus, ValidationMode};

/// Size of a DDS record on the wire, checksum included.
pub const DDS_RECORD_LEN: usize = 128;
/// Offset of the checksum byte; the checksum covers every byte before it.
pub const CHECKSUM_OFFSET: usize = DDS_RECORD_LEN - 1;

pub const LONG_NAME_LEN: usize = 20;
pub const SHORT_NAME_LEN: usize = 12;
pub const UNITS_LEN: usize = 7;
/// Number of calibration pages stored in a record.
pub const MAX_CAL_PAGES: usize = 3;

// --- Wire offsets ---
const OFF_MEM_MAP_VERSION: usize = 0;
const OFF_SENSOR_NUMBER: usize = 1;
const OFF_SERIAL: usize = 2;
const OFF_LOT_CODE: usize = 5;
const OFF_MANUFACTURER_ID: usize = 7;
const OFF_LONG_NAME: usize = 8;
const OFF_SHORT_NAME: usize = OFF_LONG_NAME + LONG_NAME_LEN;
const OFF_UNCERTAINTY: usize = OFF_SHORT_NAME + SHORT_NAME_LEN;
const OFF_SIG_FIGS: usize = 41;
const OFF_CURRENT_REQUIREMENT: usize = 42;
const OFF_AVERAGING: usize = 43;
const OFF_MIN_SAMPLE_PERIOD: usize = 44;
const OFF_TYP_SAMPLE_PERIOD: usize = 48;
const OFF_TYP_NUMBER_OF_SAMPLES: usize = 52;
const OFF_WARM_UP_TIME: usize = 54;
const OFF_EXPERIMENT_TYPE: usize = 56;
const OFF_OPERATION_TYPE: usize = 57;
const OFF_CALIBRATION_EQUATION: usize = 58;
const OFF_Y_MIN: usize = 59;
const OFF_Y_MAX: usize = 63;
const OFF_Y_SCALE: usize = 67;
const OFF_HIGHEST_VALID_CAL_PAGE: usize = 68;
const OFF_ACTIVE_CAL_PAGE: usize = 69;
const OFF_CAL_PAGES: usize = 70;
const CAL_PAGE_LEN: usize = 3 * 4 + UNITS_LEN;

/// Manufacturing lot code, two BCD bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct LotCode {
    pub year_bcd: u8,
    pub week_bcd: u8,
}

/// One set of calibration coefficients and its unit label.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibrationPage {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    units: BoundedString<UNITS_LEN>,
}

impl CalibrationPage {
    /// Builds a page; `units` is truncated to 7 bytes.
    pub fn new(a: f32, b: f32, c: f32, units: &str) -> Self {
        CalibrationPage { a, b, c, units: truncated(units) }
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn set_units(&mut self, units: &str) {
        self.units = truncated(units);
    }
}

/// Local mirror of a sensor's nonvolatile descriptor record.
///
/// Fields are only changed through the setters. Strings longer than their wire size are
/// truncated at a character boundary, never overflowed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DdsRecord {
    mem_map_version: u8,
    sensor_number: u8,
    serial_number: [u8; 3],
    lot_code: LotCode,
    manufacturer_id: u8,
    long_name: BoundedString<LONG_NAME_LEN>,
    short_name: BoundedString<SHORT_NAME_LEN>,
    uncertainty: u8,
    significant_figures: u8,
    current_requirement: u8,
    averaging: u8,
    min_sample_period: f32,
    typ_sample_period: f32,
    typ_number_of_samples: u16,
    warm_up_time: u16,
    experiment_type: u8,
    operation_type: u8,
    calibration_equation: i8,
    y_min: f32,
    y_max: f32,
    y_scale: u8,
    highest_valid_cal_page_index: u8,
    active_cal_page: u8,
    cal_pages: [CalibrationPage; MAX_CAL_PAGES],
    checksum: u8,
}

/// Copies as much of `s` as fits into `N` bytes without splitting a character.
fn truncated<const N: usize>(s: &str) -> BoundedString<N> {
    let mut out = BoundedString::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

fn read_str<const N: usize>(bytes: &[u8]) -> BoundedString<N> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    truncated(&std::string::String::from_utf8_lossy(&bytes[..end]))
}

fn write_str(dst: &mut [u8], s: &str) {
    let n = s.len().min(dst.len());
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
}

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

impl DdsRecord {
    // --- Wire conversion ---

    /// Decodes a record field by field from its 128-byte wire image.
    pub fn from_bytes(bytes: &[u8; DDS_RECORD_LEN]) -> Self {
        let mut cal_pages: [CalibrationPage; MAX_CAL_PAGES] = Default::default();
        for (i, page) in cal_pages.iter_mut().enumerate() {
            let at = OFF_CAL_PAGES + i * CAL_PAGE_LEN;
            page.a = read_f32(bytes, at);
            page.b = read_f32(bytes, at + 4);
            page.c = read_f32(bytes, at + 8);
            page.units = read_str(&bytes[at + 12..at + 12 + UNITS_LEN]);
        }

        DdsRecord {
            mem_map_version: bytes[OFF_MEM_MAP_VERSION],
            sensor_number: bytes[OFF_SENSOR_NUMBER],
            serial_number: [bytes[OFF_SERIAL], bytes[OFF_SERIAL + 1], bytes[OFF_SERIAL + 2]],
            lot_code: LotCode { year_bcd: bytes[OFF_LOT_CODE], week_bcd: bytes[OFF_LOT_CODE + 1] },
            manufacturer_id: bytes[OFF_MANUFACTURER_ID],
            long_name: read_str(&bytes[OFF_LONG_NAME..OFF_LONG_NAME + LONG_NAME_LEN]),
            short_name: read_str(&bytes[OFF_SHORT_NAME..OFF_SHORT_NAME + SHORT_NAME_LEN]),
            uncertainty: bytes[OFF_UNCERTAINTY],
            significant_figures: bytes[OFF_SIG_FIGS],
            current_requirement: bytes[OFF_CURRENT_REQUIREMENT],
            averaging: bytes[OFF_AVERAGING],
            min_sample_period: read_f32(bytes, OFF_MIN_SAMPLE_PERIOD),
            typ_sample_period: read_f32(bytes, OFF_TYP_SAMPLE_PERIOD),
            typ_number_of_samples: read_u16(bytes, OFF_TYP_NUMBER_OF_SAMPLES),
            warm_up_time: read_u16(bytes, OFF_WARM_UP_TIME),
            experiment_type: bytes[OFF_EXPERIMENT_TYPE],
            operation_type: bytes[OFF_OPERATION_TYPE],
            calibration_equation: bytes[OFF_CALIBRATION_EQUATION] as i8,
            y_min: read_f32(bytes, OFF_Y_MIN),
            y_max: read_f32(bytes, OFF_Y_MAX),
            y_scale: bytes[OFF_Y_SCALE],
            highest_valid_cal_page_index: bytes[OFF_HIGHEST_VALID_CAL_PAGE],
            active_cal_page: bytes[OFF_ACTIVE_CAL_PAGE],
            cal_pages,
            checksum: bytes[CHECKSUM_OFFSET],
        }
    }

    /// Like [`DdsRecord::from_bytes`] but for a slice of unchecked length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GoIoError> {
        let image: &[u8; DDS_RECORD_LEN] = bytes
            .try_into()
            .map_err(|_| GoIoError::InvalidParameter("DDS record must be 128 bytes"))?;
        Ok(Self::from_bytes(image))
    }

    /// Encodes the record, stored checksum included as-is.
    pub fn to_bytes(&self) -> [u8; DDS_RECORD_LEN] {
        let mut out = [0u8; DDS_RECORD_LEN];
        out[OFF_MEM_MAP_VERSION] = self.mem_map_version;
        out[OFF_SENSOR_NUMBER] = self.sensor_number;
        out[OFF_SERIAL..OFF_SERIAL + 3].copy_from_slice(&self.serial_number);
        out[OFF_LOT_CODE] = self.lot_code.year_bcd;
        out[OFF_LOT_CODE + 1] = self.lot_code.week_bcd;
        out[OFF_MANUFACTURER_ID] = self.manufacturer_id;
        write_str(&mut out[OFF_LONG_NAME..OFF_LONG_NAME + LONG_NAME_LEN], &self.long_name);
        write_str(&mut out[OFF_SHORT_NAME..OFF_SHORT_NAME + SHORT_NAME_LEN], &self.short_name);
        out[OFF_UNCERTAINTY] = self.uncertainty;
        out[OFF_SIG_FIGS] = self.significant_figures;
        out[OFF_CURRENT_REQUIREMENT] = self.current_requirement;
        out[OFF_AVERAGING] = self.averaging;
        out[OFF_MIN_SAMPLE_PERIOD..OFF_MIN_SAMPLE_PERIOD + 4]
            .copy_from_slice(&self.min_sample_period.to_le_bytes());
        out[OFF_TYP_SAMPLE_PERIOD..OFF_TYP_SAMPLE_PERIOD + 4]
            .copy_from_slice(&self.typ_sample_period.to_le_bytes());
        out[OFF_TYP_NUMBER_OF_SAMPLES..OFF_TYP_NUMBER_OF_SAMPLES + 2]
            .copy_from_slice(&self.typ_number_of_samples.to_le_bytes());
        out[OFF_WARM_UP_TIME..OFF_WARM_UP_TIME + 2].copy_from_slice(&self.warm_up_time.to_le_bytes());
        out[OFF_EXPERIMENT_TYPE] = self.experiment_type;
        out[OFF_OPERATION_TYPE] = self.operation_type;
        out[OFF_CALIBRATION_EQUATION] = self.calibration_equation as u8;
        out[OFF_Y_MIN..OFF_Y_MIN + 4].copy_from_slice(&self.y_min.to_le_bytes());
        out[OFF_Y_MAX..OFF_Y_MAX + 4].copy_from_slice(&self.y_max.to_le_bytes());
        out[OFF_Y_SCALE] = self.y_scale;
        out[OFF_HIGHEST_VALID_CAL_PAGE] = self.highest_valid_cal_page_index;
        out[OFF_ACTIVE_CAL_PAGE] = self.active_cal_page;
        for (i, page) in self.cal_pages.iter().enumerate() {
            let at = OFF_CAL_PAGES + i * CAL_PAGE_LEN;
            out[at..at + 4].copy_from_slice(&page.a.to_le_bytes());
            out[at + 4..at + 8].copy_from_slice(&page.b.to_le_bytes());
            out[at + 8..at + 12].copy_from_slice(&page.c.to_le_bytes());
            write_str(&mut out[at + 12..at + 12 + UNITS_LEN], &page.units);
        }
        out[CHECKSUM_OFFSET] = self.checksum;
        out
    }

    // --- Checksum ---

    /// Checksum of the current field values (the stored checksum byte is not covered).
    pub fn calculate_checksum(&self, algorithm: ChecksumAlgorithm) -> u8 {
        algorithm.checksum(&self.to_bytes()[..CHECKSUM_OFFSET])
    }

    /// Stores the freshly calculated checksum in the record.
    pub fn update_checksum(&mut self, algorithm: ChecksumAlgorithm) {
        self.checksum = self.calculate_checksum(algorithm);
    }

    /// Checks the stored checksum against the calculated one.
    ///
    /// # Returns
    ///
    /// * `Ok(ChecksumStatus::Valid)` if they match.
    /// * `Ok(ChecksumStatus::Mismatch { .. })` on mismatch under [`ValidationMode::Lax`].
    /// * `Err(GoIoError::ChecksumInvalid)` on mismatch under [`ValidationMode::Strict`].
    pub fn validate(
        &self,
        mode: ValidationMode,
        algorithm: ChecksumAlgorithm,
    ) -> Result<ChecksumStatus, GoIoError> {
        let calculated = self.calculate_checksum(algorithm);
        let stored = self.checksum;
        if calculated == stored {
            return Ok(ChecksumStatus::Valid);
        }
        match mode {
            ValidationMode::Strict => Err(GoIoError::ChecksumInvalid { stored, calculated }),
            ValidationMode::Lax => Ok(ChecksumStatus::Mismatch { stored, calculated }),
        }
    }

    // --- Identity ---

    pub fn mem_map_version(&self) -> u8 {
        self.mem_map_version
    }
    pub fn set_mem_map_version(&mut self, v: u8) {
        self.mem_map_version = v;
    }

    pub fn sensor_number(&self) -> u8 {
        self.sensor_number
    }
    pub fn set_sensor_number(&mut self, n: u8) {
        self.sensor_number = n;
    }

    /// 3-byte serial number, least significant byte first.
    pub fn serial_number(&self) -> [u8; 3] {
        self.serial_number
    }
    pub fn set_serial_number(&mut self, serial: [u8; 3]) {
        self.serial_number = serial;
    }

    pub fn lot_code(&self) -> LotCode {
        self.lot_code
    }
    pub fn set_lot_code(&mut self, lot: LotCode) {
        self.lot_code = lot;
    }

    pub fn manufacturer_id(&self) -> u8 {
        self.manufacturer_id
    }
    pub fn set_manufacturer_id(&mut self, id: u8) {
        self.manufacturer_id = id;
    }

    pub fn long_name(&self) -> &str {
        &self.long_name
    }
    /// Truncates to 20 bytes.
    pub fn set_long_name(&mut self, name: &str) {
        self.long_name = truncated(name);
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }
    /// Truncates to 12 bytes.
    pub fn set_short_name(&mut self, name: &str) {
        self.short_name = truncated(name);
    }

    // --- Measurement characteristics ---

    pub fn uncertainty(&self) -> u8 {
        self.uncertainty
    }
    pub fn set_uncertainty(&mut self, v: u8) {
        self.uncertainty = v;
    }

    pub fn significant_figures(&self) -> u8 {
        self.significant_figures
    }
    pub fn set_significant_figures(&mut self, v: u8) {
        self.significant_figures = v;
    }

    pub fn current_requirement(&self) -> u8 {
        self.current_requirement
    }
    pub fn set_current_requirement(&mut self, ma: u8) {
        self.current_requirement = ma;
    }

    pub fn averaging(&self) -> u8 {
        self.averaging
    }
    pub fn set_averaging(&mut self, v: u8) {
        self.averaging = v;
    }

    /// Seconds.
    pub fn min_sample_period(&self) -> f32 {
        self.min_sample_period
    }
    pub fn set_min_sample_period(&mut self, seconds: f32) {
        self.min_sample_period = seconds;
    }

    /// Seconds.
    pub fn typ_sample_period(&self) -> f32 {
        self.typ_sample_period
    }
    pub fn set_typ_sample_period(&mut self, seconds: f32) {
        self.typ_sample_period = seconds;
    }

    pub fn typ_number_of_samples(&self) -> u16 {
        self.typ_number_of_samples
    }
    pub fn set_typ_number_of_samples(&mut self, n: u16) {
        self.typ_number_of_samples = n;
    }

    /// Seconds.
    pub fn warm_up_time(&self) -> u16 {
        self.warm_up_time
    }
    pub fn set_warm_up_time(&mut self, seconds: u16) {
        self.warm_up_time = seconds;
    }

    pub fn experiment_type(&self) -> u8 {
        self.experiment_type
    }
    pub fn set_experiment_type(&mut self, v: u8) {
        self.experiment_type = v;
    }

    /// Operation type; on analog interfaces it determines the probe type.
    pub fn operation_type(&self) -> u8 {
        self.operation_type
    }
    pub fn set_operation_type(&mut self, v: u8) {
        self.operation_type = v;
    }

    /// Raw calibration equation selector, see [`crate::common::CalibrationEquation`].
    pub fn calibration_equation(&self) -> i8 {
        self.calibration_equation
    }
    pub fn set_calibration_equation(&mut self, selector: i8) {
        self.calibration_equation = selector;
    }

    pub fn y_min(&self) -> f32 {
        self.y_min
    }
    pub fn set_y_min(&mut self, v: f32) {
        self.y_min = v;
    }

    pub fn y_max(&self) -> f32 {
        self.y_max
    }
    pub fn set_y_max(&mut self, v: f32) {
        self.y_max = v;
    }

    pub fn y_scale(&self) -> u8 {
        self.y_scale
    }
    pub fn set_y_scale(&mut self, v: u8) {
        self.y_scale = v;
    }

    // --- Calibration pages ---

    pub fn highest_valid_cal_page_index(&self) -> u8 {
        self.highest_valid_cal_page_index
    }

    /// Sets the highest valid page. The active page is pulled down if it would fall outside.
    pub fn set_highest_valid_cal_page_index(&mut self, index: u8) -> Result<(), GoIoError> {
        if index as usize >= MAX_CAL_PAGES {
            return Err(GoIoError::InvalidParameter("calibration page index out of range"));
        }
        self.highest_valid_cal_page_index = index;
        if self.active_cal_page > index {
            self.active_cal_page = index;
        }
        Ok(())
    }

    fn valid_page_count(&self) -> usize {
        (self.highest_valid_cal_page_index as usize + 1).min(MAX_CAL_PAGES)
    }

    fn check_page_index(&self, index: u8) -> Result<usize, GoIoError> {
        let i = index as usize;
        if i < self.valid_page_count() {
            Ok(i)
        } else {
            Err(GoIoError::InvalidParameter("calibration page index out of range"))
        }
    }

    pub fn active_cal_page(&self) -> u8 {
        self.active_cal_page
    }

    /// Selects the page used for calibration; must not exceed the highest valid page index.
    pub fn set_active_cal_page(&mut self, index: u8) -> Result<(), GoIoError> {
        self.check_page_index(index)?;
        self.active_cal_page = index;
        Ok(())
    }

    /// Page `index`, if it is within the valid range.
    pub fn calibration_page(&self, index: u8) -> Option<&CalibrationPage> {
        let i = self.check_page_index(index).ok()?;
        self.cal_pages.get(i)
    }

    pub fn set_calibration_page(&mut self, index: u8, page: CalibrationPage) -> Result<(), GoIoError> {
        let i = self.check_page_index(index)?;
        self.cal_pages[i] = page;
        Ok(())
    }

    /// Page selected by the active page index (the last valid page if the index is stale).
    pub fn active_calibration_page(&self) -> &CalibrationPage {
        let i = (self.active_cal_page as usize).min(self.valid_page_count() - 1);
        &self.cal_pages[i]
    }

    // --- Checksum byte ---

    pub fn checksum(&self) -> u8 {
        self.checksum
    }
    /// Overwrites the stored checksum byte without recalculating it.
    pub fn set_checksum(&mut self, checksum: u8) {
        self.checksum = checksum;
    }
}

/// Record with every settable field away from its zero value.
#[cfg(test)]
pub(crate) fn sample_record() -> DdsRecord {
    let mut rec = DdsRecord::default();
    rec.set_mem_map_version(1);
    rec.set_sensor_number(24);
    rec.set_serial_number([0x12, 0x34, 0x56]);
    rec.set_lot_code(LotCode { year_bcd: 0x24, week_bcd: 0x17 });
    rec.set_manufacturer_id(2);
    rec.set_long_name("Force Sensor");
    rec.set_short_name("Force");
    rec.set_uncertainty(3);
    rec.set_significant_figures(4);
    rec.set_current_requirement(20);
    rec.set_averaging(1);
    rec.set_min_sample_period(0.002);
    rec.set_typ_sample_period(0.05);
    rec.set_typ_number_of_samples(600);
    rec.set_warm_up_time(5);
    rec.set_experiment_type(7);
    rec.set_operation_type(14);
    rec.set_calibration_equation(1);
    rec.set_y_min(-50.0);
    rec.set_y_max(50.0);
    rec.set_y_scale(1);
    rec.set_highest_valid_cal_page_index(1).unwrap();
    rec.set_calibration_page(0, CalibrationPage::new(1.5, -12.25, 0.0, "N")).unwrap();
    rec.set_calibration_page(1, CalibrationPage::new(0.3, -2.75, 0.0, "lb")).unwrap();
    rec.set_active_cal_page(1).unwrap();
    rec.update_checksum(ChecksumAlgorithm::Xor8);
    rec
}
