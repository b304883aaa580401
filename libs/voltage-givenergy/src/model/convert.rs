//! Raw register conversions

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Fixed-point tenths
pub fn deci(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}

/// Fixed-point hundredths
pub fn centi(raw: u16) -> f64 {
    f64::from(raw) / 100.0
}

/// Fixed-point thousandths
pub fn milli(raw: u16) -> f64 {
    f64::from(raw) / 1000.0
}

/// Two's complement reinterpretation
pub fn signed(raw: u16) -> i16 {
    raw as i16
}

/// 32-bit value split across a high and a low register
pub fn uint32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// High byte and low byte
pub fn duint8(raw: u16) -> (u8, u8) {
    ((raw >> 8) as u8, (raw & 0xFF) as u8)
}

/// 0/1 flag; any other raw value is not a boolean
pub fn flag(raw: u16) -> Option<bool> {
    match raw {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

/// Text packed two characters per register, high byte first.
/// Nulls are dropped and surrounding blanks trimmed.
pub fn ascii(registers: &[u16]) -> String {
    registers
        .iter()
        .flat_map(|r| r.to_be_bytes())
        .filter(|&b| b != 0)
        .map(char::from)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Packed BCD byte, e.g. 0x59 -> 59
pub fn bcd_byte(raw: u8) -> Option<u32> {
    let (high, low) = (u32::from(raw >> 4), u32::from(raw & 0x0F));
    (high <= 9 && low <= 9).then_some(high * 10 + low)
}

/// Four packed BCD digits, e.g. 0x1234 -> 1234
pub fn bcd(raw: u16) -> Option<u16> {
    let [high, low] = raw.to_be_bytes();
    Some((bcd_byte(high)? * 100 + bcd_byte(low)?) as u16)
}

/// Decode an HHMM register.
///
/// The device reports minute 60 at period boundaries; it carries into the
/// hour (`460` is 05:00) and hour 24 wraps to midnight. Anything else outside
/// the clock is not a time.
pub fn hhmm(raw: u16) -> Option<NaiveTime> {
    let (hour, minute) = (u32::from(raw / 100), u32::from(raw % 100));
    if hour > 24 || minute > 60 {
        return None;
    }
    let hour = (hour + minute / 60) % 24;
    NaiveTime::from_hms_opt(hour, minute % 60, 0)
}

/// Encode a time of day as HHMM
pub fn to_hhmm(time: NaiveTime) -> u16 {
    (time.hour() * 100 + time.minute()) as u16
}

/// Charge or discharge window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn from_registers(start: u16, end: u16) -> Option<Self> {
        Some(Self::new(hhmm(start)?, hhmm(end)?))
    }

    /// Raw HHMM register pair
    pub fn to_registers(&self) -> (u16, u16) {
        (to_hhmm(self.start), to_hhmm(self.end))
    }

    /// Whether `time` falls in the window; windows may wrap past midnight
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Register whose meaning as a timestamp is unconfirmed.
///
/// Some registers documented as times turned out to be plain counters, so both
/// interpretations are offered and the raw value is always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StampRegister {
    pub raw: u16,
}

impl StampRegister {
    pub fn new(raw: u16) -> Self {
        Self { raw }
    }

    pub fn as_counter(&self) -> u16 {
        self.raw
    }

    /// Hours in the high byte, minutes in the low byte, both packed BCD
    pub fn as_bcd_time(&self) -> Option<NaiveTime> {
        let [hours, minutes] = self.raw.to_be_bytes();
        NaiveTime::from_hms_opt(bcd_byte(hours)?, bcd_byte(minutes)?, 0)
    }
}

impl Serialize for StampRegister {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StampRegister", 2)?;
        state.serialize_field("raw", &self.raw)?;
        state.serialize_field("bcd_time", &self.as_bcd_time())?;
        state.end()
    }
}

/// System clock from six registers: year offset from 2000, month, day, hour, minute, second
pub fn system_time(registers: &[u16]) -> Option<NaiveDateTime> {
    let [year, month, day, hour, minute, second] = registers else {
        return None;
    };
    NaiveDate::from_ymd_opt(2000 + i32::from(*year), u32::from(*month), u32::from(*day))?.and_hms_opt(
        u32::from(*hour),
        u32::from(*minute),
        u32::from(*second),
    )
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn test_scaling() {
        assert_eq!(deci(2304), 230.4);
        assert_eq!(centi(5001), 50.01);
        assert_eq!(milli(3232), 3.232);
        assert_eq!(signed(0xFF38), -200);
        assert_eq!(uint32(0x0001, 0x0002), 65538);
        assert_eq!(duint8(0x0201), (2, 1));
    }

    #[test]
    fn test_flag() {
        assert_eq!(flag(0), Some(false));
        assert_eq!(flag(1), Some(true));
        assert_eq!(flag(2), None);
    }

    #[test]
    fn test_ascii() {
        assert_eq!(ascii(&[21313, 12594, 13108, 18229, 13879]), "SA1234G567");
        assert_eq!(ascii(&[0x4142, 0x0000, 0x2020]), "AB");
        assert_eq!(ascii(&[0, 0, 0]), "");
    }

    #[test]
    fn test_hhmm() {
        assert_eq!(hhmm(0), Some(time(0, 0)));
        assert_eq!(hhmm(30), Some(time(0, 30)));
        assert_eq!(hhmm(430), Some(time(4, 30)));
        assert_eq!(hhmm(2400), Some(time(0, 0)));
        assert_eq!(hhmm(2401), Some(time(0, 1)));
        assert_eq!(hhmm(2359), Some(time(23, 59)));
    }

    #[test]
    fn test_hhmm_minute_sixty_carries() {
        assert_eq!(hhmm(460), Some(time(5, 0)));
        assert_eq!(hhmm(60), Some(time(1, 0)));
        assert_eq!(hhmm(2360), Some(time(0, 0)));
    }

    #[test]
    fn test_hhmm_out_of_clock() {
        assert_eq!(hhmm(678), None);
        assert_eq!(hhmm(2500), None);
    }

    #[test]
    fn test_time_slot() {
        let slot = TimeSlot::from_registers(30, 430).unwrap();
        assert_eq!(slot, TimeSlot::new(time(0, 30), time(4, 30)));
        assert_eq!(slot.to_registers(), (30, 430));
        assert!(slot.contains(time(1, 0)));
        assert!(!slot.contains(time(4, 30)));

        let overnight = TimeSlot::from_registers(2330, 530).unwrap();
        assert!(overnight.contains(time(23, 45)));
        assert!(overnight.contains(time(2, 0)));
        assert!(!overnight.contains(time(12, 0)));

        assert_eq!(TimeSlot::from_registers(30, 678), None);
    }

    #[test]
    fn test_bcd() {
        assert_eq!(bcd_byte(0x59), Some(59));
        assert_eq!(bcd_byte(0x5A), None);
        assert_eq!(bcd(0x1234), Some(1234));
        assert_eq!(bcd(0x12F4), None);
    }

    #[test]
    fn test_stamp_register_views() {
        let stamp = StampRegister::new(0x1245);
        assert_eq!(stamp.as_counter(), 0x1245);
        assert_eq!(stamp.as_bcd_time(), Some(time(12, 45)));

        // A counter value that is not valid BCD keeps only its raw view
        let counter = StampRegister::new(0x00FA);
        assert_eq!(counter.as_counter(), 250);
        assert_eq!(counter.as_bcd_time(), None);

        let json = serde_json::to_value(counter).unwrap();
        assert_eq!(json, serde_json::json!({"raw": 250, "bcd_time": null}));
    }

    #[test]
    fn test_system_time() {
        let dt = system_time(&[22, 1, 11, 12, 34, 56]).unwrap();
        assert_eq!(dt.to_string(), "2022-01-11 12:34:56");
        assert_eq!(system_time(&[22, 13, 11, 12, 34, 56]), None);
        assert_eq!(system_time(&[22, 1, 11]), None);
    }
}
