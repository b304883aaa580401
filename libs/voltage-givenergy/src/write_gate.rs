//! Holding register write whitelist
//!
//! Every write passes through [`validate_write`] before a frame is built. Only
//! registers the inverter model decodes as writable are listed; anything else
//! is refused locally.

use crate::error::WriteRejected;
use crate::pdu::Request;
use crate::types::RegisterBank;

/// Legal raw values for a whitelisted register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRule {
    /// Closed numeric range
    Range { min: u16, max: u16 },
    /// Enumerated set of raw values
    OneOf(&'static [u16]),
    /// HHMM time of day, 0000..=2359
    TimeOfDay,
}

impl WriteRule {
    pub fn allows(&self, value: u16) -> bool {
        match *self {
            WriteRule::Range { min, max } => (min..=max).contains(&value),
            WriteRule::OneOf(values) => values.contains(&value),
            WriteRule::TimeOfDay => value / 100 < 24 && value % 100 < 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub address: u16,
    pub rule: WriteRule,
    pub label: &'static str,
}

const BOOL: WriteRule = WriteRule::OneOf(&[0, 1]);

const fn entry(address: u16, rule: WriteRule, label: &'static str) -> WhitelistEntry {
    WhitelistEntry {
        address,
        rule,
        label,
    }
}

/// Writable holding registers, sorted by address
pub static WRITE_WHITELIST: &[WhitelistEntry] = &[
    entry(20, BOOL, "enable_charge_target"),
    entry(27, WriteRule::OneOf(&[0, 1]), "battery_power_mode"),
    entry(31, WriteRule::TimeOfDay, "charge_slot_2_start"),
    entry(32, WriteRule::TimeOfDay, "charge_slot_2_end"),
    entry(35, WriteRule::Range { min: 0, max: 99 }, "system_time_year"),
    entry(36, WriteRule::Range { min: 1, max: 12 }, "system_time_month"),
    entry(37, WriteRule::Range { min: 1, max: 31 }, "system_time_day"),
    entry(38, WriteRule::Range { min: 0, max: 23 }, "system_time_hour"),
    entry(39, WriteRule::Range { min: 0, max: 59 }, "system_time_minute"),
    entry(40, WriteRule::Range { min: 0, max: 59 }, "system_time_second"),
    entry(44, WriteRule::TimeOfDay, "discharge_slot_2_start"),
    entry(45, WriteRule::TimeOfDay, "discharge_slot_2_end"),
    entry(56, WriteRule::TimeOfDay, "discharge_slot_1_start"),
    entry(57, WriteRule::TimeOfDay, "discharge_slot_1_end"),
    entry(59, BOOL, "enable_discharge"),
    entry(94, WriteRule::TimeOfDay, "charge_slot_1_start"),
    entry(95, WriteRule::TimeOfDay, "charge_slot_1_end"),
    entry(96, BOOL, "enable_charge"),
    entry(110, WriteRule::Range { min: 4, max: 100 }, "battery_soc_reserve"),
    entry(111, WriteRule::Range { min: 0, max: 50 }, "battery_charge_limit"),
    entry(112, WriteRule::Range { min: 0, max: 50 }, "battery_discharge_limit"),
    entry(114, WriteRule::Range { min: 4, max: 100 }, "battery_discharge_min_power_reserve"),
    entry(116, WriteRule::Range { min: 4, max: 100 }, "charge_target_soc"),
];

pub fn whitelist_entry(address: u16) -> Option<&'static WhitelistEntry> {
    WRITE_WHITELIST
        .binary_search_by_key(&address, |entry| entry.address)
        .ok()
        .map(|index| &WRITE_WHITELIST[index])
}

/// Check a single register write against the whitelist
pub fn validate_write(bank: RegisterBank, address: u16, value: u16) -> Result<(), WriteRejected> {
    if bank != RegisterBank::Holding {
        return Err(WriteRejected::NotHolding { address });
    }
    let entry = whitelist_entry(address).ok_or(WriteRejected::NotWhitelisted { address })?;
    if entry.rule.allows(value) {
        return Ok(());
    }
    Err(match entry.rule {
        WriteRule::Range { min, max } => WriteRejected::OutOfRange {
            address,
            label: entry.label,
            value,
            min,
            max,
        },
        WriteRule::OneOf(_) => WriteRejected::NotAllowed {
            address,
            label: entry.label,
            value,
        },
        WriteRule::TimeOfDay => WriteRejected::InvalidTime {
            address,
            label: entry.label,
            value,
        },
    })
}

/// Validate and build a single-register write request
pub fn validated_write_request(address: u16, value: u16) -> Result<Request, WriteRejected> {
    validate_write(RegisterBank::Holding, address, value)?;
    Ok(Request::WriteSingle {
        register: address,
        value,
    })
}

/// Validate every value of a multi-register write and build the request
pub fn validated_write_multiple(start: u16, values: Vec<u16>) -> Result<Request, WriteRejected> {
    if values.is_empty() {
        return Err(WriteRejected::UnsupportedRequest {
            address: start,
            count: 0,
        });
    }
    for (offset, &value) in values.iter().enumerate() {
        let address = start
            .checked_add(offset as u16)
            .ok_or(WriteRejected::UnsupportedRequest {
                address: start,
                count: values.len(),
            })?;
        validate_write(RegisterBank::Holding, address, value)?;
    }
    Ok(Request::write_multiple(start, values))
}

/// Validate an arbitrary request; reads always pass
pub fn validate_request(request: &Request) -> Result<(), WriteRejected> {
    match request {
        Request::WriteSingle { register, value } => {
            validate_write(RegisterBank::Holding, *register, *value)
        },
        Request::WriteMultiple { start, values, .. } => {
            validated_write_multiple(*start, values.clone()).map(|_| ())
        },
        Request::Transparent(transparent) => match transparent.command {
            crate::pdu::TransparentCommand::WriteSingle { register, value } => {
                validate_write(RegisterBank::Holding, register, value)
            },
            _ => Ok(()),
        },
        Request::ReadHolding { .. } | Request::ReadInput { .. } | Request::Heartbeat(_) => Ok(()),
    }
}
