//! Register and device addressing types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{FIRST_BATTERY_UNIT_ID, INVERTER_UNIT_ID};

/// Register class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RegisterBank {
    /// Writable configuration and control state
    Holding,
    /// Read-only telemetry
    Input,
}

impl RegisterBank {
    pub fn prefix(self) -> &'static str {
        match self {
            RegisterBank::Holding => "HR",
            RegisterBank::Input => "IR",
        }
    }
}

impl fmt::Display for RegisterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Composite register identity, ordered by bank then address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterKey {
    pub bank: RegisterBank,
    pub address: u16,
}

impl RegisterKey {
    pub const fn new(bank: RegisterBank, address: u16) -> Self {
        Self { bank, address }
    }

    pub const fn holding(address: u16) -> Self {
        Self::new(RegisterBank::Holding, address)
    }

    pub const fn input(address: u16) -> Self {
        Self::new(RegisterBank::Input, address)
    }
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:04}", self.bank.prefix(), self.address)
    }
}

/// Error parsing a textual register key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid register key: {0}")]
pub struct ParseRegisterKeyError(pub String);

impl FromStr for RegisterKey {
    type Err = ParseRegisterKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, address) = s
            .split_once(':')
            .ok_or_else(|| ParseRegisterKeyError(s.to_string()))?;
        let bank = match prefix {
            "HR" => RegisterBank::Holding,
            "IR" => RegisterBank::Input,
            _ => return Err(ParseRegisterKeyError(s.to_string())),
        };
        let address = address
            .parse::<u16>()
            .map_err(|_| ParseRegisterKeyError(s.to_string()))?;
        Ok(Self { bank, address })
    }
}

impl Serialize for RegisterKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RegisterKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Modbus unit identifier selecting a physical device on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(pub u8);

impl DeviceIdentity {
    pub const INVERTER: DeviceIdentity = DeviceIdentity(INVERTER_UNIT_ID);

    /// Identity of the `index`-th battery (0-based)
    pub fn battery(index: u8) -> Self {
        DeviceIdentity(FIRST_BATTERY_UNIT_ID.wrapping_add(index))
    }

    pub fn unit_id(self) -> u8 {
        self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Kind of device a cache belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Inverter,
    Battery,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Inverter => write!(f, "inverter"),
            DeviceKind::Battery => write!(f, "battery"),
        }
    }
}
