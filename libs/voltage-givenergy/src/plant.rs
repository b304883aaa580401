//! Plant aggregator
//!
//! One register cache per physical device: the inverter owns one, and every
//! battery unit identity owns its own. Refreshing one device only ever writes
//! into that device's cache.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::RegisterCache;
use crate::constants::{MAX_BATTERIES, MAX_REGISTERS_PER_READ};
use crate::error::PlantError;
use crate::model::{Battery, Inverter};
use crate::pdu::Request;
use crate::types::{DeviceIdentity, DeviceKind, RegisterBank};

/// Inverter input blocks read on every refresh
const INVERTER_FAST_BLOCKS: &[(RegisterBank, u16)] = &[(RegisterBank::Input, 0), (RegisterBank::Input, 180)];

/// Additional inverter blocks read on a complete refresh
const INVERTER_FULL_BLOCKS: &[(RegisterBank, u16)] = &[
    (RegisterBank::Holding, 0),
    (RegisterBank::Holding, 60),
    (RegisterBank::Holding, 120),
    (RegisterBank::Input, 120),
];

const BATTERY_BLOCK_START: u16 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plant {
    inverter_identity: DeviceIdentity,
    inverter_cache: RegisterCache,
    battery_caches: BTreeMap<DeviceIdentity, RegisterCache>,
}

/// Composed view of the whole plant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantSnapshot {
    pub inverter: Inverter,
    pub batteries: Vec<BatterySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatterySnapshot {
    pub identity: DeviceIdentity,
    pub present: bool,
    #[serde(flatten)]
    pub battery: Battery,
}

impl Plant {
    pub fn new(inverter_identity: DeviceIdentity) -> Self {
        Self {
            inverter_identity,
            inverter_cache: RegisterCache::new(),
            battery_caches: BTreeMap::new(),
        }
    }

    /// Plant with `count` batteries at consecutive unit ids from 0x32
    pub fn with_batteries(count: usize) -> Result<Self, PlantError> {
        let mut plant = Self::new(DeviceIdentity::INVERTER);
        for index in 0..count {
            let index = u8::try_from(index).map_err(|_| PlantError::TooManyBatteries(MAX_BATTERIES))?;
            plant.add_battery(DeviceIdentity::battery(index))?;
        }
        Ok(plant)
    }

    pub fn inverter_identity(&self) -> DeviceIdentity {
        self.inverter_identity
    }

    /// Register a battery unit; adding a known one is a no-op
    pub fn add_battery(&mut self, identity: DeviceIdentity) -> Result<(), PlantError> {
        if identity == self.inverter_identity {
            return Err(PlantError::IdentityConflict {
                identity,
                kind: DeviceKind::Battery,
            });
        }
        if !self.battery_caches.contains_key(&identity) && self.battery_caches.len() >= MAX_BATTERIES {
            return Err(PlantError::TooManyBatteries(MAX_BATTERIES));
        }
        self.battery_caches.entry(identity).or_default();
        Ok(())
    }

    pub fn battery_identities(&self) -> impl Iterator<Item = DeviceIdentity> + '_ {
        self.battery_caches.keys().copied()
    }

    /// Merge a decoded response into the cache of the device that answered.
    ///
    /// Returns the number of registers stored. A response attributed to the
    /// wrong kind of device is refused without touching any cache.
    pub fn refresh(
        &mut self,
        identity: DeviceIdentity,
        kind: DeviceKind,
        response: &crate::pdu::Response,
    ) -> Result<usize, PlantError> {
        let cache = match kind {
            DeviceKind::Inverter if identity == self.inverter_identity => &mut self.inverter_cache,
            DeviceKind::Battery if identity != self.inverter_identity => {
                if !self.battery_caches.contains_key(&identity) {
                    self.add_battery(identity)?;
                }
                self.battery_caches.entry(identity).or_default()
            },
            _ => {
                warn!("Refusing {} refresh from device {}", kind, identity);
                return Err(PlantError::IdentityConflict { identity, kind });
            },
        };
        let stored = cache.apply(response);
        debug!("Refreshed {} {}: {} registers", kind, identity, stored);
        Ok(stored)
    }

    /// Cache backing a device, if the identity is known
    pub fn cache(&self, identity: DeviceIdentity) -> Option<&RegisterCache> {
        if identity == self.inverter_identity {
            Some(&self.inverter_cache)
        } else {
            self.battery_caches.get(&identity)
        }
    }

    pub fn inverter(&self) -> Inverter {
        Inverter::from_cache(&self.inverter_cache)
    }

    /// Battery views ordered by identity
    pub fn batteries(&self) -> Vec<(DeviceIdentity, Battery)> {
        self.battery_caches
            .iter()
            .map(|(identity, cache)| (*identity, Battery::from_cache(cache)))
            .collect()
    }

    /// Batteries that reported a serial number
    pub fn present_batteries(&self) -> Vec<(DeviceIdentity, Battery)> {
        self.batteries()
            .into_iter()
            .filter(|(_, battery)| battery.is_present())
            .collect()
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        PlantSnapshot {
            inverter: self.inverter(),
            batteries: self
                .batteries()
                .into_iter()
                .map(|(identity, battery)| BatterySnapshot {
                    identity,
                    present: battery.is_present(),
                    battery,
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Reads needed to refresh the plant, in issue order.
    ///
    /// A quick refresh only covers live inverter telemetry and the battery
    /// blocks; `complete` adds the configuration registers.
    pub fn refresh_requests(&self, complete: bool) -> Vec<(DeviceIdentity, DeviceKind, Request)> {
        let inverter_blocks = INVERTER_FAST_BLOCKS
            .iter()
            .chain(if complete { INVERTER_FULL_BLOCKS } else { &[] });

        let mut requests: Vec<_> = inverter_blocks
            .map(|&(bank, start)| {
                (
                    self.inverter_identity,
                    DeviceKind::Inverter,
                    Request::read(bank, start, MAX_REGISTERS_PER_READ),
                )
            })
            .collect();

        requests.extend(self.battery_identities().map(|identity| {
            (
                identity,
                DeviceKind::Battery,
                Request::read(RegisterBank::Input, BATTERY_BLOCK_START, MAX_REGISTERS_PER_READ),
            )
        }));
        requests
    }
}
