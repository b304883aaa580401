//! Register cache
//!
//! Last observed raw value per (bank, address) for one device. A missing key
//! means the register was never read, which is different from a zero value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::pdu::Response;
use crate::types::{ParseRegisterKeyError, RegisterBank, RegisterKey};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterCache {
    registers: BTreeMap<RegisterKey, u16>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one value, overwriting any earlier observation
    pub fn merge(&mut self, bank: RegisterBank, address: u16, value: u16) {
        self.registers.insert(RegisterKey::new(bank, address), value);
    }

    /// Store consecutive values starting at `base`; returns how many were stored
    pub fn merge_block(&mut self, bank: RegisterBank, base: u16, values: &[u16]) -> usize {
        let mut stored = 0;
        for (offset, &value) in values.iter().enumerate() {
            let Some(address) = u16::try_from(offset).ok().and_then(|o| base.checked_add(o)) else {
                warn!(
                    "Register block {}:{} overflows address space, {} values dropped",
                    bank,
                    base,
                    values.len() - stored
                );
                break;
            };
            self.merge(bank, address, value);
            stored += 1;
        }
        trace!("Merged {} {} registers from {}", stored, bank, base);
        stored
    }

    /// Merge the register values carried by a decoded response
    pub fn apply(&mut self, response: &Response) -> usize {
        match response.register_updates() {
            Some((bank, base, values)) => self.merge_block(bank, base, values),
            None => 0,
        }
    }

    pub fn get(&self, key: RegisterKey) -> Option<u16> {
        self.registers.get(&key).copied()
    }

    pub fn holding(&self, address: u16) -> Option<u16> {
        self.get(RegisterKey::holding(address))
    }

    pub fn input(&self, address: u16) -> Option<u16> {
        self.get(RegisterKey::input(address))
    }

    pub fn contains(&self, key: RegisterKey) -> bool {
        self.registers.contains_key(&key)
    }

    /// `count` consecutive registers, only if every one was observed
    pub fn block(&self, bank: RegisterBank, start: u16, count: u16) -> Option<Vec<u16>> {
        (0..count)
            .map(|offset| self.get(RegisterKey::new(bank, start.checked_add(offset)?)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (RegisterKey, u16)> + '_ {
        self.registers.iter().map(|(k, v)| (*k, *v))
    }

    /// Flat diagnostic export keyed `HR:0027` / `IR:0060`
    pub fn to_flat_map(&self) -> BTreeMap<String, u16> {
        self.iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    pub fn from_flat_map(map: &BTreeMap<String, u16>) -> Result<Self, ParseRegisterKeyError> {
        let registers = map
            .iter()
            .map(|(k, v)| Ok((k.parse::<RegisterKey>()?, *v)))
            .collect::<Result<BTreeMap<_, _>, ParseRegisterKeyError>>()?;
        Ok(Self { registers })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl FromIterator<(RegisterKey, u16)> for RegisterCache {
    fn from_iter<I: IntoIterator<Item = (RegisterKey, u16)>>(iter: I) -> Self {
        Self {
            registers: iter.into_iter().collect(),
        }
    }
}
