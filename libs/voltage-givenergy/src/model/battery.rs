//! Battery view over one battery unit's input registers

use serde::Serialize;

use super::convert::{ascii, deci, duint8, flag, milli, signed, uint32};
use super::null_fields;
use crate::cache::RegisterCache;
use crate::types::RegisterBank;

pub const CELL_COUNT: usize = 16;
pub const CELL_BLOCK_COUNT: usize = 4;

const FIRST_CELL_REGISTER: u16 = 60;
const FIRST_CELL_BLOCK_REGISTER: u16 = 76;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Battery {
    pub cell_voltages: [Option<f64>; CELL_COUNT],
    pub cell_block_temperatures: [Option<f64>; CELL_BLOCK_COUNT],
    pub v_cells_sum: Option<f64>,
    pub temp_mosfet: Option<f64>,
    pub v_out: Option<f64>,
    pub cap_full: Option<f64>,
    pub cap_design: Option<f64>,
    pub cap_remaining: Option<f64>,
    pub status_1_2: Option<(u8, u8)>,
    pub status_3_4: Option<(u8, u8)>,
    pub status_5_6: Option<(u8, u8)>,
    pub status_7: Option<(u8, u8)>,
    pub warning_1_2: Option<(u8, u8)>,
    /// Charge cycles; plain counter despite appearing in timestamp-shaped documentation
    pub num_cycles: Option<u16>,
    pub num_cells: Option<u16>,
    pub bms_firmware_version: Option<u16>,
    pub soc: Option<u16>,
    pub cap_design2: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub e_discharge_total: Option<f64>,
    pub e_charge_total: Option<f64>,
    pub battery_serial_number: Option<String>,
    pub usb_inserted: Option<bool>,
}

impl Battery {
    pub fn from_cache(cache: &RegisterCache) -> Self {
        let ir = |address: u16| cache.input(address);
        let ir_pair = |high: u16| Some(uint32(ir(high)?, ir(high + 1)?));
        let centi32 = |high: u16| ir_pair(high).map(|v| f64::from(v) / 100.0);
        let temperature = |address: u16| ir(address).map(|r| f64::from(signed(r)) / 10.0);

        Self {
            cell_voltages: std::array::from_fn(|i| ir(FIRST_CELL_REGISTER + i as u16).map(milli)),
            cell_block_temperatures: std::array::from_fn(|i| {
                temperature(FIRST_CELL_BLOCK_REGISTER + i as u16)
            }),
            v_cells_sum: ir(80).map(milli),
            temp_mosfet: temperature(81),
            v_out: ir_pair(82).map(|v| f64::from(v) / 1000.0),
            cap_full: centi32(84),
            cap_design: centi32(86),
            cap_remaining: centi32(88),
            status_1_2: ir(90).map(duint8),
            status_3_4: ir(91).map(duint8),
            status_5_6: ir(92).map(duint8),
            status_7: ir(93).map(duint8),
            warning_1_2: ir(94).map(duint8),
            num_cycles: ir(96),
            num_cells: ir(97),
            bms_firmware_version: ir(98),
            soc: ir(100),
            cap_design2: centi32(101),
            temp_max: temperature(103),
            temp_min: temperature(104),
            e_discharge_total: ir(105).map(deci),
            e_charge_total: ir(106).map(deci),
            battery_serial_number: cache
                .block(RegisterBank::Input, 110, 5)
                .map(|r| ascii(&r).to_uppercase()),
            usb_inserted: ir(115).and_then(flag),
        }
    }

    /// A unit answers with an empty or blank serial when no battery is fitted
    pub fn is_present(&self) -> bool {
        self.battery_serial_number
            .as_deref()
            .is_some_and(|serial| !serial.trim().is_empty())
    }

    pub fn missing_fields(&self) -> Vec<String> {
        null_fields(self)
    }
}
