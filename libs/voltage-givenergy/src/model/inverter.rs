//! Inverter view over holding and input registers

use chrono::NaiveDateTime;
use serde::Serialize;

use super::convert::{
    ascii, centi, deci, duint8, flag, signed, system_time, uint32, StampRegister, TimeSlot,
};
use super::null_fields;
use crate::cache::RegisterCache;
use crate::types::RegisterBank;

/// Hardware family, derived from the inverter serial prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    Hybrid,
    Ac,
    Gen2,
    Unknown,
}

impl Model {
    pub fn from_serial(serial: &str) -> Self {
        match serial.get(..2) {
            Some("SA") => Model::Hybrid,
            Some("CE") => Model::Ac,
            Some("ED") => Model::Gen2,
            _ => Model::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryPowerMode {
    /// Export surplus to the grid
    Export,
    /// Self consumption, battery covers demand
    Demand,
}

impl BatteryPowerMode {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(BatteryPowerMode::Export),
            1 => Some(BatteryPowerMode::Demand),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Inverter {
    // Identity
    pub device_type_code: Option<u16>,
    pub inverter_module: Option<u32>,
    pub num_mppt: Option<u8>,
    pub num_phases: Option<u8>,
    pub battery_serial_number: Option<String>,
    pub inverter_serial_number: Option<String>,
    pub model: Option<Model>,
    pub battery_firmware_version: Option<u16>,
    pub dsp_firmware_version: Option<u16>,
    pub arm_firmware_version: Option<u16>,
    pub firmware_version: Option<String>,
    pub usb_device_inserted: Option<u16>,
    pub modbus_address: Option<u16>,
    pub modbus_version: Option<f64>,

    // Control
    pub enable_charge_target: Option<bool>,
    pub grid_port_max_power_output: Option<u16>,
    pub battery_power_mode: Option<BatteryPowerMode>,
    pub enable_60hz_freq_mode: Option<bool>,
    pub soc_force_adjust: Option<u16>,
    pub charge_slot_1: Option<TimeSlot>,
    pub charge_slot_2: Option<TimeSlot>,
    pub discharge_slot_1: Option<TimeSlot>,
    pub discharge_slot_2: Option<TimeSlot>,
    pub system_time: Option<NaiveDateTime>,
    pub enable_drm_rj45_port: Option<bool>,
    pub active_power_rate: Option<u16>,
    pub battery_type: Option<u16>,
    pub battery_nominal_capacity: Option<u16>,
    pub enable_discharge: Option<bool>,
    pub enable_charge: Option<bool>,
    pub battery_soc_reserve: Option<u16>,
    pub battery_charge_limit: Option<u16>,
    pub battery_discharge_limit: Option<u16>,
    pub battery_discharge_min_power_reserve: Option<u16>,
    pub charge_target_soc: Option<u16>,

    // Protection limits
    pub v_ac_low_out: Option<f64>,
    pub v_ac_high_out: Option<f64>,
    pub f_ac_low_out: Option<f64>,
    pub f_ac_high_out: Option<f64>,
    pub v_ac_low_out_time: Option<StampRegister>,
    pub v_ac_high_out_time: Option<StampRegister>,
    pub f_ac_low_out_time: Option<StampRegister>,
    pub f_ac_high_out_time: Option<StampRegister>,
    pub v_ac_low_in: Option<f64>,
    pub v_ac_high_in: Option<f64>,
    pub f_ac_low_in: Option<f64>,
    pub f_ac_high_in: Option<f64>,
    pub v_ac_low_in_time: Option<StampRegister>,
    pub v_ac_high_in_time: Option<StampRegister>,
    pub f_ac_low_in_time: Option<StampRegister>,
    pub f_ac_high_in_time: Option<StampRegister>,
    pub gfci_1_time: Option<StampRegister>,
    pub gfci_2_time: Option<StampRegister>,
    pub dci_1_time: Option<StampRegister>,
    pub dci_2_time: Option<StampRegister>,

    // Telemetry
    pub inverter_status: Option<u16>,
    pub v_pv1: Option<f64>,
    pub v_pv2: Option<f64>,
    pub v_p_bus: Option<f64>,
    pub v_n_bus: Option<f64>,
    pub v_ac1: Option<f64>,
    pub e_battery_throughput_total: Option<f64>,
    pub i_pv1: Option<f64>,
    pub i_pv2: Option<f64>,
    pub i_ac1: Option<f64>,
    pub e_pv_total: Option<f64>,
    pub f_ac1: Option<f64>,
    pub charge_status: Option<u16>,
    pub e_pv1_day: Option<f64>,
    pub p_pv1: Option<u16>,
    pub e_pv2_day: Option<f64>,
    pub p_pv2: Option<u16>,
    pub e_grid_out_total: Option<f64>,
    pub p_grid_out: Option<i16>,
    pub e_grid_out_day: Option<f64>,
    pub e_grid_in_day: Option<f64>,
    pub e_inverter_in_total: Option<f64>,
    pub p_inverter_out: Option<i16>,
    pub p_backup: Option<u16>,
    pub e_grid_in_total: Option<f64>,
    pub e_load_day: Option<f64>,
    pub e_battery_charge_day: Option<f64>,
    pub e_battery_discharge_day: Option<f64>,
    pub fault_code: Option<u32>,
    pub temp_inverter_heatsink: Option<f64>,
    pub p_load_demand: Option<u16>,
    pub p_grid_apparent: Option<u16>,
    pub e_inverter_out_day: Option<f64>,
    pub e_inverter_out_total: Option<f64>,
    pub work_time_total: Option<u32>,
    pub system_mode: Option<u16>,
    pub v_battery: Option<f64>,
    pub i_battery: Option<f64>,
    pub p_battery: Option<i16>,
    pub v_eps_backup: Option<f64>,
    pub f_eps_backup: Option<f64>,
    pub temp_charger: Option<f64>,
    pub temp_battery: Option<f64>,
    pub battery_percent: Option<u16>,
    pub e_battery_discharge_total: Option<f64>,
    pub e_battery_charge_total: Option<f64>,

    // Derived
    pub p_pv: Option<u32>,
}

impl Inverter {
    pub fn from_cache(cache: &RegisterCache) -> Self {
        let hr = |address: u16| cache.holding(address);
        let ir = |address: u16| cache.input(address);
        let hr_block = |start: u16, count: u16| cache.block(RegisterBank::Holding, start, count);
        let hr_pair = |high: u16| Some(uint32(hr(high)?, hr(high + 1)?));
        let ir_pair = |high: u16| Some(uint32(ir(high)?, ir(high + 1)?));
        let slot = |start: u16| TimeSlot::from_registers(hr(start)?, hr(start + 1)?);
        let stamp = |address: u16| hr(address).map(StampRegister::new);
        let deci32 = |high: u16| ir_pair(high).map(|v| f64::from(v) / 10.0);

        let inverter_serial_number = hr_block(13, 5).map(|r| ascii(&r));
        let dsp_firmware_version = hr(19);
        let arm_firmware_version = hr(21);
        let p_pv1 = ir(18);
        let p_pv2 = ir(20);

        Self {
            device_type_code: hr(0),
            inverter_module: hr_pair(1),
            num_mppt: hr(3).map(|r| duint8(r).0),
            num_phases: hr(3).map(|r| duint8(r).1),
            battery_serial_number: hr_block(8, 5).map(|r| ascii(&r)),
            model: inverter_serial_number.as_deref().map(Model::from_serial),
            inverter_serial_number,
            battery_firmware_version: hr(18),
            firmware_version: dsp_firmware_version
                .zip(arm_firmware_version)
                .map(|(dsp, arm)| format!("D0.{}-A0.{}", dsp, arm)),
            dsp_firmware_version,
            arm_firmware_version,
            usb_device_inserted: hr(22),
            modbus_address: hr(30),
            modbus_version: hr(34).map(centi),

            enable_charge_target: hr(20).and_then(flag),
            grid_port_max_power_output: hr(26),
            battery_power_mode: hr(27).and_then(BatteryPowerMode::from_raw),
            enable_60hz_freq_mode: hr(28).and_then(flag),
            soc_force_adjust: hr(29),
            charge_slot_1: slot(94),
            charge_slot_2: slot(31),
            discharge_slot_1: slot(56),
            discharge_slot_2: slot(44),
            system_time: hr_block(35, 6).and_then(|r| system_time(&r)),
            enable_drm_rj45_port: hr(41).and_then(flag),
            active_power_rate: hr(50),
            battery_type: hr(54),
            battery_nominal_capacity: hr(55),
            enable_discharge: hr(59).and_then(flag),
            enable_charge: hr(96).and_then(flag),
            battery_soc_reserve: hr(110),
            battery_charge_limit: hr(111),
            battery_discharge_limit: hr(112),
            battery_discharge_min_power_reserve: hr(114),
            charge_target_soc: hr(116),

            v_ac_low_out: hr(63).map(deci),
            v_ac_high_out: hr(64).map(deci),
            f_ac_low_out: hr(65).map(centi),
            f_ac_high_out: hr(66).map(centi),
            v_ac_low_out_time: stamp(67),
            v_ac_high_out_time: stamp(68),
            f_ac_low_out_time: stamp(69),
            f_ac_high_out_time: stamp(70),
            v_ac_low_in: hr(71).map(deci),
            v_ac_high_in: hr(72).map(deci),
            f_ac_low_in: hr(73).map(centi),
            f_ac_high_in: hr(74).map(centi),
            v_ac_low_in_time: stamp(75),
            v_ac_high_in_time: stamp(76),
            f_ac_low_in_time: stamp(77),
            f_ac_high_in_time: stamp(78),
            gfci_1_time: stamp(87),
            gfci_2_time: stamp(89),
            dci_1_time: stamp(91),
            dci_2_time: stamp(93),

            inverter_status: ir(0),
            v_pv1: ir(1).map(deci),
            v_pv2: ir(2).map(deci),
            v_p_bus: ir(3).map(deci),
            v_n_bus: ir(4).map(deci),
            v_ac1: ir(5).map(deci),
            e_battery_throughput_total: deci32(6),
            i_pv1: ir(8).map(centi),
            i_pv2: ir(9).map(centi),
            i_ac1: ir(10).map(centi),
            e_pv_total: deci32(11),
            f_ac1: ir(13).map(centi),
            charge_status: ir(14),
            e_pv1_day: ir(17).map(deci),
            p_pv1,
            e_pv2_day: ir(19).map(deci),
            p_pv2,
            e_grid_out_total: deci32(21),
            p_grid_out: ir(24).map(signed),
            e_grid_out_day: ir(25).map(deci),
            e_grid_in_day: ir(26).map(deci),
            e_inverter_in_total: deci32(27),
            p_inverter_out: ir(30).map(signed),
            p_backup: ir(31),
            e_grid_in_total: deci32(32),
            e_load_day: ir(35).map(deci),
            e_battery_charge_day: ir(36).map(deci),
            e_battery_discharge_day: ir(37).map(deci),
            fault_code: ir_pair(39),
            temp_inverter_heatsink: ir(41).map(|r| f64::from(signed(r)) / 10.0),
            p_load_demand: ir(42),
            p_grid_apparent: ir(43),
            e_inverter_out_day: ir(44).map(deci),
            e_inverter_out_total: deci32(45),
            work_time_total: ir_pair(47),
            system_mode: ir(49),
            v_battery: ir(50).map(deci),
            i_battery: ir(51).map(|r| f64::from(signed(r)) / 100.0),
            p_battery: ir(52).map(signed),
            v_eps_backup: ir(53).map(deci),
            f_eps_backup: ir(54).map(centi),
            temp_charger: ir(55).map(|r| f64::from(signed(r)) / 10.0),
            temp_battery: ir(56).map(|r| f64::from(signed(r)) / 10.0),
            battery_percent: ir(59),
            e_battery_discharge_total: ir(180).map(deci),
            e_battery_charge_total: ir(181).map(deci),

            p_pv: p_pv1.zip(p_pv2).map(|(a, b)| u32::from(a) + u32::from(b)),
        }
    }

    /// Names of fields whose backing registers have not been observed
    pub fn missing_fields(&self) -> Vec<String> {
        null_fields(self)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn cache_with(holding: &[(u16, u16)], input: &[(u16, u16)]) -> RegisterCache {
        let mut cache = RegisterCache::new();
        for &(address, value) in holding {
            cache.merge(RegisterBank::Holding, address, value);
        }
        for &(address, value) in input {
            cache.merge(RegisterBank::Input, address, value);
        }
        cache
    }

    #[test]
    fn test_empty_cache_decodes_to_absent_fields() {
        let inverter = Inverter::from_cache(&RegisterCache::new());
        assert_eq!(inverter, Inverter::default());
        assert!(inverter.missing_fields().contains(&"charge_target_soc".to_string()));
    }

    #[test]
    fn test_identity_fields() {
        let cache = cache_with(
            &[
                (0, 0x2001),
                (3, 0x0201),
                (13, u16::from_be_bytes(*b"SA")),
                (14, u16::from_be_bytes(*b"12")),
                (15, u16::from_be_bytes(*b"34")),
                (16, u16::from_be_bytes(*b"G5")),
                (17, u16::from_be_bytes(*b"67")),
                (19, 449),
                (21, 449),
            ],
            &[],
        );
        let inverter = Inverter::from_cache(&cache);
        assert_eq!(inverter.device_type_code, Some(0x2001));
        assert_eq!(inverter.num_mppt, Some(2));
        assert_eq!(inverter.num_phases, Some(1));
        assert_eq!(inverter.inverter_serial_number.as_deref(), Some("SA1234G567"));
        assert_eq!(inverter.model, Some(Model::Hybrid));
        assert_eq!(inverter.firmware_version.as_deref(), Some("D0.449-A0.449"));
        // Battery serial block never read
        assert_eq!(inverter.battery_serial_number, None);
    }

    #[test]
    fn test_model_prefixes() {
        assert_eq!(Model::from_serial("CE1234G567"), Model::Ac);
        assert_eq!(Model::from_serial("ED1234G567"), Model::Gen2);
        assert_eq!(Model::from_serial("XX1234G567"), Model::Unknown);
        assert_eq!(Model::from_serial(""), Model::Unknown);
    }

    #[test]
    fn test_time_slot_minute_sixty() {
        let cache = cache_with(&[(94, 30), (95, 460), (56, 678), (57, 800)], &[]);
        let inverter = Inverter::from_cache(&cache);
        let slot = inverter.charge_slot_1.unwrap();
        assert_eq!(slot.start, NaiveTime::from_hms_opt(0, 30, 0).unwrap());
        assert_eq!(slot.end, NaiveTime::from_hms_opt(5, 0, 0).unwrap());
        assert_eq!(inverter.discharge_slot_1, None);
    }

    #[test]
    fn test_partial_record_only_loses_dependent_field() {
        let full = cache_with(&[], &[(18, 1500), (20, 700), (59, 80)]);
        let inverter = Inverter::from_cache(&full);
        assert_eq!(inverter.p_pv, Some(2200));

        let partial = cache_with(&[], &[(18, 1500), (59, 80)]);
        let inverter = Inverter::from_cache(&partial);
        assert_eq!(inverter.p_pv, None);
        assert_eq!(inverter.p_pv2, None);
        assert_eq!(inverter.p_pv1, Some(1500));
        assert_eq!(inverter.battery_percent, Some(80));
    }

    #[test]
    fn test_scaled_and_signed_telemetry() {
        let cache = cache_with(
            &[(110, 4), (116, 100), (20, 1), (27, 1), (63, 1840), (65, 4750)],
            &[
                (5, 2412),
                (13, 5001),
                (24, 0xFF9C),
                (39, 0x0001),
                (40, 0x0002),
                (41, 0xFFF6),
                (50, 512),
                (51, 0xFC18),
                (52, 0xFF38),
                (180, 12345),
            ],
        );
        let inverter = Inverter::from_cache(&cache);
        assert_eq!(inverter.v_ac1, Some(241.2));
        assert_eq!(inverter.f_ac1, Some(50.01));
        assert_eq!(inverter.p_grid_out, Some(-100));
        assert_eq!(inverter.fault_code, Some(65538));
        assert_eq!(inverter.temp_inverter_heatsink, Some(-1.0));
        assert_eq!(inverter.v_battery, Some(51.2));
        assert_eq!(inverter.i_battery, Some(-10.0));
        assert_eq!(inverter.p_battery, Some(-200));
        assert_eq!(inverter.e_battery_discharge_total, Some(1234.5));
        assert_eq!(inverter.battery_soc_reserve, Some(4));
        assert_eq!(inverter.charge_target_soc, Some(100));
        assert_eq!(inverter.enable_charge_target, Some(true));
        assert_eq!(inverter.battery_power_mode, Some(BatteryPowerMode::Demand));
        assert_eq!(inverter.v_ac_low_out, Some(184.0));
        assert_eq!(inverter.f_ac_low_out, Some(47.5));
    }

    #[test]
    fn test_flag_outside_zero_one_is_absent() {
        let cache = cache_with(&[(96, 2)], &[]);
        assert_eq!(Inverter::from_cache(&cache).enable_charge, None);
    }

    #[test]
    fn test_protection_stamps_keep_raw() {
        let cache = cache_with(&[(67, 0x0930), (87, 700)], &[]);
        let inverter = Inverter::from_cache(&cache);
        let stamp = inverter.v_ac_low_out_time.unwrap();
        assert_eq!(stamp.as_counter(), 0x0930);
        assert_eq!(stamp.as_bcd_time(), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(inverter.gfci_1_time.unwrap().raw, 700);
    }

    #[test]
    fn test_system_time_decoding() {
        let cache = cache_with(&[(35, 22), (36, 3), (37, 14), (38, 9), (39, 30), (40, 5)], &[]);
        let inverter = Inverter::from_cache(&cache);
        assert_eq!(
            inverter.system_time.unwrap().to_string(),
            "2022-03-14 09:30:05"
        );
    }

    #[test]
    fn test_json_export_marks_missing_as_null() {
        let cache = cache_with(&[(116, 90)], &[]);
        let json = serde_json::to_value(Inverter::from_cache(&cache)).unwrap();
        assert_eq!(json["charge_target_soc"], 90);
        assert!(json["battery_percent"].is_null());
    }
}
