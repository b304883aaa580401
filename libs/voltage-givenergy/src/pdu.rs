//! PDU types
//!
//! Requests and responses are closed enums over the function codes the GivEnergy
//! data adapter speaks. Device-specific PDUs (heartbeat and the transparent
//! wrapper carrying serial numbers) get their own variants.

use std::fmt;

use bytes::Bytes;
use crc::{Crc, CRC_16_MODBUS};

use crate::constants::{SERIAL_NUMBER_LEN, SERIAL_NUMBER_PAD, TRANSPARENT_REQUEST_PADDING};
use crate::error::EncodeError;
use crate::types::RegisterBank;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Function codes understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Device liveness check, must be echoed
    Heartbeat = 0x01,
    /// Modbus exchange wrapped with adapter and inverter serial numbers
    Transparent = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleRegister = 0x06,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(FunctionCode::Heartbeat),
            0x02 => Some(FunctionCode::Transparent),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            FunctionCode::Heartbeat => "Heartbeat",
            FunctionCode::Transparent => "Transparent",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

/// Human-readable description of a raw function code, exception flag ignored
pub fn function_code_description(fc: u8) -> &'static str {
    FunctionCode::from_u8(fc & 0x7F).map_or("Unknown Function", FunctionCode::description)
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    DeviceFailure,
    Unrecognized(u8),
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::DeviceFailure,
            other => ExceptionCode::Unrecognized(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::DeviceFailure => 0x04,
            ExceptionCode::Unrecognized(code) => code,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::DeviceFailure => "Slave Device Failure",
            ExceptionCode::Unrecognized(_) => "Unknown Exception",
        }
    }
}

/// Device-reported failure for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Function code of the failed request, exception flag cleared
    pub function_code: u8,
    pub exception: ExceptionCode,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:02X}) for FC{:02X} {}",
            self.exception.description(),
            self.exception.as_u8(),
            self.function_code,
            function_code_description(self.function_code)
        )
    }
}

/// Fixed-width ASCII serial number
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SerialNumber([u8; SERIAL_NUMBER_LEN]);

impl SerialNumber {
    /// All-null serial, as sent in the device's null responses
    pub const NULL: SerialNumber = SerialNumber([0; SERIAL_NUMBER_LEN]);

    /// Build from text, right-justified and padded with `*`
    pub fn new(text: &str) -> Result<Self, EncodeError> {
        if !text.is_ascii() || text.len() > SERIAL_NUMBER_LEN {
            return Err(EncodeError::InvalidSerial(text.to_string()));
        }
        let mut bytes = [SERIAL_NUMBER_PAD; SERIAL_NUMBER_LEN];
        bytes[SERIAL_NUMBER_LEN - text.len()..].copy_from_slice(text.as_bytes());
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; SERIAL_NUMBER_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SERIAL_NUMBER_LEN] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|&b| write!(f, "{}", b as char))
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "SerialNumber(<null>)")
        } else {
            write!(f, "SerialNumber({:?})", self.to_string())
        }
    }
}

/// Heartbeat sent by the data adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub data_adapter_serial: SerialNumber,
    pub adapter_type: u8,
}

// ============================================================================
// Transparent PDUs
// ============================================================================

/// CRC-16/MODBUS over the inner function code and its two 16-bit fields
pub fn transparent_check(inner_function_code: u8, first: u16, second: u16) -> u16 {
    let [a, b] = first.to_be_bytes();
    let [c, d] = second.to_be_bytes();
    MODBUS_CRC.checksum(&[inner_function_code, a, b, c, d])
}

/// Inner command of a transparent request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransparentCommand {
    ReadHolding { base: u16, count: u16 },
    ReadInput { base: u16, count: u16 },
    WriteSingle { register: u16, value: u16 },
}

impl TransparentCommand {
    pub fn inner_function_code(&self) -> u8 {
        match self {
            TransparentCommand::ReadHolding { .. } => FunctionCode::ReadHoldingRegisters.as_u8(),
            TransparentCommand::ReadInput { .. } => FunctionCode::ReadInputRegisters.as_u8(),
            TransparentCommand::WriteSingle { .. } => FunctionCode::WriteSingleRegister.as_u8(),
        }
    }

    /// The two 16-bit fields following the inner function code
    pub fn fields(&self) -> (u16, u16) {
        match *self {
            TransparentCommand::ReadHolding { base, count }
            | TransparentCommand::ReadInput { base, count } => (base, count),
            TransparentCommand::WriteSingle { register, value } => (register, value),
        }
    }

    pub fn check(&self) -> u16 {
        let (first, second) = self.fields();
        transparent_check(self.inner_function_code(), first, second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransparentRequest {
    pub data_adapter_serial: SerialNumber,
    pub padding: u64,
    pub slave_address: u8,
    pub command: TransparentCommand,
}

impl TransparentRequest {
    pub fn new(data_adapter_serial: SerialNumber, slave_address: u8, command: TransparentCommand) -> Self {
        Self {
            data_adapter_serial,
            padding: TRANSPARENT_REQUEST_PADDING,
            slave_address,
            command,
        }
    }
}

/// Inner reply of a transparent response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransparentReply {
    ReadHolding { base: u16, values: Vec<u16> },
    ReadInput { base: u16, values: Vec<u16> },
    WriteSingle { register: u16, value: u16 },
    /// Inner function code had its error flag set
    Error {
        function_code: u8,
        base_register: u16,
        register_count: u16,
    },
    /// Unsolicited null response (inner function code 0)
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransparentResponse {
    pub data_adapter_serial: SerialNumber,
    pub padding: u64,
    pub slave_address: u8,
    pub inverter_serial: SerialNumber,
    pub reply: TransparentReply,
    /// Carried as received; the device's response checksum scheme is not known
    pub check: u16,
}

// ============================================================================
// Requests and responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadHolding { start: u16, count: u16 },
    ReadInput { start: u16, count: u16 },
    WriteSingle { register: u16, value: u16 },
    WriteMultiple {
        start: u16,
        register_count: u16,
        values: Vec<u16>,
    },
    Heartbeat(Heartbeat),
    Transparent(TransparentRequest),
}

impl Request {
    pub fn read(bank: RegisterBank, start: u16, count: u16) -> Self {
        match bank {
            RegisterBank::Holding => Request::ReadHolding { start, count },
            RegisterBank::Input => Request::ReadInput { start, count },
        }
    }

    /// Write multiple with the count taken from the values
    pub fn write_multiple(start: u16, values: Vec<u16>) -> Self {
        Request::WriteMultiple {
            start,
            register_count: values.len() as u16,
            values,
        }
    }

    pub fn function_code(&self) -> FunctionCode {
        match self {
            Request::ReadHolding { .. } => FunctionCode::ReadHoldingRegisters,
            Request::ReadInput { .. } => FunctionCode::ReadInputRegisters,
            Request::WriteSingle { .. } => FunctionCode::WriteSingleRegister,
            Request::WriteMultiple { .. } => FunctionCode::WriteMultipleRegisters,
            Request::Heartbeat(_) => FunctionCode::Heartbeat,
            Request::Transparent(_) => FunctionCode::Transparent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadHolding { start: u16, values: Vec<u16> },
    ReadInput { start: u16, values: Vec<u16> },
    WriteSingle { register: u16, value: u16 },
    WriteMultiple { start: u16, count: u16 },
    Heartbeat(Heartbeat),
    Transparent(TransparentResponse),
    Exception(ErrorResponse),
    /// Function code outside the supported set
    Unknown { function_code: u8, payload: Bytes },
}

impl Response {
    /// Raw function code as it appears on the wire
    pub fn function_code(&self) -> u8 {
        match self {
            Response::ReadHolding { .. } => FunctionCode::ReadHoldingRegisters.as_u8(),
            Response::ReadInput { .. } => FunctionCode::ReadInputRegisters.as_u8(),
            Response::WriteSingle { .. } => FunctionCode::WriteSingleRegister.as_u8(),
            Response::WriteMultiple { .. } => FunctionCode::WriteMultipleRegisters.as_u8(),
            Response::Heartbeat(_) => FunctionCode::Heartbeat.as_u8(),
            Response::Transparent(_) => FunctionCode::Transparent.as_u8(),
            Response::Exception(err) => err.function_code | crate::constants::EXCEPTION_FLAG,
            Response::Unknown { function_code, .. } => *function_code,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Response::Exception(_))
    }

    /// Register values this response reports, as (bank, first address, values)
    pub fn register_updates(&self) -> Option<(RegisterBank, u16, &[u16])> {
        match self {
            Response::ReadHolding { start, values } => Some((RegisterBank::Holding, *start, values.as_slice())),
            Response::ReadInput { start, values } => Some((RegisterBank::Input, *start, values.as_slice())),
            Response::WriteSingle { register, value } => {
                Some((RegisterBank::Holding, *register, std::slice::from_ref(value)))
            },
            Response::Transparent(response) => match &response.reply {
                TransparentReply::ReadHolding { base, values } => {
                    Some((RegisterBank::Holding, *base, values.as_slice()))
                },
                TransparentReply::ReadInput { base, values } => {
                    Some((RegisterBank::Input, *base, values.as_slice()))
                },
                TransparentReply::WriteSingle { register, value } => {
                    Some((RegisterBank::Holding, *register, std::slice::from_ref(value)))
                },
                TransparentReply::Error { .. } | TransparentReply::Null => None,
            },
            Response::WriteMultiple { .. }
            | Response::Heartbeat(_)
            | Response::Exception(_)
            | Response::Unknown { .. } => None,
        }
    }
}
