//! GivEnergy protocol error types
//!
//! Each layer reports its own error enum; [`ModbusError`] is the outcome type of
//! session operations and wraps all of them.

use std::io;

use thiserror::Error;

use crate::pdu::ErrorResponse;
use crate::types::{DeviceIdentity, DeviceKind};

/// Result type for session level operations
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Malformed PDU or ADU content
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty PDU")]
    Empty,

    #[error("Truncated {context}: need {needed} bytes, {available} available")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Byte count mismatch: declared {declared}, present {actual}")]
    ByteCountMismatch { declared: usize, actual: usize },

    #[error("Register count mismatch: expected {expected}, received {actual}")]
    RegisterCountMismatch { expected: u16, actual: u16 },

    #[error("Function code mismatch: expected 0x{expected:02X}, received 0x{actual:02X}")]
    FunctionMismatch { expected: u8, actual: u8 },

    #[error("Response does not echo request: {0}")]
    EchoMismatch(String),

    #[error("{0} trailing bytes after PDU")]
    TrailingBytes(usize),

    #[error("Unsupported function code 0x{0:02X}")]
    UnsupportedFunction(u8),

    #[error("Check code mismatch: carried 0x{carried:04X}, computed 0x{computed:04X}")]
    CheckMismatch { carried: u16, computed: u16 },

    #[error("Invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: u32 },

    #[error("Invalid ADU header: {0}")]
    InvalidHeader(String),
}

/// Request could not be turned into bytes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Register count {declared} does not match {actual} supplied values")]
    CountMismatch { declared: u16, actual: usize },

    #[error("Register count {count} outside 1..={max}")]
    TooManyRegisters { count: usize, max: usize },

    #[error("PDU too large: {0} bytes")]
    PduTooLarge(usize),

    #[error("Invalid serial number: {0:?}")]
    InvalidSerial(String),
}

/// Local write validation failure; nothing was sent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteRejected {
    #[error("Input register {address} is read-only")]
    NotHolding { address: u16 },

    #[error("Holding register {address} is not writable")]
    NotWhitelisted { address: u16 },

    #[error("{label} (HR{address}): {value} outside {min}..={max}")]
    OutOfRange {
        address: u16,
        label: &'static str,
        value: u16,
        min: u16,
        max: u16,
    },

    #[error("{label} (HR{address}): {value} is not an allowed value")]
    NotAllowed {
        address: u16,
        label: &'static str,
        value: u16,
    },

    #[error("{label} (HR{address}): {value} is not a valid HHMM time")]
    InvalidTime {
        address: u16,
        label: &'static str,
        value: u16,
    },

    #[error("Write of {count} registers at HR{address} is not allowed")]
    UnsupportedRequest { address: u16, count: usize },
}

/// Transport failures, reported as "no response received"
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Timeout after {0} ms")]
    Timeout(u64),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => NetworkError::ConnectionClosed,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => NetworkError::ConnectionReset(err.to_string()),
            _ => NetworkError::Io(err.to_string()),
        }
    }
}

/// Plant aggregation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlantError {
    #[error("Device {identity} cannot be refreshed as {kind}")]
    IdentityConflict {
        identity: DeviceIdentity,
        kind: DeviceKind,
    },

    #[error("Too many batteries: at most {0} supported")]
    TooManyBatteries(usize),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Outcome of a request/response exchange
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModbusError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Write rejected: {0}")]
    WriteRejected(#[from] WriteRejected),

    #[error("Device exception: {0}")]
    Exception(ErrorResponse),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Field not available: {field}")]
    PartialData { field: &'static str },

    #[error("Plant error: {0}")]
    Plant(#[from] PlantError),
}

impl From<io::Error> for ModbusError {
    fn from(err: io::Error) -> Self {
        ModbusError::Network(err.into())
    }
}

impl ModbusError {
    pub fn partial(field: &'static str) -> Self {
        ModbusError::PartialData { field }
    }

    /// Decode and network failures are worth retrying; a device exception is its answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModbusError::Decode(_) | ModbusError::Network(_))
    }

    /// Check if the connection should be reopened before the next request
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            ModbusError::Network(
                NetworkError::ConnectionClosed
                    | NetworkError::ConnectionReset(_)
                    | NetworkError::Io(_)
            )
        )
    }
}
