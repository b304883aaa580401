//! GivEnergy inverter and battery protocol core
//!
//! Talks to GivEnergy hybrid inverters and their battery units through the
//! data adapter's Modbus TCP port.
//!
//! # Architecture
//!
//! - **Framing**: `FrameAssembler` turns an arbitrary byte stream into ADUs and
//!   resynchronises after garbage
//! - **Codec**: closed `Request`/`Response` enums over the supported function
//!   codes, including the adapter's heartbeat and transparent PDUs
//! - **Write gate**: static whitelist checked before any write is framed
//! - **Cache & model**: per-device register caches projected into typed
//!   `Inverter` and `Battery` views, aggregated by `Plant`
//! - **Session**: single-outstanding request/response over a `Transport`

pub mod cache;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod logging;
pub mod model;
pub mod pdu;
pub mod plant;
pub mod session;
pub mod types;
pub mod write_gate;

pub use cache::RegisterCache;
pub use codec::{decode_response, encode_adu, encode_request};
pub use config::{ClientConfig, FramerConfig, LogConfig};
pub use error::{
    ConfigError, DecodeError, EncodeError, ModbusError, NetworkError, PlantError, Result, WriteRejected,
};
pub use frame::{Adu, FrameAssembler, FrameEvent, MbapHeader};
pub use model::{Battery, Inverter, StampRegister, TimeSlot};
pub use pdu::{ErrorResponse, ExceptionCode, FunctionCode, Request, Response, SerialNumber};
pub use plant::{Plant, PlantSnapshot};
pub use session::{open, Session, StreamTransport, TcpTransport, Transport};
pub use types::{DeviceIdentity, DeviceKind, RegisterBank, RegisterKey};
pub use write_gate::validate_write;
