//! GivEnergy Modbus TCP protocol constants
//!
//! Frame limits follow the Modbus TCP framing rules. Device limits reflect what the
//! inverter's data adapter actually serves, which is narrower than the generic protocol.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const ADU_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Minimum MBAP length field value: Unit ID plus a function code
pub const MIN_MBAP_LENGTH: usize = 2;

/// Default bound on how far the frame assembler scans for a header after losing sync.
/// One maximum-sized ADU (7 + 253 bytes).
pub const DEFAULT_MAX_RESYNC_SCAN: usize = ADU_HEADER_LEN + MAX_PDU_SIZE;

/// Read buffer size for a single transport read
pub const RESPONSE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum registers the device returns for one FC03/FC04 read.
/// Larger requests are answered with garbage or not at all.
pub const MAX_REGISTERS_PER_READ: u16 = 60;

/// Maximum number of registers for FC16 (Write Multiple Registers)
/// (253 - 6) / 2 = 123 registers
pub const MAX_WRITE_REGISTERS: usize = 123;

// ============================================================================
// Device Addressing
// ============================================================================

/// Unit identifier of the inverter itself
pub const INVERTER_UNIT_ID: u8 = 0x11;

/// Unit identifier of the first battery BMS; further batteries follow sequentially
pub const FIRST_BATTERY_UNIT_ID: u8 = 0x32;

/// Maximum number of battery units a single inverter supports
pub const MAX_BATTERIES: usize = 6;

/// TCP port the data adapter listens on
pub const DEFAULT_PORT: u16 = 8899;

// ============================================================================
// Device-specific PDU Fields
// ============================================================================

/// Length of serial number strings carried in heartbeat and transparent PDUs
pub const SERIAL_NUMBER_LEN: usize = 10;

/// Fill character used to right-justify short serial numbers
pub const SERIAL_NUMBER_PAD: u8 = b'*';

/// Padding word sent in transparent requests
pub const TRANSPARENT_REQUEST_PADDING: u64 = 0x08;

/// Number of null registers carried by the device's unsolicited null response
pub const NULL_RESPONSE_REGISTERS: usize = 62;

/// Modbus exception flag (high bit of the function code)
pub const EXCEPTION_FLAG: u8 = 0x80;
