//! PDU encoding and decoding
//!
//! Decoding is strict: declared byte counts must match the payload exactly and
//! register counts must match the request, otherwise the PDU is rejected.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::constants::{
    EXCEPTION_FLAG, MAX_PDU_SIZE, MAX_REGISTERS_PER_READ, MAX_WRITE_REGISTERS,
    NULL_RESPONSE_REGISTERS, SERIAL_NUMBER_LEN,
};
use crate::error::{DecodeError, EncodeError};
use crate::frame::Adu;
use crate::pdu::{
    function_code_description, ErrorResponse, ExceptionCode, FunctionCode,
    Heartbeat, Request, Response, SerialNumber, TransparentCommand, TransparentReply,
    TransparentRequest, TransparentResponse,
};

// ============================================================================
// Builder and reader
// ============================================================================

/// PDU builder - fluent API bounded by the maximum PDU size
#[derive(Debug, Default)]
pub struct PduBuilder {
    buf: BytesMut,
}

impl PduBuilder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_PDU_SIZE),
        }
    }

    fn reserve(&self, additional: usize) -> Result<(), EncodeError> {
        let len = self.buf.len() + additional;
        if len > MAX_PDU_SIZE {
            return Err(EncodeError::PduTooLarge(len));
        }
        Ok(())
    }

    pub fn function_code(self, fc: u8) -> Result<Self, EncodeError> {
        self.byte(fc)
    }

    pub fn byte(mut self, b: u8) -> Result<Self, EncodeError> {
        self.reserve(1)?;
        self.buf.put_u8(b);
        Ok(self)
    }

    pub fn word(mut self, value: u16) -> Result<Self, EncodeError> {
        self.reserve(2)?;
        self.buf.put_u16(value);
        Ok(self)
    }

    pub fn address(self, address: u16) -> Result<Self, EncodeError> {
        self.word(address)
    }

    pub fn quantity(self, quantity: u16) -> Result<Self, EncodeError> {
        self.word(quantity)
    }

    pub fn long(mut self, value: u64) -> Result<Self, EncodeError> {
        self.reserve(8)?;
        self.buf.put_u64(value);
        Ok(self)
    }

    pub fn words(mut self, values: &[u16]) -> Result<Self, EncodeError> {
        self.reserve(values.len() * 2)?;
        values.iter().for_each(|v| self.buf.put_u16(*v));
        Ok(self)
    }

    pub fn serial(self, serial: &SerialNumber) -> Result<Self, EncodeError> {
        self.data(serial.as_bytes())
    }

    pub fn data(mut self, data: &[u8]) -> Result<Self, EncodeError> {
        self.reserve(data.len())?;
        self.buf.put_slice(data);
        Ok(self)
    }

    pub fn build(self) -> Bytes {
        if let Some(&fc) = self.buf.first() {
            trace!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                function_code_description(fc),
                self.buf.len()
            );
        }
        self.buf.freeze()
    }
}

/// Bounds-checked big-endian cursor over a PDU
#[derive(Debug)]
pub struct PduReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PduReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                context,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, context)?[0])
    }

    pub fn read_u16(&mut self, context: &'static str) -> Result<u16, DecodeError> {
        let b = self.take(2, context)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u64(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8, context)?);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn read_words(&mut self, count: usize, context: &'static str) -> Result<Vec<u16>, DecodeError> {
        let raw = self.take(count * 2, context)?;
        Ok(raw
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    pub fn read_serial(&mut self, context: &'static str) -> Result<SerialNumber, DecodeError> {
        let mut raw = [0u8; SERIAL_NUMBER_LEN];
        raw.copy_from_slice(self.take(SERIAL_NUMBER_LEN, context)?);
        Ok(SerialNumber::from_bytes(raw))
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Fail if any bytes were left unread
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

fn check_read_count(count: u16) -> Result<(), EncodeError> {
    if count == 0 || count > MAX_REGISTERS_PER_READ {
        return Err(EncodeError::TooManyRegisters {
            count: count as usize,
            max: MAX_REGISTERS_PER_READ as usize,
        });
    }
    Ok(())
}

// ============================================================================
// Requests
// ============================================================================

/// Encode a request PDU
pub fn encode_request(request: &Request) -> Result<Bytes, EncodeError> {
    let fc = request.function_code().as_u8();
    let builder = PduBuilder::new().function_code(fc)?;

    let builder = match request {
        Request::ReadHolding { start, count } | Request::ReadInput { start, count } => {
            check_read_count(*count)?;
            builder.byte(*count as u8)?.address(*start)?
        },
        Request::WriteSingle { register, value } => builder.address(*register)?.word(*value)?,
        Request::WriteMultiple {
            start,
            register_count,
            values,
        } => {
            if *register_count as usize != values.len() {
                return Err(EncodeError::CountMismatch {
                    declared: *register_count,
                    actual: values.len(),
                });
            }
            if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
                return Err(EncodeError::TooManyRegisters {
                    count: values.len(),
                    max: MAX_WRITE_REGISTERS,
                });
            }
            builder
                .address(*start)?
                .quantity(*register_count)?
                .byte((values.len() * 2) as u8)?
                .words(values)?
        },
        Request::Heartbeat(heartbeat) => builder
            .serial(&heartbeat.data_adapter_serial)?
            .byte(heartbeat.adapter_type)?,
        Request::Transparent(transparent) => {
            if let TransparentCommand::ReadHolding { count, .. }
            | TransparentCommand::ReadInput { count, .. } = transparent.command
            {
                check_read_count(count)?;
            }
            let (first, second) = transparent.command.fields();
            builder
                .serial(&transparent.data_adapter_serial)?
                .long(transparent.padding)?
                .byte(transparent.slave_address)?
                .byte(transparent.command.inner_function_code())?
                .word(first)?
                .word(second)?
                .word(transparent.command.check())?
        },
    };

    Ok(builder.build())
}

/// Decode a request PDU, as a device or simulator sees it
pub fn decode_request(pdu: &[u8]) -> Result<Request, DecodeError> {
    let mut reader = PduReader::new(pdu);
    let fc = reader.read_u8("function code").map_err(|_| DecodeError::Empty)?;

    let request = match FunctionCode::from_u8(fc) {
        Some(FunctionCode::ReadHoldingRegisters) | Some(FunctionCode::ReadInputRegisters) => {
            let count = reader.read_u8("register count")? as u16;
            let start = reader.read_u16("start address")?;
            if count == 0 || count > MAX_REGISTERS_PER_READ {
                return Err(DecodeError::InvalidValue {
                    field: "register count",
                    value: count as u32,
                });
            }
            if fc == FunctionCode::ReadHoldingRegisters.as_u8() {
                Request::ReadHolding { start, count }
            } else {
                Request::ReadInput { start, count }
            }
        },
        Some(FunctionCode::WriteSingleRegister) => Request::WriteSingle {
            register: reader.read_u16("register address")?,
            value: reader.read_u16("register value")?,
        },
        Some(FunctionCode::WriteMultipleRegisters) => {
            let start = reader.read_u16("start address")?;
            let register_count = reader.read_u16("register count")?;
            let byte_count = reader.read_u8("byte count")? as usize;
            if byte_count != reader.remaining() {
                return Err(DecodeError::ByteCountMismatch {
                    declared: byte_count,
                    actual: reader.remaining(),
                });
            }
            if byte_count != register_count as usize * 2 {
                return Err(DecodeError::RegisterCountMismatch {
                    expected: register_count,
                    actual: (byte_count / 2) as u16,
                });
            }
            Request::WriteMultiple {
                start,
                register_count,
                values: reader.read_words(register_count as usize, "register values")?,
            }
        },
        Some(FunctionCode::Heartbeat) => Request::Heartbeat(read_heartbeat(&mut reader)?),
        Some(FunctionCode::Transparent) => {
            let data_adapter_serial = reader.read_serial("data adapter serial")?;
            let padding = reader.read_u64("padding")?;
            let slave_address = reader.read_u8("slave address")?;
            let inner_fc = reader.read_u8("inner function code")?;
            let first = reader.read_u16("inner field")?;
            let second = reader.read_u16("inner field")?;
            let carried = reader.read_u16("check")?;
            let command = match FunctionCode::from_u8(inner_fc) {
                Some(FunctionCode::ReadHoldingRegisters) => TransparentCommand::ReadHolding {
                    base: first,
                    count: second,
                },
                Some(FunctionCode::ReadInputRegisters) => TransparentCommand::ReadInput {
                    base: first,
                    count: second,
                },
                Some(FunctionCode::WriteSingleRegister) => TransparentCommand::WriteSingle {
                    register: first,
                    value: second,
                },
                _ => return Err(DecodeError::UnsupportedFunction(inner_fc)),
            };
            let computed = command.check();
            if carried != computed {
                return Err(DecodeError::CheckMismatch { carried, computed });
            }
            Request::Transparent(TransparentRequest {
                data_adapter_serial,
                padding,
                slave_address,
                command,
            })
        },
        None => return Err(DecodeError::UnsupportedFunction(fc)),
    };

    reader.finish()?;
    Ok(request)
}

// ============================================================================
// Responses
// ============================================================================

/// Encode a response PDU, as the device would send it
pub fn encode_response(response: &Response) -> Result<Bytes, EncodeError> {
    let builder = PduBuilder::new().function_code(response.function_code())?;

    let builder = match response {
        Response::ReadHolding { values, .. } | Response::ReadInput { values, .. } => {
            if values.len() * 2 > u8::MAX as usize {
                return Err(EncodeError::TooManyRegisters {
                    count: values.len(),
                    max: u8::MAX as usize / 2,
                });
            }
            builder.byte((values.len() * 2) as u8)?.words(values)?
        },
        Response::WriteSingle { register, value } => builder.address(*register)?.word(*value)?,
        Response::WriteMultiple { start, count } => builder.address(*start)?.quantity(*count)?,
        Response::Heartbeat(heartbeat) => builder
            .serial(&heartbeat.data_adapter_serial)?
            .byte(heartbeat.adapter_type)?,
        Response::Transparent(transparent) => encode_transparent_response(builder, transparent)?,
        Response::Exception(err) => builder.byte(err.exception.as_u8())?,
        Response::Unknown { payload, .. } => builder.data(payload)?,
    };

    Ok(builder.build())
}

fn encode_transparent_response(
    builder: PduBuilder,
    response: &TransparentResponse,
) -> Result<PduBuilder, EncodeError> {
    let inner_fc = match &response.reply {
        TransparentReply::ReadHolding { .. } => FunctionCode::ReadHoldingRegisters.as_u8(),
        TransparentReply::ReadInput { .. } => FunctionCode::ReadInputRegisters.as_u8(),
        TransparentReply::WriteSingle { .. } => FunctionCode::WriteSingleRegister.as_u8(),
        TransparentReply::Error { function_code, .. } => function_code | EXCEPTION_FLAG,
        TransparentReply::Null => 0,
    };
    let builder = builder
        .serial(&response.data_adapter_serial)?
        .long(response.padding)?
        .byte(response.slave_address)?
        .byte(inner_fc)?
        .serial(&response.inverter_serial)?;

    let builder = match &response.reply {
        TransparentReply::ReadHolding { base, values } | TransparentReply::ReadInput { base, values } => {
            builder.address(*base)?.quantity(values.len() as u16)?.words(values)?
        },
        TransparentReply::WriteSingle { register, value } => builder.address(*register)?.word(*value)?,
        TransparentReply::Error {
            base_register,
            register_count,
            ..
        } => builder.address(*base_register)?.quantity(*register_count)?,
        TransparentReply::Null => builder.words(&[0; NULL_RESPONSE_REGISTERS])?,
    };

    builder.word(response.check)
}

/// Decode a response PDU against the request it answers
pub fn decode_response(request: &Request, pdu: &[u8]) -> Result<Response, DecodeError> {
    let fc = *pdu.first().ok_or(DecodeError::Empty)?;

    if fc & EXCEPTION_FLAG != 0 {
        return decode_exception(pdu);
    }

    let Some(function) = FunctionCode::from_u8(fc) else {
        debug!(
            "Unknown function code 0x{:02X} in response, payload={}",
            fc,
            hex::encode(&pdu[1..])
        );
        return Ok(Response::Unknown {
            function_code: fc,
            payload: Bytes::copy_from_slice(&pdu[1..]),
        });
    };

    // Heartbeats arrive whenever the adapter decides to send one
    if function == FunctionCode::Heartbeat {
        let mut reader = PduReader::new(&pdu[1..]);
        let heartbeat = read_heartbeat(&mut reader)?;
        reader.finish()?;
        return Ok(Response::Heartbeat(heartbeat));
    }

    let expected = request.function_code();
    if function != expected {
        return Err(DecodeError::FunctionMismatch {
            expected: expected.as_u8(),
            actual: fc,
        });
    }

    let mut reader = PduReader::new(&pdu[1..]);
    let response = match request {
        Request::ReadHolding { start, count } | Request::ReadInput { start, count } => {
            let values = read_register_block(&mut reader, *count)?;
            if function == FunctionCode::ReadHoldingRegisters {
                Response::ReadHolding { start: *start, values }
            } else {
                Response::ReadInput { start: *start, values }
            }
        },
        Request::WriteSingle { register, value } => {
            let echoed_register = reader.read_u16("register address")?;
            let echoed_value = reader.read_u16("register value")?;
            if (echoed_register, echoed_value) != (*register, *value) {
                return Err(DecodeError::EchoMismatch(format!(
                    "wrote {}={}, device echoed {}={}",
                    register, value, echoed_register, echoed_value
                )));
            }
            Response::WriteSingle {
                register: echoed_register,
                value: echoed_value,
            }
        },
        Request::WriteMultiple {
            start,
            register_count,
            ..
        } => {
            let echoed_start = reader.read_u16("start address")?;
            let echoed_count = reader.read_u16("register count")?;
            if (echoed_start, echoed_count) != (*start, *register_count) {
                return Err(DecodeError::EchoMismatch(format!(
                    "wrote {} registers at {}, device echoed {} at {}",
                    register_count, start, echoed_count, echoed_start
                )));
            }
            Response::WriteMultiple {
                start: echoed_start,
                count: echoed_count,
            }
        },
        Request::Transparent(transparent) => {
            let response = read_transparent_response(&mut reader)?;
            check_transparent_reply(&transparent.command, &response.reply)?;
            Response::Transparent(response)
        },
        // A heartbeat PDU already returned above; nothing else answers one
        Request::Heartbeat(_) => return Err(DecodeError::UnsupportedFunction(fc)),
    };

    reader.finish()?;
    Ok(response)
}

/// Decode a PDU that arrived without a matching request in flight.
///
/// Only messages that carry their own context (heartbeats, transparent
/// responses, exceptions, unknown codes) can be interpreted this way.
pub fn decode_unsolicited(pdu: &[u8]) -> Result<Response, DecodeError> {
    let fc = *pdu.first().ok_or(DecodeError::Empty)?;
    if fc & EXCEPTION_FLAG != 0 {
        return decode_exception(pdu);
    }
    let mut reader = PduReader::new(&pdu[1..]);
    let response = match FunctionCode::from_u8(fc) {
        Some(FunctionCode::Heartbeat) => Response::Heartbeat(read_heartbeat(&mut reader)?),
        Some(FunctionCode::Transparent) => Response::Transparent(read_transparent_response(&mut reader)?),
        Some(_) => return Err(DecodeError::UnsupportedFunction(fc)),
        None => Response::Unknown {
            function_code: fc,
            payload: Bytes::copy_from_slice(reader.rest()),
        },
    };
    reader.finish()?;
    Ok(response)
}

fn decode_exception(pdu: &[u8]) -> Result<Response, DecodeError> {
    if pdu.len() < 2 {
        return Err(DecodeError::Truncated {
            context: "exception code",
            needed: 2,
            available: pdu.len(),
        });
    }
    if pdu.len() > 2 {
        return Err(DecodeError::TrailingBytes(pdu.len() - 2));
    }
    let err = ErrorResponse {
        function_code: pdu[0] & !EXCEPTION_FLAG,
        exception: ExceptionCode::from_u8(pdu[1]),
    };
    debug!("Exception response: {}", err);
    Ok(Response::Exception(err))
}

fn read_register_block(reader: &mut PduReader<'_>, expected: u16) -> Result<Vec<u16>, DecodeError> {
    let byte_count = reader.read_u8("byte count")? as usize;
    if byte_count != reader.remaining() {
        return Err(DecodeError::ByteCountMismatch {
            declared: byte_count,
            actual: reader.remaining(),
        });
    }
    if byte_count % 2 != 0 {
        return Err(DecodeError::InvalidValue {
            field: "byte count",
            value: byte_count as u32,
        });
    }
    let count = (byte_count / 2) as u16;
    if count != expected {
        return Err(DecodeError::RegisterCountMismatch {
            expected,
            actual: count,
        });
    }
    reader.read_words(count as usize, "register values")
}

fn read_heartbeat(reader: &mut PduReader<'_>) -> Result<Heartbeat, DecodeError> {
    Ok(Heartbeat {
        data_adapter_serial: reader.read_serial("data adapter serial")?,
        adapter_type: reader.read_u8("adapter type")?,
    })
}

fn read_transparent_response(reader: &mut PduReader<'_>) -> Result<TransparentResponse, DecodeError> {
    let data_adapter_serial = reader.read_serial("data adapter serial")?;
    let padding = reader.read_u64("padding")?;
    let slave_address = reader.read_u8("slave address")?;
    let inner_fc = reader.read_u8("inner function code")?;
    let inverter_serial = reader.read_serial("inverter serial")?;

    let reply = if inner_fc & EXCEPTION_FLAG != 0 {
        TransparentReply::Error {
            function_code: inner_fc & !EXCEPTION_FLAG,
            base_register: reader.read_u16("base register")?,
            register_count: reader.read_u16("register count")?,
        }
    } else {
        match inner_fc {
            0 => {
                let nulls = reader.read_words(NULL_RESPONSE_REGISTERS, "null response")?;
                if nulls.iter().any(|&v| v != 0) || !inverter_serial.is_null() {
                    warn!(
                        "Null response with unexpected content: serial={:?}, values={:?}",
                        inverter_serial, nulls
                    );
                }
                TransparentReply::Null
            },
            0x03 | 0x04 => {
                let base = reader.read_u16("base register")?;
                let count = reader.read_u16("register count")?;
                // Values are followed by the 2-byte check
                let available = reader.remaining().saturating_sub(2);
                if available != count as usize * 2 {
                    return Err(DecodeError::ByteCountMismatch {
                        declared: count as usize * 2,
                        actual: available,
                    });
                }
                let values = reader.read_words(count as usize, "register values")?;
                if inner_fc == 0x03 {
                    TransparentReply::ReadHolding { base, values }
                } else {
                    TransparentReply::ReadInput { base, values }
                }
            },
            0x06 => TransparentReply::WriteSingle {
                register: reader.read_u16("register address")?,
                value: reader.read_u16("register value")?,
            },
            other => return Err(DecodeError::UnsupportedFunction(other)),
        }
    };
    let check = reader.read_u16("check")?;

    trace!(
        "Transparent response: slave=0x{:02X}, inverter={}, reply={:?}",
        slave_address,
        inverter_serial,
        reply
    );

    Ok(TransparentResponse {
        data_adapter_serial,
        padding,
        slave_address,
        inverter_serial,
        reply,
        check,
    })
}

fn check_transparent_reply(command: &TransparentCommand, reply: &TransparentReply) -> Result<(), DecodeError> {
    match (command, reply) {
        (_, TransparentReply::Null) | (_, TransparentReply::Error { .. }) => Ok(()),
        (
            TransparentCommand::ReadHolding { base, count },
            TransparentReply::ReadHolding { base: got, values },
        )
        | (
            TransparentCommand::ReadInput { base, count },
            TransparentReply::ReadInput { base: got, values },
        ) => {
            if values.len() != *count as usize {
                return Err(DecodeError::RegisterCountMismatch {
                    expected: *count,
                    actual: values.len() as u16,
                });
            }
            if got != base {
                return Err(DecodeError::EchoMismatch(format!(
                    "requested base {}, received base {}",
                    base, got
                )));
            }
            Ok(())
        },
        (
            TransparentCommand::WriteSingle { register, value },
            TransparentReply::WriteSingle {
                register: got_register,
                value: got_value,
            },
        ) => {
            if (register, value) != (got_register, got_value) {
                return Err(DecodeError::EchoMismatch(format!(
                    "wrote {}={}, device echoed {}={}",
                    register, value, got_register, got_value
                )));
            }
            Ok(())
        },
        (command, _) => Err(DecodeError::FunctionMismatch {
            expected: command.inner_function_code(),
            actual: transparent_reply_function_code(reply),
        }),
    }
}

fn transparent_reply_function_code(reply: &TransparentReply) -> u8 {
    match reply {
        TransparentReply::ReadHolding { .. } => 0x03,
        TransparentReply::ReadInput { .. } => 0x04,
        TransparentReply::WriteSingle { .. } => 0x06,
        TransparentReply::Error { function_code, .. } => *function_code | EXCEPTION_FLAG,
        TransparentReply::Null => 0,
    }
}

// ============================================================================
// ADU helpers
// ============================================================================

/// A request together with its MBAP addressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub request: Request,
}

/// Encode a request into a complete ADU
pub fn encode_adu(transaction_id: u16, unit_id: u8, request: &Request) -> Result<Bytes, EncodeError> {
    let pdu = encode_request(request)?;
    Ok(Adu::new(transaction_id, unit_id, pdu)?.to_bytes())
}

/// Decode one complete request ADU
pub fn decode_adu_request(data: &[u8]) -> Result<FramedRequest, DecodeError> {
    let adu = Adu::from_bytes(data)?;
    Ok(FramedRequest {
        transaction_id: adu.transaction_id(),
        unit_id: adu.unit_id(),
        request: decode_request(&adu.pdu)?,
    })
}
