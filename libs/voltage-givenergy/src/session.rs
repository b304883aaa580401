//! Request/response session over one byte stream
//!
//! A session keeps exactly one request outstanding. Responses are matched by
//! transaction id and unit id; anything else that arrives in between is either
//! handled (heartbeats) or dropped.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::{decode_response, decode_unsolicited, encode_adu, encode_response};
use crate::config::{ClientConfig, FramerConfig};
use crate::constants::{EXCEPTION_FLAG, RESPONSE_BUFFER_SIZE};
use crate::error::{DecodeError, ModbusError, NetworkError, Result};
use crate::frame::{Adu, FrameAssembler, FrameEvent};
use crate::pdu::{ErrorResponse, ExceptionCode, FunctionCode, Request, Response, TransparentReply};
use crate::plant::Plant;
use crate::types::{DeviceIdentity, RegisterBank};
use crate::write_gate::validated_write_request;

/// Byte-level transport collaborator
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, data: &[u8]) -> std::result::Result<(), NetworkError>;

    /// Read whatever is available; `Ok(0)` means the peer closed the stream
    async fn recv(&mut self, buffer: &mut [u8]) -> std::result::Result<usize, NetworkError>;
}

/// Transport over any async byte stream
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
}

pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl TcpTransport {
    pub async fn connect(address: &str, connect_timeout: Duration) -> std::result::Result<Self, NetworkError> {
        debug!("TCP connecting: {}", address);
        match timeout(connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", address);
                Ok(Self::new(stream))
            },
            Ok(Err(e)) => {
                warn!("TCP err: {} - {}", address, e);
                Err(NetworkError::Connect {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
            },
            Err(_) => {
                warn!("TCP timeout: {}", address);
                Err(NetworkError::Timeout(connect_timeout.as_millis() as u64))
            },
        }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> std::result::Result<(), NetworkError> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, buffer: &mut [u8]) -> std::result::Result<usize, NetworkError> {
        Ok(self.stream.read(buffer).await?)
    }
}

/// Connect to the data adapter and open a session addressing `identity`
pub async fn open(config: &ClientConfig, identity: DeviceIdentity) -> Result<Session<TcpTransport>> {
    let transport = TcpTransport::connect(&config.address(), config.connect_timeout()).await?;
    Ok(Session::new(
        transport,
        identity,
        &config.framer,
        config.response_timeout(),
    ))
}

/// Outcome of a plant refresh
#[derive(Debug, Default)]
pub struct RefreshSummary {
    /// Registers merged into plant caches
    pub stored: usize,
    /// Reads that failed without breaking the connection
    pub failed: Vec<(DeviceIdentity, ModbusError)>,
}

pub struct Session<T: Transport> {
    transport: T,
    assembler: FrameAssembler,
    /// ADUs received but not yet examined
    pending: VecDeque<Adu>,
    identity: DeviceIdentity,
    next_transaction_id: u16,
    response_timeout: Duration,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, identity: DeviceIdentity, framer: &FramerConfig, response_timeout: Duration) -> Self {
        Self {
            transport,
            assembler: FrameAssembler::new(framer),
            pending: VecDeque::new(),
            identity,
            next_transaction_id: 1,
            response_timeout,
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Sync losses seen by this session's assembler
    pub fn sync_losses(&self) -> u64 {
        self.assembler.sync_losses()
    }

    fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Frame and write a request to the session's device; returns its transaction id
    pub async fn send(&mut self, request: &Request) -> Result<u16> {
        self.send_to(self.identity, request).await
    }

    /// Frame and write a request to another unit on the same link
    pub async fn send_to(&mut self, identity: DeviceIdentity, request: &Request) -> Result<u16> {
        let transaction_id = self.next_transaction_id();
        let frame = encode_adu(transaction_id, identity.unit_id(), request)?;
        debug!("TX [{}] tid={}: {}", identity, transaction_id, hex::encode(&frame));
        self.transport.send(&frame).await?;
        Ok(transaction_id)
    }

    /// Wait for the response to `request` sent under `transaction_id`
    pub async fn recv(&mut self, transaction_id: u16, request: &Request) -> Result<Response> {
        self.recv_from(self.identity, transaction_id, request).await
    }

    pub async fn recv_from(
        &mut self,
        identity: DeviceIdentity,
        transaction_id: u16,
        request: &Request,
    ) -> Result<Response> {
        loop {
            while let Some(adu) = self.pending.pop_front() {
                if let Some(outcome) = self.examine(adu, identity, transaction_id, request).await? {
                    return outcome;
                }
            }
            self.fill().await?;
        }
    }

    /// Send a request and wait for its response within the response timeout
    pub async fn execute(&mut self, request: &Request) -> Result<Response> {
        self.execute_on(self.identity, request).await
    }

    pub async fn execute_on(&mut self, identity: DeviceIdentity, request: &Request) -> Result<Response> {
        let transaction_id = self.send_to(identity, request).await?;
        let wait = self.response_timeout;
        match timeout(wait, self.recv_from(identity, transaction_id, request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "No response from {} for tid={} within {:?}",
                    identity, transaction_id, wait
                );
                Err(NetworkError::Timeout(wait.as_millis() as u64).into())
            },
        }
    }

    /// Read `count` registers from the session's device
    pub async fn read_registers(&mut self, bank: RegisterBank, start: u16, count: u16) -> Result<Vec<u16>> {
        let response = self.execute(&Request::read(bank, start, count)).await?;
        match response.register_updates() {
            Some((_, _, values)) => Ok(values.to_vec()),
            None => Err(DecodeError::UnsupportedFunction(response.function_code()).into()),
        }
    }

    /// Write one holding register after checking it against the whitelist.
    ///
    /// A rejected write never reaches the transport.
    pub async fn write_register(&mut self, address: u16, value: u16) -> Result<Response> {
        let request = validated_write_request(address, value)?;
        info!("Writing HR{}={} on {}", address, value, self.identity);
        self.execute(&request).await
    }

    /// Issue the plant's planned reads and merge every answer into its device cache.
    ///
    /// A failed read is recorded and the refresh moves on; only a broken
    /// connection aborts it.
    pub async fn refresh_plant(&mut self, plant: &mut Plant, complete: bool) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();
        for (identity, kind, request) in plant.refresh_requests(complete) {
            match self.execute_on(identity, &request).await {
                Ok(response) => summary.stored += plant.refresh(identity, kind, &response)?,
                Err(err) if err.needs_reconnect() => return Err(err),
                Err(err) => {
                    warn!("Refresh of {} {} failed: {}", kind, identity, err);
                    summary.failed.push((identity, err));
                },
            }
        }
        debug!(
            "Plant refresh done: {} registers, {} failed reads",
            summary.stored,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Read one chunk from the transport into the assembler
    async fn fill(&mut self) -> Result<()> {
        let mut buffer = [0u8; RESPONSE_BUFFER_SIZE];
        let n = self.transport.recv(&mut buffer).await?;
        if n == 0 {
            return Err(NetworkError::ConnectionClosed.into());
        }
        debug!("RX {}B: {}", n, hex::encode(&buffer[..n]));
        for event in self.assembler.push(&buffer[..n]) {
            match event {
                FrameEvent::Adu(adu) => self.pending.push_back(adu),
                FrameEvent::SyncLoss { discarded } => {
                    warn!("Stream resynchronised, {} bytes discarded", discarded);
                },
            }
        }
        Ok(())
    }

    /// Decide what one received ADU means for the outstanding request.
    ///
    /// `Ok(None)` means the ADU was consumed without answering it.
    async fn examine(
        &mut self,
        adu: Adu,
        identity: DeviceIdentity,
        transaction_id: u16,
        request: &Request,
    ) -> Result<Option<Result<Response>>> {
        let pdu = adu.pdu.as_ref();

        if pdu.first() == Some(&FunctionCode::Heartbeat.as_u8()) {
            self.answer_heartbeat(&adu).await?;
            return Ok(None);
        }

        if adu.transaction_id() != transaction_id || adu.unit_id() != identity.unit_id() {
            debug!(
                "Dropping stale ADU tid={} unit=0x{:02X} (waiting for tid={} unit={})",
                adu.transaction_id(),
                adu.unit_id(),
                transaction_id,
                identity
            );
            return Ok(None);
        }

        let response = match decode_response(request, pdu) {
            Ok(response) => response,
            Err(err) => {
                warn!("Discarding malformed response tid={}: {}", transaction_id, err);
                return Ok(Some(Err(err.into())));
            },
        };

        if let Response::Transparent(transparent) = &response {
            match transparent.reply {
                TransparentReply::Null => {
                    debug!("Ignoring null transparent response tid={}", transaction_id);
                    return Ok(None);
                },
                TransparentReply::Error { function_code, .. } => {
                    return Ok(Some(Err(ModbusError::Exception(ErrorResponse {
                        function_code: function_code & !EXCEPTION_FLAG,
                        exception: ExceptionCode::DeviceFailure,
                    }))));
                },
                _ => {},
            }
        }

        Ok(Some(match response {
            Response::Exception(err) => Err(ModbusError::Exception(err)),
            other => Ok(other),
        }))
    }

    /// Echo a heartbeat back to the adapter unchanged
    async fn answer_heartbeat(&mut self, adu: &Adu) -> Result<()> {
        let response = match decode_unsolicited(&adu.pdu) {
            Ok(response @ Response::Heartbeat(_)) => response,
            Ok(_) | Err(_) => {
                warn!("Malformed heartbeat dropped: {}", hex::encode(&adu.pdu));
                return Ok(());
            },
        };
        let pdu = encode_response(&response)?;
        let frame = Adu::new(adu.transaction_id(), adu.unit_id(), pdu)?.to_bytes();
        debug!("Heartbeat echo: {}", hex::encode(&frame));
        self.transport.send(&frame).await?;
        Ok(())
    }
}
