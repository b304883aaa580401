//! Modbus TCP frame assembly
//!
//! Splits a raw TCP byte stream into ADUs (MBAP header + PDU). A corrupt or
//! misaligned stream is recovered by scanning forward for the next plausible
//! header instead of flushing everything that has been buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::FramerConfig;
use crate::constants::{ADU_HEADER_LEN, EXCEPTION_FLAG, MAX_MBAP_LENGTH, MAX_PDU_SIZE, MIN_MBAP_LENGTH};
use crate::error::{DecodeError, EncodeError};
use crate::pdu::FunctionCode;

/// Bytes needed to judge a header candidate: the MBAP header plus the function code
const CANDIDATE_LEN: usize = ADU_HEADER_LEN + 1;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier, echoed by the device
    pub transaction_id: u16,
    /// Protocol identifier (always 0)
    pub protocol_id: u16,
    /// Byte count of the unit id plus PDU
    pub length: u16,
    /// Unit identifier (slave ID)
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8, pdu_length: u16) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: pdu_length.saturating_add(1),
            unit_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; ADU_HEADER_LEN] {
        let tid = self.transaction_id.to_be_bytes();
        let pid = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [tid[0], tid[1], pid[0], pid[1], len[0], len[1], self.unit_id]
    }

    /// Read a header from the first 7 bytes without validating it
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ADU_HEADER_LEN {
            return None;
        }
        Some(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }

    /// Check protocol id and bound the length field.
    /// `max_length` counts the unit id byte plus the PDU.
    pub fn is_plausible(&self, max_length: usize) -> bool {
        let length = self.length as usize;
        self.protocol_id == 0 && (MIN_MBAP_LENGTH..=max_length).contains(&length)
    }

    /// PDU length (length field minus the unit id byte)
    pub fn pdu_length(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    /// Total frame length including the header
    pub fn frame_length(&self) -> usize {
        ADU_HEADER_LEN + self.pdu_length()
    }
}

/// One complete application data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adu {
    pub header: MbapHeader,
    pub pdu: Bytes,
}

impl Adu {
    pub fn new(transaction_id: u16, unit_id: u8, pdu: impl Into<Bytes>) -> Result<Self, EncodeError> {
        let pdu = pdu.into();
        if pdu.is_empty() || pdu.len() > MAX_PDU_SIZE {
            return Err(EncodeError::PduTooLarge(pdu.len()));
        }
        Ok(Self {
            header: MbapHeader::new(transaction_id, unit_id, pdu.len() as u16),
            pdu,
        })
    }

    /// Parse exactly one complete ADU
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let header = MbapHeader::parse(data).ok_or(DecodeError::Truncated {
            context: "MBAP header",
            needed: ADU_HEADER_LEN,
            available: data.len(),
        })?;
        if !header.is_plausible(MAX_MBAP_LENGTH) {
            return Err(DecodeError::InvalidHeader(format!(
                "protocol_id={}, length={}",
                header.protocol_id, header.length
            )));
        }
        let frame_length = header.frame_length();
        if data.len() < frame_length {
            return Err(DecodeError::Truncated {
                context: "ADU body",
                needed: frame_length,
                available: data.len(),
            });
        }
        if data.len() > frame_length {
            return Err(DecodeError::TrailingBytes(data.len() - frame_length));
        }
        Ok(Self {
            header,
            pdu: Bytes::copy_from_slice(&data[ADU_HEADER_LEN..]),
        })
    }

    pub fn transaction_id(&self) -> u16 {
        self.header.transaction_id
    }

    pub fn unit_id(&self) -> u8 {
        self.header.unit_id
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.header.frame_length());
        frame.put_slice(&self.header.to_bytes());
        frame.put_slice(&self.pdu);
        frame.freeze()
    }
}

/// Output of the frame assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete ADU
    Adu(Adu),
    /// Bytes dropped while looking for the next header
    SyncLoss { discarded: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    AwaitingHeader,
    AwaitingBody(MbapHeader),
}

enum Resync {
    Found(usize),
    Exhausted(usize),
    NeedMore,
}

/// Incremental ADU assembler
///
/// Chunks of any size can be pushed; incomplete trailing bytes are retained
/// for the next call. Dropping a partially read frame between pushes is safe,
/// the state always reflects exactly what is buffered.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    state: AssemblerState,
    /// Upper bound for the MBAP length field
    max_length: usize,
    max_resync_scan: usize,
    sync_losses: u64,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(&FramerConfig::default())
    }
}

impl FrameAssembler {
    pub fn new(config: &FramerConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(config.max_pdu_len + ADU_HEADER_LEN),
            state: AssemblerState::AwaitingHeader,
            max_length: config.max_pdu_len + 1,
            max_resync_scan: config.max_resync_scan.max(1),
            sync_losses: 0,
        }
    }

    /// Feed bytes, returning every event completed by them in stream order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<FrameEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            match self.state {
                AssemblerState::AwaitingHeader => {
                    if self.buffer.len() < CANDIDATE_LEN {
                        break;
                    }
                    if let Some(header) = self.plausible_header_at(0) {
                        trace!(
                            "MBAP header: trans_id={:04X}, length={}, unit_id={:02X}",
                            header.transaction_id,
                            header.length,
                            header.unit_id
                        );
                        self.state = AssemblerState::AwaitingBody(header);
                        continue;
                    }
                    let discarded = match self.resync() {
                        Resync::Found(offset) => offset,
                        Resync::Exhausted(scanned) => scanned,
                        Resync::NeedMore => break,
                    };
                    warn!(
                        "Frame sync lost, discarding {} bytes: {}",
                        discarded,
                        hex::encode(&self.buffer[..discarded])
                    );
                    self.buffer.advance(discarded);
                    self.sync_losses += 1;
                    events.push(FrameEvent::SyncLoss { discarded });
                },
                AssemblerState::AwaitingBody(header) => {
                    let frame_length = header.frame_length();
                    if self.buffer.len() < frame_length {
                        break;
                    }
                    let mut frame = self.buffer.split_to(frame_length);
                    frame.advance(ADU_HEADER_LEN);
                    let pdu = frame.freeze();
                    debug!(
                        "ADU complete: trans_id={:04X}, unit_id={:02X}, pdu={}",
                        header.transaction_id,
                        header.unit_id,
                        hex::encode(&pdu)
                    );
                    events.push(FrameEvent::Adu(Adu { header, pdu }));
                    self.state = AssemblerState::AwaitingHeader;
                },
            }
        }

        events
    }

    /// A candidate needs a bounded length, a non-zero unit id and a known
    /// function code (with or without the exception bit) right after it.
    /// Runs of zero bytes would otherwise pass as headers.
    fn plausible_header_at(&self, offset: usize) -> Option<MbapHeader> {
        let candidate = self.buffer.get(offset..offset + CANDIDATE_LEN)?;
        let header = MbapHeader::parse(candidate)?;
        let function_code = candidate[ADU_HEADER_LEN] & !EXCEPTION_FLAG;
        let accepted = header.is_plausible(self.max_length)
            && header.unit_id != 0
            && FunctionCode::from_u8(function_code).is_some();
        accepted.then_some(header)
    }

    fn resync(&self) -> Resync {
        for offset in 1..=self.max_resync_scan {
            if offset + CANDIDATE_LEN > self.buffer.len() {
                return Resync::NeedMore;
            }
            if self.plausible_header_at(offset).is_some() {
                return Resync::Found(offset);
            }
        }
        Resync::Exhausted(self.max_resync_scan)
    }

    /// Number of bytes held for the next push
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True while a header has been accepted but its body is incomplete
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, AssemblerState::AwaitingBody(_))
    }

    /// Total sync-loss events since creation
    pub fn sync_losses(&self) -> u64 {
        self.sync_losses
    }

    /// Drop all buffered state, e.g. when the connection is reopened
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = AssemblerState::AwaitingHeader;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn read_holding_frame(transaction_id: u16) -> Vec<u8> {
        let mut frame = transaction_id.to_be_bytes().to_vec();
        frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x10]);
        frame
    }

    fn adus(events: &[FrameEvent]) -> Vec<&Adu> {
        events
            .iter()
            .filter_map(|event| match event {
                FrameEvent::Adu(adu) => Some(adu),
                FrameEvent::SyncLoss { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_header_round_trip() {
        let header = MbapHeader::new(0x1234, 0x11, 5);
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x11]);
        assert_eq!(MbapHeader::parse(&bytes), Some(header));
        assert_eq!(header.pdu_length(), 5);
        assert_eq!(header.frame_length(), 12);
    }

    #[test]
    fn test_header_plausibility() {
        assert!(MbapHeader::new(1, 1, 1).is_plausible(254));
        assert!(!MbapHeader::new(1, 1, 0).is_plausible(254));
        assert!(!MbapHeader::new(1, 1, 254).is_plausible(254));

        let mut header = MbapHeader::new(1, 1, 4);
        header.protocol_id = 1;
        assert!(!header.is_plausible(254));
    }

    #[test]
    fn test_single_frame() {
        let mut assembler = FrameAssembler::default();
        let events = assembler.push(&read_holding_frame(1));
        assert_eq!(events.len(), 1);
        let adu = adus(&events)[0];
        assert_eq!(adu.transaction_id(), 1);
        assert_eq!(adu.unit_id(), 1);
        assert_eq!(&adu.pdu[..], &[0x03, 0x02, 0x00, 0x10]);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_empty_chunk() {
        let mut assembler = FrameAssembler::default();
        assert!(assembler.push(&[]).is_empty());
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut assembler = FrameAssembler::default();
        let frame = read_holding_frame(7);
        let mut events = Vec::new();
        for byte in &frame {
            events.extend(assembler.push(std::slice::from_ref(byte)));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(adus(&events)[0].transaction_id(), 7);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk_keep_order() {
        let mut assembler = FrameAssembler::default();
        let mut stream = read_holding_frame(1);
        stream.extend(read_holding_frame(2));
        stream.extend(&read_holding_frame(3)[..4]);

        let events = assembler.push(&stream);
        let ids: Vec<u16> = adus(&events).iter().map(|a| a.transaction_id()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(assembler.buffered(), 4);

        let events = assembler.push(&read_holding_frame(3)[4..]);
        assert_eq!(adus(&events)[0].transaction_id(), 3);
    }

    #[test]
    fn test_incomplete_body_is_held() {
        let mut assembler = FrameAssembler::default();
        // length=10 declares 9 PDU bytes, only 6 follow
        let mut stream = vec![0x00, 0x09, 0x00, 0x00, 0x00, 0x0A, 0x11];
        stream.extend_from_slice(&[0x04, 0x0C, 0x00, 0x01, 0x00, 0x02]);

        assert!(assembler.push(&stream).is_empty());
        assert!(assembler.is_mid_frame());
        assert_eq!(assembler.buffered(), 13);

        let events = assembler.push(&[0x00, 0x03, 0x00]);
        assert_eq!(events.len(), 1);
        assert_eq!(adus(&events)[0].pdu.len(), 9);
        assert!(!assembler.is_mid_frame());
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut assembler = FrameAssembler::default();
        let mut stream = vec![0xFF; 13];
        stream.extend(read_holding_frame(1));

        let events = assembler.push(&stream);
        assert_eq!(
            events,
            vec![
                FrameEvent::SyncLoss { discarded: 13 },
                FrameEvent::Adu(Adu::from_bytes(&read_holding_frame(1)).unwrap()),
            ]
        );
        assert_eq!(assembler.sync_losses(), 1);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_resync_waits_for_more_bytes() {
        let mut assembler = FrameAssembler::default();
        // Invalid protocol id, nothing else to scan yet
        assert!(assembler
            .push(&[0x00, 0x01, 0x12, 0x34, 0x00, 0x05, 0x01, 0xAA])
            .is_empty());
        assert_eq!(assembler.buffered(), 8);

        let events = assembler.push(&read_holding_frame(9));
        assert_eq!(events[0], FrameEvent::SyncLoss { discarded: 8 });
        assert_eq!(adus(&events)[0].transaction_id(), 9);
    }

    #[test]
    fn test_oversized_length_triggers_resync() {
        let mut assembler = FrameAssembler::default();
        let mut stream = vec![0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01];
        stream.extend(read_holding_frame(2));
        let events = assembler.push(&stream);
        assert_eq!(events[0], FrameEvent::SyncLoss { discarded: 7 });
        assert_eq!(adus(&events)[0].transaction_id(), 2);
    }

    #[test]
    fn test_scan_exhaustion_drops_only_scanned_prefix() {
        let config = FramerConfig {
            max_pdu_len: MAX_PDU_SIZE,
            max_resync_scan: 8,
        };
        let mut assembler = FrameAssembler::new(&config);
        let events = assembler.push(&[0xEE; 20]);
        assert_eq!(events, vec![FrameEvent::SyncLoss { discarded: 8 }]);
        // 12 bytes remain, too few to finish another 8-byte scan
        assert_eq!(assembler.buffered(), 12);

        let mut tail = vec![0xEE; 3];
        tail.extend(read_holding_frame(4));
        let events = assembler.push(&tail);
        assert_eq!(events.last().map(|e| matches!(e, FrameEvent::Adu(_))), Some(true));
        assert_eq!(adus(&events)[0].transaction_id(), 4);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_reset_clears_partial_frame() {
        let mut assembler = FrameAssembler::default();
        assembler.push(&read_holding_frame(1)[..9]);
        assert!(assembler.is_mid_frame());
        assembler.reset();
        assert_eq!(assembler.buffered(), 0);

        let events = assembler.push(&read_holding_frame(2));
        assert_eq!(adus(&events)[0].transaction_id(), 2);
    }

    #[test]
    fn test_adu_from_bytes_rejects_partial_and_trailing() {
        let frame = read_holding_frame(1);
        assert!(matches!(
            Adu::from_bytes(&frame[..10]),
            Err(DecodeError::Truncated { .. })
        ));
        let mut long = frame.clone();
        long.push(0);
        assert_eq!(Adu::from_bytes(&long), Err(DecodeError::TrailingBytes(1)));

        let adu = Adu::from_bytes(&frame).unwrap();
        assert_eq!(&adu.to_bytes()[..], &frame[..]);
    }

    #[test]
    fn test_zero_garbage_does_not_swallow_frame() {
        let frame = vec![
            0x00, 0x07, 0x00, 0x00, 0x00, 0x09, 0x11, 0x04, 0x06, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03,
        ];
        let mut stream = vec![0x00; 20];
        stream.extend_from_slice(&frame);

        let mut assembler = FrameAssembler::default();
        let events = assembler.push(&stream);
        assert_eq!(
            events,
            vec![
                FrameEvent::SyncLoss { discarded: 20 },
                FrameEvent::Adu(Adu::from_bytes(&frame).unwrap()),
            ]
        );
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_candidate_needs_unit_and_function_code() {
        let mut assembler = FrameAssembler::default();
        // Unit id 0
        assembler.push(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x03]);
        assert!(assembler.plausible_header_at(0).is_none());

        // Unknown function code
        assembler.reset();
        assembler.push(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x11, 0x2B]);
        assert!(assembler.plausible_header_at(0).is_none());

        // Exception reply is a valid candidate
        assembler.reset();
        let events = assembler.push(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x11, 0x83, 0x02]);
        assert_eq!(&adus(&events)[0].pdu[..], &[0x83, 0x02]);
    }

    #[test]
    fn test_header_length_saturates() {
        assert_eq!(MbapHeader::new(1, 1, u16::MAX).length, u16::MAX);
        assert!(!MbapHeader::new(1, 1, u16::MAX).is_plausible(MAX_MBAP_LENGTH));
    }

    #[test]
    fn test_adu_rejects_oversized_pdu() {
        assert_eq!(
            Adu::new(1, 1, vec![0u8; MAX_PDU_SIZE + 1]),
            Err(EncodeError::PduTooLarge(MAX_PDU_SIZE + 1))
        );
    }
}
