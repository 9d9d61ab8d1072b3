//! Modbus Frame Processing
//!
//! Pure builders and parsers for the two framings used on the socket:
//! Modbus-TCP (MBAP header + PDU) and RTU tunneled over TCP
//! (unit id + PDU + CRC16). Nothing here touches I/O.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use super::constants::{
    CRC_LEN, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_MBAP_LENGTH, MAX_READ_REGISTERS,
    MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID, READ_REQUEST_PDU_LEN,
};
use crate::error::{RegsrvError, Result};

/// A validated "read holding registers" request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub unit_id: u8,
    pub start_address: u16,
    pub count: u16,
}

impl ReadRequest {
    /// Validate and build a request; `count` must be 1..=125
    pub fn new(unit_id: u8, start_address: u16, count: u16) -> Result<Self> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(RegsrvError::invalid_parameter(format!(
                "register count {} out of range (1-{})",
                count, MAX_READ_REGISTERS
            )));
        }
        Ok(Self {
            unit_id,
            start_address,
            count,
        })
    }

    /// Function code + start + count, big-endian
    pub fn pdu(&self) -> [u8; READ_REQUEST_PDU_LEN] {
        let start = self.start_address.to_be_bytes();
        let count = self.count.to_be_bytes();
        [
            FC_READ_HOLDING_REGISTERS,
            start[0],
            start[1],
            count[0],
            count[1],
        ]
    }

    /// Bytes of register data in a successful reply
    pub fn data_len(&self) -> usize {
        self.count as usize * 2
    }
}

/// Framing variant selector for the mode-agnostic entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Tcp { transaction_id: u16 },
    Rtu,
}

/// MBAP (Modbus Application Protocol) header for TCP mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16, // Always 0 for Modbus
    pub length: u16,      // Byte count of following fields (unit id + PDU)
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8, pdu_length: u16) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: pdu_length + 1,
            unit_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; MBAP_HEADER_LEN] {
        let tid = self.transaction_id.to_be_bytes();
        let pid = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [tid[0], tid[1], pid[0], pid[1], len[0], len[1], self.unit_id]
    }

    /// Decode the 7 header bytes. Field values are not validated here so the
    /// caller can still resynchronize on a bad header.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MBAP_HEADER_LEN {
            return Err(RegsrvError::malformed(format!(
                "MBAP header needs {} bytes, got {}",
                MBAP_HEADER_LEN,
                data.len()
            )));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }

    /// Bytes that follow the header on the wire (the PDU)
    pub fn remaining(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    /// PDU length, rejecting headers that cannot carry a reply
    pub fn pdu_length(&self) -> Result<usize> {
        if self.length < 2 || self.length > MAX_MBAP_LENGTH {
            return Err(RegsrvError::malformed(format!(
                "MBAP length {} out of range (2-{})",
                self.length, MAX_MBAP_LENGTH
            )));
        }
        Ok(self.remaining())
    }
}

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF), table driven
pub fn crc16(data: &[u8]) -> u16 {
    const CRC_TABLE: [u16; 256] = [
        0x0000, 0xC0C1, 0xC181, 0x0140, 0xC301, 0x03C0, 0x0280, 0xC241, 0xC601, 0x06C0, 0x0780,
        0xC741, 0x0500, 0xC5C1, 0xC481, 0x0440, 0xCC01, 0x0CC0, 0x0D80, 0xCD41, 0x0F00, 0xCFC1,
        0xCE81, 0x0E40, 0x0A00, 0xCAC1, 0xCB81, 0x0B40, 0xC901, 0x09C0, 0x0880, 0xC841, 0xD801,
        0x18C0, 0x1980, 0xD941, 0x1B00, 0xDBC1, 0xDA81, 0x1A40, 0x1E00, 0xDEC1, 0xDF81, 0x1F40,
        0xDD01, 0x1DC0, 0x1C80, 0xDC41, 0x1400, 0xD4C1, 0xD581, 0x1540, 0xD701, 0x17C0, 0x1680,
        0xD641, 0xD201, 0x12C0, 0x1380, 0xD341, 0x1100, 0xD1C1, 0xD081, 0x1040, 0xF001, 0x30C0,
        0x3180, 0xF141, 0x3300, 0xF3C1, 0xF281, 0x3240, 0x3600, 0xF6C1, 0xF781, 0x3740, 0xF501,
        0x35C0, 0x3480, 0xF441, 0x3C00, 0xFCC1, 0xFD81, 0x3D40, 0xFF01, 0x3FC0, 0x3E80, 0xFE41,
        0xFA01, 0x3AC0, 0x3B80, 0xFB41, 0x3900, 0xF9C1, 0xF881, 0x3840, 0x2800, 0xE8C1, 0xE981,
        0x2940, 0xEB01, 0x2BC0, 0x2A80, 0xEA41, 0xEE01, 0x2EC0, 0x2F80, 0xEF41, 0x2D00, 0xEDC1,
        0xEC81, 0x2C40, 0xE401, 0x24C0, 0x2580, 0xE541, 0x2700, 0xE7C1, 0xE681, 0x2640, 0x2200,
        0xE2C1, 0xE381, 0x2340, 0xE101, 0x21C0, 0x2080, 0xE041, 0xA001, 0x60C0, 0x6180, 0xA141,
        0x6300, 0xA3C1, 0xA281, 0x6240, 0x6600, 0xA6C1, 0xA781, 0x6740, 0xA501, 0x65C0, 0x6480,
        0xA441, 0x6C00, 0xACC1, 0xAD81, 0x6D40, 0xAF01, 0x6FC0, 0x6E80, 0xAE41, 0xAA01, 0x6AC0,
        0x6B80, 0xAB41, 0x6900, 0xA9C1, 0xA881, 0x6840, 0x7800, 0xB8C1, 0xB981, 0x7940, 0xBB01,
        0x7BC0, 0x7A80, 0xBA41, 0xBE01, 0x7EC0, 0x7F80, 0xBF41, 0x7D00, 0xBDC1, 0xBC81, 0x7C40,
        0xB401, 0x74C0, 0x7580, 0xB541, 0x7700, 0xB7C1, 0xB681, 0x7640, 0x7200, 0xB2C1, 0xB381,
        0x7340, 0xB101, 0x71C0, 0x7080, 0xB041, 0x5000, 0x90C1, 0x9181, 0x5140, 0x9301, 0x53C0,
        0x5280, 0x9241, 0x9601, 0x56C0, 0x5780, 0x9741, 0x5500, 0x95C1, 0x9481, 0x5440, 0x9C01,
        0x5CC0, 0x5D80, 0x9D41, 0x5F00, 0x9FC1, 0x9E81, 0x5E40, 0x5A00, 0x9AC1, 0x9B81, 0x5B40,
        0x9901, 0x59C0, 0x5880, 0x9841, 0x8801, 0x48C0, 0x4980, 0x8941, 0x4B00, 0x8BC1, 0x8A81,
        0x4A40, 0x4E00, 0x8EC1, 0x8F81, 0x4F40, 0x8D01, 0x4DC0, 0x4C80, 0x8C41, 0x4400, 0x84C1,
        0x8581, 0x4540, 0x8701, 0x47C0, 0x4680, 0x8641, 0x8201, 0x42C0, 0x4380, 0x8341, 0x4100,
        0x81C1, 0x8081, 0x4040,
    ];

    let mut crc = 0xFFFFu16;
    for &byte in data {
        let table_index = ((crc ^ byte as u16) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC_TABLE[table_index];
    }
    crc
}

/// MBAP header + read PDU
fn build_tcp_request(transaction_id: u16, request: &ReadRequest) -> Bytes {
    let header = MbapHeader::new(transaction_id, request.unit_id, READ_REQUEST_PDU_LEN as u16);
    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + READ_REQUEST_PDU_LEN);
    buf.put_slice(&header.to_bytes());
    buf.put_slice(&request.pdu());
    buf.freeze()
}

/// Unit id + read PDU + CRC16 little-endian
fn build_rtu_request(request: &ReadRequest) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + READ_REQUEST_PDU_LEN + CRC_LEN);
    buf.put_u8(request.unit_id);
    buf.put_slice(&request.pdu());
    let crc = crc16(&buf);
    buf.put_u16_le(crc);
    buf.freeze()
}

/// Encode an already validated request in the given framing
pub fn encode_request(framing: Framing, request: &ReadRequest) -> Bytes {
    match framing {
        Framing::Tcp { transaction_id } => build_tcp_request(transaction_id, request),
        Framing::Rtu => build_rtu_request(request),
    }
}

/// Validate the window and build a request frame in the given framing
pub fn build_read_holding_registers(
    framing: Framing,
    unit_id: u8,
    start_address: u16,
    count: u16,
) -> Result<Bytes> {
    let request = ReadRequest::new(unit_id, start_address, count)?;
    Ok(encode_request(framing, &request))
}

/// Parse a complete response frame in the given framing
pub fn parse_response(framing: Framing, frame: &[u8], request: &ReadRequest) -> Result<Vec<u16>> {
    match framing {
        Framing::Tcp { transaction_id } => parse_tcp_response(frame, request, transaction_id),
        Framing::Rtu => parse_rtu_response(frame, request),
    }
}

/// Parse a complete Modbus-TCP response (header + PDU)
fn parse_tcp_response(
    frame: &[u8],
    request: &ReadRequest,
    expected_transaction_id: u16,
) -> Result<Vec<u16>> {
    let header = MbapHeader::from_bytes(frame)?;
    if header.transaction_id != expected_transaction_id {
        return Err(RegsrvError::TransactionMismatch {
            expected: expected_transaction_id,
            received: header.transaction_id,
        });
    }
    if header.protocol_id != MODBUS_PROTOCOL_ID {
        return Err(RegsrvError::malformed(format!(
            "invalid protocol id {}",
            header.protocol_id
        )));
    }
    let pdu_len = header.pdu_length()?;
    let pdu = &frame[MBAP_HEADER_LEN..];
    if pdu.len() != pdu_len {
        return Err(RegsrvError::malformed(format!(
            "MBAP length announces {} PDU bytes, frame carries {}",
            pdu_len,
            pdu.len()
        )));
    }
    check_unit(request.unit_id, header.unit_id);
    parse_pdu(pdu, request)
}

/// Parse a complete RTU response (unit + PDU + CRC). The CRC is checked first.
fn parse_rtu_response(frame: &[u8], request: &ReadRequest) -> Result<Vec<u16>> {
    // Shortest valid reply is an exception: unit + fc + code + crc
    if frame.len() < 3 + CRC_LEN {
        return Err(RegsrvError::malformed(format!(
            "RTU frame too short: {} bytes",
            frame.len()
        )));
    }
    let body_end = frame.len() - CRC_LEN;
    let received = u16::from_le_bytes([frame[body_end], frame[body_end + 1]]);
    let calculated = crc16(&frame[..body_end]);
    if received != calculated {
        return Err(RegsrvError::ChecksumError {
            received,
            calculated,
        });
    }
    check_unit(request.unit_id, frame[0]);
    parse_pdu(&frame[1..body_end], request)
}

/// Decode a response PDU: exception, function check, byte count, registers
pub fn parse_pdu(pdu: &[u8], request: &ReadRequest) -> Result<Vec<u16>> {
    let Some(&function_code) = pdu.first() else {
        return Err(RegsrvError::malformed("empty PDU"));
    };

    if function_code & EXCEPTION_FLAG != 0 {
        return match pdu.get(1) {
            Some(&code) => Err(RegsrvError::DeviceException { code }),
            None => Err(RegsrvError::malformed("exception reply without exception code")),
        };
    }

    if function_code != FC_READ_HOLDING_REGISTERS {
        return Err(RegsrvError::UnexpectedFunctionCode {
            expected: FC_READ_HOLDING_REGISTERS,
            received: function_code,
        });
    }

    let Some(&byte_count) = pdu.get(1) else {
        return Err(RegsrvError::malformed("missing byte count"));
    };
    let data = &pdu[2..];
    if byte_count as usize != data.len() {
        return Err(RegsrvError::malformed(format!(
            "byte count {} does not match {} data bytes",
            byte_count,
            data.len()
        )));
    }
    if data.len() != request.data_len() {
        return Err(RegsrvError::malformed(format!(
            "byte count {} does not match {} requested registers",
            byte_count, request.count
        )));
    }

    parse_registers(data, request.count)
}

/// Decode big-endian unsigned 16-bit registers
pub fn parse_registers(payload: &[u8], count: u16) -> Result<Vec<u16>> {
    if payload.len() != count as usize * 2 {
        return Err(RegsrvError::malformed(format!(
            "expected {} register bytes, got {}",
            count as usize * 2,
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

// Gateways commonly rewrite the unit id, so a mismatch is only reported
fn check_unit(expected: u8, received: u8) {
    if expected != received {
        warn!(expected, received, "Response unit id mismatch, accepting reply");
    }
}
