//! Modbus protocol constants

/// Read Holding Registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// High bit set on the function code of an exception reply
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Maximum registers per read request
pub const MAX_READ_REGISTERS: u16 = 125;

/// MBAP header size: transaction(2) + protocol(2) + length(2) + unit(1)
pub const MBAP_HEADER_LEN: usize = 7;

/// Modbus-TCP protocol identifier
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Maximum PDU size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field (PDU + unit id)
pub const MAX_MBAP_LENGTH: u16 = MAX_PDU_SIZE as u16 + 1;

/// Read request PDU: function(1) + start(2) + count(2)
pub const READ_REQUEST_PDU_LEN: usize = 5;

/// RTU CRC trailer size
pub const CRC_LEN: usize = 2;

/// Human readable name for a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
