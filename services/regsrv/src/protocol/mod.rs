//! Modbus wire protocol: constants and the pure frame codec

pub mod constants;
pub mod frame;

pub use frame::{
    build_read_holding_registers, crc16, encode_request, parse_pdu, parse_registers,
    parse_response, Framing, MbapHeader, ReadRequest,
};
