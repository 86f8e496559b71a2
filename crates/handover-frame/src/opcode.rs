//! Opcodes and marshal tags.
//!
//! The opcode is the first byte of every packet on the handover channel.
//! Marshal tags are the first byte of every entry inside a `MARSHAL_DATA`
//! packet.

/// Primary asks the secondary to start a handover.
pub const START_REQ: u8 = 0x00;

/// Secondary accepts or vetoes a start request.
pub const START_CFM: u8 = 0x01;

/// Primary abandons the handover in progress.
pub const CANCEL_IND: u8 = 0x02;

/// Secondary has applied every P1 client's state.
pub const UNMARSHAL_P1_CFM: u8 = 0x03;

/// Reserved. Decoded but never sent.
pub const UNMARSHAL_COMPLETE_IND: u8 = 0x04;

/// Marshalled client or baseband state follows.
pub const MARSHAL_DATA: u8 = 0x80;

/// Marshal entry carrying the opaque baseband blob.
pub const P0_TAG: u8 = 0xEF;

/// Terminates the current marshal sequence. No length follows.
pub const END_TAG: u8 = 0xFF;

/// Returns a human-readable name for an opcode.
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        START_REQ => "START_REQ",
        START_CFM => "START_CFM",
        CANCEL_IND => "CANCEL_IND",
        UNMARSHAL_P1_CFM => "UNMARSHAL_P1_CFM",
        UNMARSHAL_COMPLETE_IND => "UNMARSHAL_COMPLETE_IND",
        MARSHAL_DATA => "MARSHAL_DATA",
        _ => "UNKNOWN",
    }
}

/// Returns true if the opcode is part of the protocol.
pub fn is_known(opcode: u8) -> bool {
    opcode_name(opcode) != "UNKNOWN"
}
