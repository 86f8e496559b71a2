use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::addr::BdAddr;
use crate::error::{FrameError, Result};
use crate::opcode::{
    CANCEL_IND, END_TAG, MARSHAL_DATA, START_CFM, START_REQ, UNMARSHAL_COMPLETE_IND,
    UNMARSHAL_P1_CFM,
};

/// START_REQ: opcode, session, tx seq, rx seq, mirror state (2), handset count, address (6).
pub const START_REQ_LEN: usize = 13;

/// START_CFM: opcode, session, status.
pub const START_CFM_LEN: usize = 3;

/// Entry header inside a marshal packet: tag (1) + big-endian length (2).
pub const ENTRY_HEADER_LEN: usize = 3;

/// Opcode plus one entry header.
pub const MARSHAL_HEADER_LEN: usize = 1 + ENTRY_HEADER_LEN;

/// Packet that carries nothing but the end of a marshal sequence.
pub const END_PACKET: [u8; 2] = [MARSHAL_DATA, END_TAG];

const MAX_DUMP_BYTES: usize = 64;

/// Outcome carried by a START_CFM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    Success,
    Vetoed,
}

impl StartStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            StartStatus::Success => 0,
            StartStatus::Vetoed => 1,
        }
    }

    /// Anything other than success is treated as a veto.
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            StartStatus::Success
        } else {
            StartStatus::Vetoed
        }
    }
}

/// Body of a START_REQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub session_id: u8,
    /// Last signalling sequence number the primary transmitted.
    pub last_tx_seq: u8,
    /// Last signalling sequence number the primary received.
    pub last_rx_seq: u8,
    /// Snapshot of the mirroring link/audio state.
    pub mirror_state: u16,
    pub num_handsets: u8,
    pub handset_addr: BdAddr,
}

/// A decoded handover protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    StartReq(StartRequest),
    StartCfm { session_id: u8, status: StartStatus },
    CancelInd,
    UnmarshalP1Cfm,
    UnmarshalCompleteInd,
    /// Marshal entries following the opcode.
    MarshalData(Bytes),
}

impl ProtocolMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            ProtocolMessage::StartReq(_) => START_REQ,
            ProtocolMessage::StartCfm { .. } => START_CFM,
            ProtocolMessage::CancelInd => CANCEL_IND,
            ProtocolMessage::UnmarshalP1Cfm => UNMARSHAL_P1_CFM,
            ProtocolMessage::UnmarshalCompleteInd => UNMARSHAL_COMPLETE_IND,
            ProtocolMessage::MarshalData(_) => MARSHAL_DATA,
        }
    }

    /// The total wire size of this message.
    pub fn wire_size(&self) -> usize {
        match self {
            ProtocolMessage::StartReq(_) => START_REQ_LEN,
            ProtocolMessage::StartCfm { .. } => START_CFM_LEN,
            ProtocolMessage::MarshalData(payload) => 1 + payload.len(),
            _ => 1,
        }
    }
}

/// Encode a message into its wire format.
///
/// Multi-byte fields are big-endian.
pub fn encode_message(msg: &ProtocolMessage, dst: &mut BytesMut) {
    dst.reserve(msg.wire_size());
    dst.put_u8(msg.opcode());
    match msg {
        ProtocolMessage::StartReq(req) => {
            dst.put_u8(req.session_id);
            dst.put_u8(req.last_tx_seq);
            dst.put_u8(req.last_rx_seq);
            dst.put_u16(req.mirror_state);
            dst.put_u8(req.num_handsets);
            dst.put_slice(req.handset_addr.as_bytes());
        }
        ProtocolMessage::StartCfm { session_id, status } => {
            dst.put_u8(*session_id);
            dst.put_u8(status.as_u8());
        }
        ProtocolMessage::MarshalData(payload) => dst.put_slice(payload),
        ProtocolMessage::CancelInd
        | ProtocolMessage::UnmarshalP1Cfm
        | ProtocolMessage::UnmarshalCompleteInd => {}
    }
}

/// Decode one packet.
///
/// A START_REQ must be exactly [`START_REQ_LEN`] bytes. A START_CFM must be at
/// least [`START_CFM_LEN`] bytes; trailing bytes are ignored.
pub fn decode_message(packet: &Bytes) -> Result<ProtocolMessage> {
    let Some(&opcode) = packet.first() else {
        return Err(FrameError::Truncated {
            needed: 1,
            available: 0,
        });
    };

    match opcode {
        START_REQ => {
            if packet.len() != START_REQ_LEN {
                return Err(FrameError::InvalidLength {
                    what: "START_REQ",
                    expected: START_REQ_LEN,
                    actual: packet.len(),
                });
            }
            let mut body = &packet[1..];
            let session_id = body.get_u8();
            let last_tx_seq = body.get_u8();
            let last_rx_seq = body.get_u8();
            let mirror_state = body.get_u16();
            let num_handsets = body.get_u8();
            let handset_addr = BdAddr::from_slice(body).ok_or(FrameError::Truncated {
                needed: BdAddr::LEN,
                available: body.len(),
            })?;
            Ok(ProtocolMessage::StartReq(StartRequest {
                session_id,
                last_tx_seq,
                last_rx_seq,
                mirror_state,
                num_handsets,
                handset_addr,
            }))
        }
        START_CFM => {
            if packet.len() < START_CFM_LEN {
                return Err(FrameError::Truncated {
                    needed: START_CFM_LEN,
                    available: packet.len(),
                });
            }
            Ok(ProtocolMessage::StartCfm {
                session_id: packet[1],
                status: StartStatus::from_u8(packet[2]),
            })
        }
        CANCEL_IND => Ok(ProtocolMessage::CancelInd),
        UNMARSHAL_P1_CFM => Ok(ProtocolMessage::UnmarshalP1Cfm),
        UNMARSHAL_COMPLETE_IND => Ok(ProtocolMessage::UnmarshalCompleteInd),
        MARSHAL_DATA => Ok(ProtocolMessage::MarshalData(packet.slice(1..))),
        other => Err(FrameError::UnknownOpcode(other)),
    }
}

/// Lowercase hex rendering of a packet for logs, cut off after 64 bytes.
pub fn hex_dump(packet: &[u8]) -> String {
    if packet.len() <= MAX_DUMP_BYTES {
        hex::encode(packet)
    } else {
        format!(
            "{}...({} bytes)",
            hex::encode(&packet[..MAX_DUMP_BYTES]),
            packet.len()
        )
    }
}
