//! Wire format of the earbud handover protocol.
//!
//! Every packet on the handover channel starts with a one-byte opcode.
//! Control messages (`START_REQ`, `START_CFM`, `CANCEL_IND`, ...) are fixed
//! layouts. `MARSHAL_DATA` packets carry a sequence of tagged entries:
//!
//! ```text
//! ┌────────┬─────┬───────────┬─────────┬─────┬───────────┬─────────┬──────┐
//! │ 0x80   │ tag │ len (BE)  │ data    │ tag │ len (BE)  │ data    │ 0xFF │
//! │ opcode │ 1B  │ 2B        │ len B   │ ... │           │         │ end  │
//! └────────┴─────┴───────────┴─────────┴─────┴───────────┴─────────┴──────┘
//! ```
//!
//! A tag below the number of registered clients addresses that client's
//! state, `0xEF` carries the opaque baseband blob and `0xFF` ends the
//! current marshal sequence. Packets never exceed the channel MTU; the
//! [`MarshalWriter`] fills each one before claiming the next and the
//! [`MarshalCursor`] walks them back on the receiving side.

pub mod addr;
pub mod codec;
pub mod deadline;
pub mod error;
pub mod opcode;
pub mod reader;
pub mod writer;

pub use addr::{BdAddr, ParseAddrError};
pub use codec::{
    decode_message, encode_message, hex_dump, ProtocolMessage, StartRequest, StartStatus,
    END_PACKET, ENTRY_HEADER_LEN, MARSHAL_HEADER_LEN, START_CFM_LEN, START_REQ_LEN,
};
pub use deadline::poll_until;
pub use error::{FrameError, Result};
pub use opcode::{
    opcode_name, CANCEL_IND, END_TAG, MARSHAL_DATA, P0_TAG, START_CFM, START_REQ,
    UNMARSHAL_COMPLETE_IND, UNMARSHAL_P1_CFM,
};
pub use reader::{wait_for_packet, MarshalCursor, MarshalEntry};
pub use writer::{claim_space, send_message, MarshalProgress, MarshalWriter, WriterStats};
