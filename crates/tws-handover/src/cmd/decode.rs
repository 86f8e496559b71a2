use bytes::Bytes;
use handover_frame::{
    decode_message, opcode_name, FrameError, MarshalCursor, MarshalEntry, ProtocolMessage,
    StartStatus,
};
use serde::Serialize;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum EntryOutput {
    Client { id: u8, len: usize },
    P0 { len: usize },
    End,
}

impl EntryOutput {
    fn label(&self) -> String {
        match self {
            EntryOutput::Client { id, len } => format!("client[{id}] {len}B"),
            EntryOutput::P0 { len } => format!("p0 {len}B"),
            EntryOutput::End => "end".to_string(),
        }
    }
}

#[derive(Serialize, Debug)]
struct PacketOutput {
    index: usize,
    opcode: &'static str,
    len: usize,
    summary: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entries: Vec<EntryOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut decoded = Vec::with_capacity(args.packets.len());
    for (index, text) in args.packets.iter().enumerate() {
        let packet = parse_hex(text)?;
        decoded.push(describe(index, &packet, args.clients));
    }

    let failed = decoded.iter().any(|packet| packet.error.is_some());
    print_packets(&decoded, format);
    Ok(if failed { DATA_INVALID } else { SUCCESS })
}

fn parse_hex(text: &str) -> CliResult<Bytes> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = body
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ':' | '-' | '_'))
        .collect();
    if digits.is_empty() {
        return Err(CliError::new(DATA_INVALID, "empty packet"));
    }
    hex::decode(&digits)
        .map(Bytes::from)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex {text:?}: {err}")))
}

fn describe(index: usize, packet: &Bytes, clients: usize) -> PacketOutput {
    let opcode = packet.first().map_or("EMPTY", |&op| opcode_name(op));
    let mut out = PacketOutput {
        index,
        opcode,
        len: packet.len(),
        summary: String::new(),
        entries: Vec::new(),
        error: None,
    };

    match decode_message(packet) {
        Ok(ProtocolMessage::StartReq(req)) => {
            out.summary = format!(
                "session={} tx_seq={} rx_seq={} mirror=0x{:04x} handsets={} handset={}",
                req.session_id,
                req.last_tx_seq,
                req.last_rx_seq,
                req.mirror_state,
                req.num_handsets,
                req.handset_addr
            );
        }
        Ok(ProtocolMessage::StartCfm { session_id, status }) => {
            let status = match status {
                StartStatus::Success => "success",
                StartStatus::Vetoed => "vetoed",
            };
            out.summary = format!("session={session_id} status={status}");
        }
        Ok(ProtocolMessage::MarshalData(payload)) => match walk(payload, clients) {
            Ok(entries) => {
                out.summary = entries
                    .iter()
                    .map(EntryOutput::label)
                    .collect::<Vec<_>>()
                    .join(", ");
                out.entries = entries;
            }
            Err((entries, err)) => {
                out.entries = entries;
                out.error = Some(frame_error("marshal data", err).message);
            }
        },
        Ok(_) => {}
        Err(err) => out.error = Some(frame_error("decode", err).message),
    }
    out
}

type Walked = Result<Vec<EntryOutput>, (Vec<EntryOutput>, FrameError)>;

/// Entries of a marshal payload, or the ones read before the first bad one.
fn walk(payload: Bytes, clients: usize) -> Walked {
    let mut cursor = MarshalCursor::new(payload, clients);
    let mut entries = Vec::new();
    loop {
        match cursor.next_entry() {
            Ok(None) => return Ok(entries),
            Ok(Some(MarshalEntry::Client { id, data })) => {
                entries.push(EntryOutput::Client {
                    id,
                    len: data.len(),
                });
            }
            Ok(Some(MarshalEntry::P0(data))) => entries.push(EntryOutput::P0 { len: data.len() }),
            Ok(Some(MarshalEntry::End)) => {
                entries.push(EntryOutput::End);
                if cursor.remaining() != 0 {
                    let trailing = cursor.remaining();
                    return Err((
                        entries,
                        FrameError::InvalidLength {
                            what: "MARSHAL_DATA",
                            expected: cursor.consumed(),
                            actual: cursor.consumed() + trailing,
                        },
                    ));
                }
                return Ok(entries);
            }
            Err(err) => return Err((entries, err)),
        }
    }
}

fn print_packets(packets: &[PacketOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for packet in packets {
                print_json(packet);
            }
        }
        OutputFormat::Table => {
            let rows = packets
                .iter()
                .map(|p| {
                    vec![
                        p.index.to_string(),
                        p.opcode.to_string(),
                        p.len.to_string(),
                        p.error.clone().unwrap_or_else(|| p.summary.clone()),
                    ]
                })
                .collect();
            print_table(&["#", "OPCODE", "LEN", "DETAIL"], rows);
        }
        OutputFormat::Pretty => {
            for p in packets {
                match &p.error {
                    Some(err) => println!("#{} {} len={} error: {err}", p.index, p.opcode, p.len),
                    None => println!("#{} {} len={} {}", p.index, p.opcode, p.len, p.summary),
                }
            }
        }
        OutputFormat::Raw => {
            for p in packets {
                println!("{}", p.opcode);
            }
        }
    }
}
