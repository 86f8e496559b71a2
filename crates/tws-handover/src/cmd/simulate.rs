//! Two simulated earbuds bouncing the primary role back and forth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use handover_profile::sim::{
    connected_pair, pump, Journal, ScriptedClient, SimDevice, HANDSET_ADDR,
};
use handover_profile::{HandoverClient, HandoverConfig, HandoverStatus, ProtocolFault};
use serde::Serialize;
use tracing::info;

use crate::cmd::{config, SimulateArgs};
use crate::exit::{
    fault_code, fault_error, status_code, CliError, CliResult, INTERNAL, SUCCESS, USAGE,
};
use crate::output::{millis, print_json, print_table, OutputFormat};

const EARBUD_A: &str = "earbud-a";
const EARBUD_B: &str = "earbud-b";

#[derive(Serialize, Debug)]
struct RoundOutput {
    round: usize,
    from: &'static str,
    to: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<HandoverStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fault: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secondary_fault: Option<String>,
    elapsed_ms: f64,
    packets: usize,
    bytes: usize,
}

impl RoundOutput {
    fn outcome(&self) -> String {
        match (&self.status, &self.fault) {
            (_, Some(fault)) => format!("fault: {fault}"),
            (Some(status), None) => status.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

#[derive(Serialize, Debug)]
struct SimulateOutput {
    clients: usize,
    payload_size: usize,
    p0_size: usize,
    rounds: Vec<RoundOutput>,
    primary: &'static str,
}

/// What one handover attempt produced on each side.
struct RoundResult {
    primary: Result<HandoverStatus, ProtocolFault>,
    secondary: Option<Result<bool, ProtocolFault>>,
    elapsed: Duration,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    if args.rounds == 0 {
        return Err(CliError::new(USAGE, "--rounds must be at least 1"));
    }
    let config = config::load(args.config.as_deref())?;

    let (mut a, mut b) = connected_pair(
        config.clone(),
        scripted_clients(&args, &Journal::new(), args.veto_at),
        scripted_clients(&args, &Journal::new(), None),
    )
    .map_err(|fault| fault_error("connecting simulated earbuds", fault))?;

    let p0 = Bytes::from(pattern(args.p0_size, 0x5a));
    for device in [&a, &b] {
        let p0 = p0.clone();
        device.sim.update(|state| {
            state.a2dp_active = args.a2dp;
            state.p0_payload = p0;
        });
    }

    let mut rounds = Vec::with_capacity(args.rounds);
    let mut code = SUCCESS;
    for round in 1..=args.rounds {
        let (primary, secondary, from, to) = if a.profile.is_primary() {
            (&mut a, &mut b, EARBUD_A, EARBUD_B)
        } else {
            (&mut b, &mut a, EARBUD_B, EARBUD_A)
        };

        let sent_before = primary.link.sent_packets().len();
        let result = run_round(primary, secondary, &config, !args.unresponsive)?;
        let sent = primary.link.sent_packets();
        let new_packets = &sent[sent_before.min(sent.len())..];

        let mut out = RoundOutput {
            round,
            from,
            to,
            status: None,
            fault: None,
            secondary_fault: None,
            elapsed_ms: millis(result.elapsed),
            packets: new_packets.len(),
            bytes: new_packets.iter().map(Bytes::len).sum(),
        };
        let mut stop = false;
        match result.primary {
            Ok(status) => {
                out.status = Some(status);
                if code == SUCCESS {
                    code = status_code(status);
                }
            }
            Err(fault) => {
                code = fault_code(&fault);
                out.fault = Some(fault.to_string());
                stop = true;
            }
        }
        if let Some(Err(fault)) = result.secondary {
            if out.fault.is_none() {
                code = fault_code(&fault);
            }
            out.secondary_fault = Some(fault.to_string());
            stop = true;
        }
        info!(round, from, to, outcome = %out.outcome(), "round finished");
        rounds.push(out);
        if stop {
            break;
        }
    }

    let output = SimulateOutput {
        clients: args.clients,
        payload_size: args.payload_size,
        p0_size: args.p0_size,
        rounds,
        primary: if a.profile.is_primary() { EARBUD_A } else { EARBUD_B },
    };
    print_simulation(&output, format);
    Ok(code)
}

fn scripted_clients(
    args: &SimulateArgs,
    journal: &Journal,
    veto_at: Option<usize>,
) -> Vec<Box<dyn HandoverClient>> {
    (0..args.clients)
        .map(|i| {
            let client = ScriptedClient::new(
                format!("client-{i}"),
                pattern(args.payload_size, i as u8),
                journal,
            );
            match veto_at {
                Some(nth) if i == 0 => client.veto_at(nth).boxed(),
                _ => client.boxed(),
            }
        })
        .collect()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Run one handover: `primary` on this thread, `secondary` pumped on another.
fn run_round(
    primary: &mut SimDevice,
    secondary: &mut SimDevice,
    config: &HandoverConfig,
    respond: bool,
) -> CliResult<RoundResult> {
    let finished = AtomicBool::new(false);
    let pump_limit = config.protocol_message_timeout * 4 + Duration::from_secs(1);

    thread::scope(|scope| {
        let worker = if respond {
            let handle = thread::Builder::new()
                .name("secondary".to_string())
                .spawn_scoped(scope, || {
                    pump(&mut secondary.profile, pump_limit, |profile| {
                        profile.is_primary() || finished.load(Ordering::Acquire)
                    })
                })
                .map_err(|err| CliError::new(INTERNAL, format!("spawning secondary: {err}")))?;
            Some(handle)
        } else {
            None
        };

        let started = Instant::now();
        let primary = primary.profile.handover(&HANDSET_ADDR);
        let elapsed = started.elapsed();
        finished.store(true, Ordering::Release);

        let pumped = worker
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| CliError::new(INTERNAL, "secondary thread panicked"))
            })
            .transpose()?;

        Ok(RoundResult {
            primary,
            secondary: pumped,
            elapsed,
        })
    })
}

fn print_simulation(out: &SimulateOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let rows = out
                .rounds
                .iter()
                .map(|r| {
                    vec![
                        r.round.to_string(),
                        format!("{} -> {}", r.from, r.to),
                        r.outcome(),
                        format!("{:.2}", r.elapsed_ms),
                        r.packets.to_string(),
                        r.bytes.to_string(),
                    ]
                })
                .collect();
            print_table(&["ROUND", "ROLE", "OUTCOME", "MS", "PACKETS", "BYTES"], rows);
            println!("primary: {}", out.primary);
        }
        OutputFormat::Pretty => {
            for r in &out.rounds {
                println!(
                    "round {}: {} -> {} {} in {:.2}ms ({} packets, {} bytes)",
                    r.round,
                    r.from,
                    r.to,
                    r.outcome(),
                    r.elapsed_ms,
                    r.packets,
                    r.bytes
                );
                if let Some(fault) = &r.secondary_fault {
                    println!("  secondary fault: {fault}");
                }
            }
            println!("primary: {}", out.primary);
        }
        OutputFormat::Raw => println!("{}", out.primary),
    }
}
