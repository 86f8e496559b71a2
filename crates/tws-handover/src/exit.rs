use std::fmt;
use std::io;

use handover_frame::FrameError;
use handover_profile::{ConfigError, HandoverStatus, ProtocolFault};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const VETOED: i32 = 2;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::ClaimTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::Link(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

/// Exit code for a fatal protocol fault.
pub fn fault_code(fault: &ProtocolFault) -> i32 {
    match fault {
        ProtocolFault::MalformedFrame(_)
        | ProtocolFault::ClientConsumedMismatch { .. }
        | ProtocolFault::UnknownClient(_)
        | ProtocolFault::UnexpectedOpcode(_)
        | ProtocolFault::Frame(_) => DATA_INVALID,
        ProtocolFault::P0TransferTimeout | ProtocolFault::P1UnmarshalTimeout { .. } => TIMEOUT,
        _ => INTERNAL,
    }
}

pub fn fault_error(context: &str, fault: ProtocolFault) -> CliError {
    CliError::new(fault_code(&fault), format!("{context}: {fault}"))
}

/// Exit code for a recoverable handover outcome.
pub fn status_code(status: HandoverStatus) -> i32 {
    match status {
        HandoverStatus::Success => SUCCESS,
        HandoverStatus::Vetoed => VETOED,
        HandoverStatus::Timeout => TIMEOUT,
        _ => FAILURE,
    }
}
