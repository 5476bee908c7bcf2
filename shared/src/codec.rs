//! Text instruction codec for device commands
//!
//! Every command maps to one ASCII instruction sent as a single datagram:
//! ```text
//! takeoff | land | stop | flip <l|r|f|b> | <up|down|left|right|forward|back> <cm>
//! ```
//! Devices answer each datagram with `ok`, `error <detail>` or a bare value
//! (for queries such as `battery?`).

use bytes::Bytes;
use thiserror::Error;

use crate::{Command, FlipDirection, MoveDirection};

/// Instruction that switches a device into command mode
pub const HANDSHAKE: &str = "command";

/// Query answered with the battery percentage
pub const BATTERY_QUERY: &str = "battery?";

/// Smallest move a device accepts, in centimetres
pub const MIN_MOVE_CM: u32 = 20;

/// Largest move a device accepts, in centimetres
pub const MAX_MOVE_CM: u32 = 500;

/// Distance used by the named move shortcuts
pub const DEFAULT_MOVE_CM: u32 = 100;

/// Maximum response datagram size
pub const MAX_RESPONSE_SIZE: usize = 1518;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Command {0} has no wire instruction")]
    NoWireForm(&'static str),

    #[error("Move distance {0}cm outside {MIN_MOVE_CM}..={MAX_MOVE_CM}")]
    DistanceOutOfRange(u32),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Response is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unexpected response value: {0}")]
    InvalidValue(String),
}

/// A decoded device response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Error(String),
    Value(String),
}

/// Check command parameters before anything is sent
pub fn validate(command: &Command) -> Result<(), CodecError> {
    if let Command::Move { distance_cm, .. } = command {
        if !(MIN_MOVE_CM..=MAX_MOVE_CM).contains(distance_cm) {
            return Err(CodecError::DistanceOutOfRange(*distance_cm));
        }
    }
    Ok(())
}

/// Map a command to its text instruction
///
/// `End` is a session-level operation and has no instruction of its own.
pub fn instruction(command: &Command) -> Result<String, CodecError> {
    validate(command)?;

    let text = match command {
        Command::Takeoff => "takeoff".to_string(),
        Command::Land => "land".to_string(),
        Command::Stop => "stop".to_string(),
        Command::Flip { direction } => {
            let code = match direction {
                FlipDirection::Left => 'l',
                FlipDirection::Right => 'r',
                FlipDirection::Forward => 'f',
                FlipDirection::Back => 'b',
            };
            format!("flip {}", code)
        }
        Command::Move {
            direction,
            distance_cm,
        } => {
            let verb = match direction {
                MoveDirection::Up => "up",
                MoveDirection::Down => "down",
                MoveDirection::Left => "left",
                MoveDirection::Right => "right",
                MoveDirection::Forward => "forward",
                MoveDirection::Back => "back",
            };
            format!("{} {}", verb, distance_cm)
        }
        Command::End => return Err(CodecError::NoWireForm("end")),
    };

    Ok(text)
}

/// Encode a command into a datagram payload
pub fn encode(command: &Command) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(instruction(command)?))
}

/// Encode a raw query (handshake, telemetry read) into a datagram payload
pub fn encode_query(query: &'static str) -> Bytes {
    Bytes::from_static(query.as_bytes())
}

/// Decode one response datagram
pub fn decode_response(buf: &[u8]) -> Result<Response, CodecError> {
    let text = std::str::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8)?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    if text.is_empty() {
        return Err(CodecError::EmptyResponse);
    }

    if text.eq_ignore_ascii_case("ok") {
        return Ok(Response::Ok);
    }

    if let Some(detail) = text.strip_prefix("error") {
        return Ok(Response::Error(detail.trim().to_string()));
    }

    Ok(Response::Value(text.to_string()))
}

/// Parse a battery query response into a percentage
pub fn parse_battery(response: &Response) -> Result<u8, CodecError> {
    match response {
        Response::Value(value) => value
            .parse::<u8>()
            .ok()
            .filter(|percent| *percent <= 100)
            .ok_or_else(|| CodecError::InvalidValue(value.clone())),
        Response::Ok => Err(CodecError::InvalidValue("ok".into())),
        Response::Error(detail) => Err(CodecError::InvalidValue(format!("error {}", detail))),
    }
}

/// Resolve a command name as used by the control dashboard
pub fn parse_command_name(name: &str) -> Result<Command, CodecError> {
    let movement = |direction| Command::Move {
        direction,
        distance_cm: DEFAULT_MOVE_CM,
    };

    let command = match name.trim().to_ascii_lowercase().as_str() {
        "takeoff" => Command::Takeoff,
        "land" => Command::Land,
        "stop" => Command::Stop,
        "end" => Command::End,
        "flip" => Command::Flip {
            direction: FlipDirection::Forward,
        },
        "forward" => movement(MoveDirection::Forward),
        "backward" | "back" => movement(MoveDirection::Back),
        "left" => movement(MoveDirection::Left),
        "right" => movement(MoveDirection::Right),
        "up" => movement(MoveDirection::Up),
        "down" => movement(MoveDirection::Down),
        _ => return Err(CodecError::UnknownCommand(name.to_string())),
    };

    Ok(command)
}
