//! Wire format for commands and replies.
//!
//! Messages are newline-delimited UTF-8 JSON. An inbound command looks like
//! `{"task": 0, "taskType": 2, "argument": "hello"}`; an outbound reply is the
//! raw reply text followed by `\n`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, DecodeError};

/// Dispatch category of a command, selecting which handler table is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// No argument, no result.
    FireAndForget,
    /// String argument, no result.
    InputOnly,
    /// String argument, string result.
    RequestReply,
}

impl TaskKind {
    /// Number of task kinds; wire ordinals at or above this are rejected.
    pub const COUNT: i64 = 3;

    pub fn from_ordinal(ordinal: i64) -> Result<Self, CommandError> {
        match ordinal {
            0 => Ok(Self::FireAndForget),
            1 => Ok(Self::InputOnly),
            2 => Ok(Self::RequestReply),
            other => Err(CommandError::UnsupportedTaskKind(other)),
        }
    }

    pub fn ordinal(self) -> i64 {
        match self {
            Self::FireAndForget => 0,
            Self::InputOnly => 1,
            Self::RequestReply => 2,
        }
    }

    pub fn requires_argument(self) -> bool {
        self != Self::FireAndForget
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FireAndForget => "fire-and-forget",
            Self::InputOnly => "input-only",
            Self::RequestReply => "request-reply",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request to invoke one registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub task: usize,
    pub kind: TaskKind,
    pub argument: Option<String>,
}

impl Command {
    pub fn action(task: usize) -> Self {
        Self {
            task,
            kind: TaskKind::FireAndForget,
            argument: None,
        }
    }

    pub fn input(task: usize, argument: impl Into<String>) -> Self {
        Self {
            task,
            kind: TaskKind::InputOnly,
            argument: Some(argument.into()),
        }
    }

    pub fn request(task: usize, argument: impl Into<String>) -> Self {
        Self {
            task,
            kind: TaskKind::RequestReply,
            argument: Some(argument.into()),
        }
    }
}

/// JSON shape of a command on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCommand {
    task: usize,
    task_type: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    argument: Option<String>,
}

/// Decode one frame (without its trailing newline) into a command.
///
/// An empty `argument` string is treated the same as an absent one.
pub fn decode(frame: &[u8]) -> Result<Command, CommandError> {
    let text = std::str::from_utf8(frame).map_err(DecodeError::from)?;
    let wire: WireCommand = serde_json::from_str(text.trim()).map_err(DecodeError::from)?;
    let kind = TaskKind::from_ordinal(wire.task_type)?;

    Ok(Command {
        task: wire.task,
        kind,
        argument: wire.argument.filter(|arg| !arg.is_empty()),
    })
}

/// Encode a reply string as one outbound frame.
pub fn encode(reply: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(reply.len() + 1);
    bytes.extend_from_slice(reply.as_bytes());
    bytes.push(b'\n');
    bytes
}

/// Encode a command as one frame, the way a controller would send it.
pub fn encode_command(command: &Command) -> Result<Vec<u8>, serde_json::Error> {
    let wire = WireCommand {
        task: command.task,
        task_type: command.kind.ordinal(),
        argument: command.argument.clone(),
    };
    let json = serde_json::to_string(&wire)?;
    Ok(encode(&json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fire_and_forget() {
        let cmd = decode(br#"{"task":0,"taskType":0}"#).unwrap();

        assert_eq!(cmd, Command::action(0));
    }

    #[test]
    fn test_decode_request_with_argument() {
        let cmd = decode(br#"{"task":3,"taskType":2,"argument":"hello"}"#).unwrap();

        assert_eq!(cmd.task, 3);
        assert_eq!(cmd.kind, TaskKind::RequestReply);
        assert_eq!(cmd.argument.as_deref(), Some("hello"));
    }

    #[test]
    fn test_empty_or_null_argument_is_absent() {
        let empty = decode(br#"{"task":1,"taskType":1,"argument":""}"#).unwrap();
        let null = decode(br#"{"task":1,"taskType":1,"argument":null}"#).unwrap();

        assert!(empty.argument.is_none());
        assert!(null.argument.is_none());
    }

    #[test]
    fn test_task_type_out_of_range() {
        let err = decode(br#"{"task":0,"taskType":3}"#).unwrap_err();
        assert!(matches!(err, CommandError::UnsupportedTaskKind(3)));

        let err = decode(br#"{"task":0,"taskType":-1}"#).unwrap_err();
        assert!(matches!(err, CommandError::UnsupportedTaskKind(-1)));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            decode(b"not json"),
            Err(CommandError::Decode(DecodeError::Json(_)))
        ));
        assert!(matches!(
            decode(br#"{"task":-4,"taskType":0}"#),
            Err(CommandError::Decode(DecodeError::Json(_)))
        ));
        assert!(matches!(
            decode(&[0x7b, 0xff, 0xfe, 0x7d]),
            Err(CommandError::Decode(DecodeError::Utf8(_)))
        ));
    }

    #[test]
    fn test_decode_accepts_non_ascii_argument() {
        let cmd = decode(r#"{"task":0,"taskType":1,"argument":"héllo ✓"}"#.as_bytes()).unwrap();
        assert_eq!(cmd.argument.as_deref(), Some("héllo ✓"));
    }

    #[test]
    fn test_encode_appends_newline() {
        assert_eq!(encode("HELLO"), b"HELLO\n".to_vec());
    }

    #[test]
    fn test_encode_command_wire_shape() {
        let bytes = encode_command(&Command::input(2, "x")).unwrap();
        let json = String::from_utf8(bytes).unwrap();

        assert!(json.ends_with('\n'));
        assert!(json.contains(r#""task":2"#));
        assert!(json.contains(r#""taskType":1"#));
        assert!(json.contains(r#""argument":"x""#));

        let json = String::from_utf8(encode_command(&Command::action(0)).unwrap()).unwrap();
        assert!(!json.contains("argument"));
    }
}
