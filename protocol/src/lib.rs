//! Wire types for the shellbridge control channel.
//!
//! The host application writes one JSON [`Request`] per line on the daemon's
//! stdin and reads one JSON [`Event`] per line from its stdout. Both sides
//! treat the streams as UTF-8 with invalid bytes replaced, never rejected.

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Shell a session is bound to. `Cmd` stands for the platform's native
/// command interpreter and doubles as the fallback for anything the caller
/// sends that we do not recognize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShellKind {
    #[default]
    Cmd,
    Powershell,
    Bash,
}

impl ShellKind {
    /// Normalize a raw request value: trimmed and case-insensitive, with
    /// unknown or absent values falling back to the default shell.
    pub fn from_request(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("cmd") => Self::Cmd,
            Some("powershell") => Self::Powershell,
            Some("bash") => Self::Bash,
            _ => Self::Cmd,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestAction {
    #[default]
    Run,
    Kill,
}

/// One inbound control-channel line.
///
/// `id` is the correlation id: echoed on every event the request produces and
/// doubling as the session id for `run`. `shell` and `cwd` only matter the
/// first time a session id is seen.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub action: RequestAction,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// One outbound control-channel line. `id` is present iff the originating
/// request carried a correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Start {
        pid: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Stdout {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Stderr {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Close {
        code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    CwdUpdate {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Error {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl Event {
    pub fn id(&self) -> Option<&str> {
        match self {
            Event::Start { id, .. }
            | Event::Stdout { id, .. }
            | Event::Stderr { id, .. }
            | Event::Close { id, .. }
            | Event::CwdUpdate { id, .. }
            | Event::Error { id, .. } => id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use serde_json::json;

    fn to_value(event: &Event) -> Value {
        serde_json::to_value(event).expect("serialize event")
    }

    #[test]
    fn start_event_carries_type_tag_and_id() {
        let event = Event::Start {
            pid: 4242,
            id: Some("s1".to_string()),
        };
        assert_eq!(
            to_value(&event),
            json!({"type": "start", "pid": 4242, "id": "s1"})
        );
    }

    #[test]
    fn absent_correlation_id_is_omitted_from_the_wire() {
        let event = Event::Close { code: 0, id: None };
        assert_eq!(to_value(&event), json!({"type": "close", "code": 0}));
    }

    #[test]
    fn cwd_update_uses_snake_case_tag() {
        let event = Event::CwdUpdate {
            data: "/tmp".to_string(),
            id: None,
        };
        assert_eq!(
            to_value(&event),
            json!({"type": "cwd_update", "data": "/tmp"})
        );
    }

    #[test]
    fn events_round_trip() {
        let line = r#"{"type":"stderr","data":"boom\n","id":"req-9"}"#;
        let event: Event = serde_json::from_str(line).expect("deserialize");
        assert_eq!(
            event,
            Event::Stderr {
                data: "boom\n".to_string(),
                id: Some("req-9".to_string()),
            }
        );
    }

    #[test]
    fn request_action_defaults_to_run() {
        let request: Request =
            serde_json::from_str(r#"{"command":"echo hi"}"#).expect("deserialize");
        assert_eq!(request.action, RequestAction::Run);
        assert_eq!(request.command, "echo hi");
        assert_eq!(request.id, None);
        assert_eq!(request.shell, None);
        assert_eq!(request.cwd, None);
    }

    #[test]
    fn kill_request_parses_without_command() {
        let request: Request =
            serde_json::from_str(r#"{"action":"kill","id":"s3"}"#).expect("deserialize");
        assert_eq!(request.action, RequestAction::Kill);
        assert_eq!(request.id.as_deref(), Some("s3"));
        assert_eq!(request.command, "");
    }

    #[test]
    fn unknown_action_is_a_parse_error() {
        assert!(serde_json::from_str::<Request>(r#"{"action":"reboot"}"#).is_err());
    }

    #[test]
    fn shell_normalization_is_lenient() {
        assert_eq!(ShellKind::from_request(Some(" Bash ")), ShellKind::Bash);
        assert_eq!(
            ShellKind::from_request(Some("POWERSHELL")),
            ShellKind::Powershell
        );
        assert_eq!(ShellKind::from_request(Some("fish")), ShellKind::Cmd);
        assert_eq!(ShellKind::from_request(None), ShellKind::Cmd);
    }

    #[test]
    fn shell_kind_displays_its_wire_name() {
        assert_eq!(ShellKind::Powershell.to_string(), "powershell");
        assert_eq!(ShellKind::Cmd.to_string(), "cmd");
    }
}
