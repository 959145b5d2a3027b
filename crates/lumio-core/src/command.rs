//! The command envelope consumed by the orchestrator.

use serde::{Deserialize, Serialize};

/// Sender half of the single command channel feeding the orchestrator.
pub type CommandSender = tokio::sync::mpsc::Sender<Command>;

/// A request to change state or perform an action.
///
/// The wire form is `{"type": "<kind>", "payload": {...}}`; every external
/// transport parses into this enum and pushes onto the orchestrator's
/// channel. Payload fields are typed narrowly (`u8` for channels and
/// percentages) so out-of-range JSON fails to parse and is dropped at the
/// transport boundary; semantic ranges (brightness ≥ 1, effect id ≤ 28)
/// are enforced by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Command {
    SetPower {
        #[serde(rename = "isOn")]
        is_on: bool,
    },
    SetColor {
        r: u8,
        g: u8,
        b: u8,
    },
    SetBrightness {
        value: u8,
    },
    SetSpeed {
        value: u8,
    },
    /// Select one of the strip's built-in animation programs (0..=28).
    SetHardwareEffect {
        id: u8,
    },
    SyncTime,
    SetRgbOrder {
        v1: u8,
        v2: u8,
        v3: u8,
    },
    /// Program the strip's own on/off timer.
    SetDeviceSchedule {
        hour: u8,
        minute: u8,
        second: u8,
        /// Bit mask, Monday = bit 0 .. Sunday = bit 6.
        weekdays: u8,
        #[serde(rename = "isOn")]
        is_on: bool,
        #[serde(rename = "isSet")]
        is_set: bool,
    },
    RunPattern {
        name: String,
    },
    StopPattern,
    /// Run an inline chunk of script source. Emitted by the scheduler's
    /// `lua <source…>` grammar; accepted from the wire as well.
    RunLua {
        code: String,
    },
    AddSchedule {
        spec: String,
        command: String,
    },
    RemoveSchedule {
        id: u32,
    },
    GetPatternCode {
        name: String,
    },
    SavePatternCode {
        name: String,
        code: String,
    },
    DeletePattern {
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Command, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn set_color_from_wire() {
        let cmd = parse(r#"{"type":"setColor","payload":{"r":255,"g":0,"b":0}}"#).unwrap();
        assert_eq!(cmd, Command::SetColor { r: 255, g: 0, b: 0 });
    }

    #[test]
    fn set_power_uses_is_on_key() {
        let cmd = parse(r#"{"type":"setPower","payload":{"isOn":true}}"#).unwrap();
        assert_eq!(cmd, Command::SetPower { is_on: true });
    }

    #[test]
    fn unit_kinds_need_no_payload() {
        assert_eq!(parse(r#"{"type":"syncTime"}"#).unwrap(), Command::SyncTime);
        assert_eq!(
            parse(r#"{"type":"stopPattern"}"#).unwrap(),
            Command::StopPattern
        );
    }

    #[test]
    fn out_of_range_color_is_rejected() {
        assert!(parse(r#"{"type":"setColor","payload":{"r":300,"g":0,"b":0}}"#).is_err());
        assert!(parse(r#"{"type":"setColor","payload":{"r":-1,"g":0,"b":0}}"#).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(parse(r#"{"type":"selfDestruct","payload":{}}"#).is_err());
    }

    #[test]
    fn schedule_commands() {
        let cmd = parse(
            r#"{"type":"addSchedule","payload":{"spec":"*/5 * * * *","command":"power on"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::AddSchedule {
                spec: "*/5 * * * *".into(),
                command: "power on".into(),
            }
        );
        let cmd = parse(r#"{"type":"removeSchedule","payload":{"id":3}}"#).unwrap();
        assert_eq!(cmd, Command::RemoveSchedule { id: 3 });
    }

    #[test]
    fn device_schedule_round_trips() {
        let cmd = Command::SetDeviceSchedule {
            hour: 7,
            minute: 30,
            second: 0,
            weekdays: 0b0011111,
            is_on: true,
            is_set: true,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""isOn":true"#));
        assert_eq!(parse(&json).unwrap(), cmd);
    }
}
