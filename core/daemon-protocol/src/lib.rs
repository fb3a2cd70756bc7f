//! IPC protocol types and validation for tally-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetTimerState,
    TimerConfigure,
    TimerStart,
    TimerPause,
    TimerComplete,
    TimerCancel,
    GetTray,
    TrayPin,
    TrayUnpin,
    TrayReorder,
    TraySave,
    TrayRevert,
    SystemEvent,
    ListProjects,
    UpsertProject,
    ListRunningSessions,
    GetProjectStats,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Params
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigureParams {
    pub project_id: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectParams {
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReorderParams {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsParams {
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertProjectParams {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

pub const PROJECT_STATUSES: [&str; 4] = ["active", "paused", "completed", "archived"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum EventKind {
    ScreenLocked,
    ScreenUnlocked,
    TrayProjectToggled,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventParams {
    pub event: EventKind,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<String>,
}

impl ConfigureParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.project_id, "project_id")?;
        if self.minutes == 0 {
            return Err(ErrorInfo::new(
                "invalid_params",
                "minutes must be at least 1",
            ));
        }
        Ok(())
    }
}

impl ProjectParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.project_id, "project_id")
    }
}

impl StatsParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match &self.project_id {
            Some(project_id) => require_id(project_id, "project_id"),
            None => Ok(()),
        }
    }
}

impl UpsertProjectParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.id, "id")?;
        if self.name.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "name is required"));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(ErrorInfo::new(
                "invalid_params",
                format!("name must be {} characters or fewer", MAX_NAME_LEN),
            ));
        }
        if let Some(status) = &self.status {
            if !PROJECT_STATUSES.contains(&status.as_str()) {
                return Err(ErrorInfo::new(
                    "invalid_params",
                    format!(
                        "status must be one of {}, got {}",
                        PROJECT_STATUSES.join(", "),
                        status
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl EventParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(recorded_at) = &self.recorded_at {
            if DateTime::parse_from_rfc3339(recorded_at).is_err() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "recorded_at must be RFC3339",
                ));
            }
        }
        match self.event {
            EventKind::TrayProjectToggled => match &self.project_id {
                Some(project_id) => require_id(project_id, "project_id"),
                None => Err(ErrorInfo::new("missing_field", "project_id is required")),
            },
            EventKind::ScreenLocked | EventKind::ScreenUnlocked | EventKind::Quit => Ok(()),
        }
    }
}

/// Deserializes request params into `T`. Missing params parse as `null`.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorInfo> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("params are invalid: {}", err),
        )
    })
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_params",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_names_are_snake_case() {
        let request = Request::new(Method::TimerConfigure, None);
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["method"], "timer_configure");
        assert_eq!(json["protocol_version"], PROTOCOL_VERSION);
    }

    #[test]
    fn rejects_unknown_request_fields() {
        let raw = r#"{"protocol_version":1,"method":"get_health","extra":true}"#;
        assert!(serde_json::from_str::<Request>(raw).is_err());
    }

    #[test]
    fn parses_configure_params() {
        let params: ConfigureParams =
            parse_params(Some(json!({"project_id": "P1", "minutes": 25}))).expect("parse");
        assert!(params.validate().is_ok());
    }

    #[test]
    fn rejects_zero_minutes() {
        let params = ConfigureParams {
            project_id: "P1".to_string(),
            minutes: 0,
        };
        assert_eq!(params.validate().unwrap_err().code, "invalid_params");
    }

    #[test]
    fn missing_params_are_invalid() {
        let err = parse_params::<ReorderParams>(None).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn toggle_event_requires_project() {
        let params = EventParams {
            event: EventKind::TrayProjectToggled,
            project_id: None,
            recorded_at: None,
        };
        assert_eq!(params.validate().unwrap_err().code, "missing_field");
    }

    #[test]
    fn rejects_bad_event_timestamp() {
        let params = EventParams {
            event: EventKind::ScreenLocked,
            project_id: None,
            recorded_at: Some("yesterday".to_string()),
        };
        assert_eq!(params.validate().unwrap_err().code, "invalid_timestamp");
    }

    #[test]
    fn rejects_unknown_project_status() {
        let params = UpsertProjectParams {
            id: "P1".to_string(),
            name: "Writing".to_string(),
            color: None,
            status: Some("deleted".to_string()),
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_long_project_id() {
        let params = ProjectParams {
            project_id: "a".repeat(256),
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn stats_params_default_to_all_projects() {
        let params: StatsParams = parse_params(Some(json!({}))).expect("parse");
        assert_eq!(params, StatsParams::default());
        assert!(params.validate().is_ok());
    }
}
