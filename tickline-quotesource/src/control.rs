//! Control-channel JSON request/response schemas.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ControlRequest {
    RequestCapabilities,
    StartStream {
        tickers: Vec<String>,
        #[serde(default, rename = "manual-mode")]
        manual_mode: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilitiesResponse {
    #[serde(rename = "node-type")]
    pub node_type: &'static str,
    #[serde(rename = "protocol-version")]
    pub protocol_version: u32,
}

impl Default for CapabilitiesResponse {
    fn default() -> Self {
        Self {
            node_type: "quotesource",
            protocol_version: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultResponse {
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ResultResponse {
    pub fn success() -> Self {
        Self {
            result: "success",
            reason: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            result: "error",
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_capabilities_deserializes() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"command":"request-capabilities"}"#).unwrap();
        assert!(matches!(req, ControlRequest::RequestCapabilities));
    }

    #[test]
    fn start_stream_deserializes_with_default_manual_mode() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"command":"start-stream","tickers":["t:*"]}"#).unwrap();
        match req {
            ControlRequest::StartStream { tickers, manual_mode } => {
                assert_eq!(tickers, vec!["t:*".to_string()]);
                assert!(!manual_mode);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn capabilities_response_serializes_per_schema() {
        let json = serde_json::to_value(CapabilitiesResponse::default()).unwrap();
        assert_eq!(json["node-type"], "quotesource");
        assert_eq!(json["protocol-version"], 2);
    }
}
