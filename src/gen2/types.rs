//! Typed request/response shapes for the Gen2 REST schema. Stands in for
//! the vendor's code-generated OpenAPI client: the wire-format serializers
//! themselves are out of scope, but the core needs a typed surface to build
//! requests and parse responses against.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PanelError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub iat_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StatusResponse {
    pub system: Value,
    #[serde(default)]
    pub network: Value,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BranchReading {
    pub id: u32,
    #[serde(default)]
    pub relay_state: String,
    pub instant_power_w: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PanelStateResponse {
    pub main_relay_state: String,
    pub instant_grid_power_w: f64,
    #[serde(default)]
    pub branches: Vec<BranchReading>,
    #[serde(default)]
    pub dsm_state: Option<String>,
    #[serde(default)]
    pub dsm_grid_state: Option<String>,
    #[serde(default)]
    pub grid_sample_start_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CircuitResponse {
    pub id: String,
    pub name: String,
    pub relay_state: String,
    #[serde(default)]
    pub priority: Option<String>,
    pub instant_power_w: f64,
    #[serde(default)]
    pub tabs: Vec<u32>,
    #[serde(default)]
    pub produced_energy_wh: f64,
    #[serde(default)]
    pub consumed_energy_wh: f64,
    #[serde(default = "default_true")]
    pub is_user_controllable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CircuitsResponse {
    pub circuits: HashMap<String, CircuitResponse>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSoeResponse {
    pub percentage: f64,
}

/// The relay enum the server accepts, validated locally before a request
/// is built so a malformed value never reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayStateIn {
    Open,
    Closed,
}

impl RelayStateIn {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "CLOSED" => Ok(Self::Closed),
            other => Err(PanelError::Validation(format!("invalid relay state: {other}"))),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }
}

/// Priority levels accepted by the server; validated locally first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitPriority {
    MustHave,
    NiceToHave,
    Discretionary,
    NotSet,
}

impl CircuitPriority {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().replace(' ', "_").as_str() {
            "MUST_HAVE" => Ok(Self::MustHave),
            "NICE_TO_HAVE" => Ok(Self::NiceToHave),
            "DISCRETIONARY" => Ok(Self::Discretionary),
            "NOT_SET" => Ok(Self::NotSet),
            other => Err(PanelError::Validation(format!("invalid priority: {other}"))),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::MustHave => "MUST_HAVE",
            Self::NiceToHave => "NICE_TO_HAVE",
            Self::Discretionary => "DISCRETIONARY",
            Self::NotSet => "NOT_SET",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetCircuitRelayRequest {
    #[serde(rename = "relayStateIn")]
    pub relay_state_in: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetCircuitPriorityRequest {
    #[serde(rename = "priorityIn")]
    pub priority_in: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_state_parse_is_case_insensitive() {
        assert_eq!(RelayStateIn::parse("open").unwrap(), RelayStateIn::Open);
        assert_eq!(RelayStateIn::parse("CLOSED").unwrap(), RelayStateIn::Closed);
        assert!(RelayStateIn::parse("sideways").is_err());
    }

    #[test]
    fn priority_parse_accepts_known_values_only() {
        assert_eq!(CircuitPriority::parse("must_have").unwrap(), CircuitPriority::MustHave);
        assert!(CircuitPriority::parse("urgent").is_err());
    }
}
