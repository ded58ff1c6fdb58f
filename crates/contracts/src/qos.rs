//! Bus delivery guarantee level

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Quality of service level for subscriptions and publishes
///
/// Serialized as the bare integer `0`, `1` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget
    #[default]
    AtMostOnce,
    /// Acknowledged, may be redelivered
    AtLeastOnce,
    /// Acknowledged exactly once
    ExactlyOnce,
}

impl QoS {
    /// Numeric level
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = ContractError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ContractError::config_validation(
                "qos",
                format!("qos must be 0, 1 or 2, got {other}"),
            )),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}
