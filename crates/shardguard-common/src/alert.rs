use std::fmt;

use serde::{Deserialize, Serialize};

/// Alert class reported by a storage node or a router.
pub type AlertType = String;

pub const ALERT_UNREACHABLE_MASTER: &str = "UNREACHABLE_MASTER";
pub const ALERT_UNREACHABLE_REPLICA: &str = "UNREACHABLE_REPLICA";

/// One `[type, description]` pair from an alert list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertType,
    pub description: String,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: \"{}\"", self.kind, self.description)
    }
}
