//! Customer information API
//!
//! # API Endpoint
//! `GET https://api.audible.{domain}/1.0/customer/information`

use crate::api::client::embedded_activation_bytes;
use serde::{Deserialize, Serialize};

pub const CUSTOMER_INFORMATION_ENDPOINT: &str = "1.0/customer/information";

/// Query used for the customer information call
pub const CUSTOMER_INFORMATION_QUERY: &[(&str, &str)] = &[("response_groups", "migration_details")];

/// Customer information response from Audible API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerInformation {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub given_name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    /// Present on some accounts; usually absent
    #[serde(default)]
    pub activation_bytes: Option<String>,
}

impl CustomerInformation {
    /// Pick the fields we care about out of a raw response
    pub fn from_value(response: &serde_json::Value) -> Self {
        let text = |key: &str| response.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());

        Self {
            name: text("name"),
            given_name: text("given_name"),
            email: text("email"),
            activation_bytes: embedded_activation_bytes(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let info = CustomerInformation::from_value(&json!({
            "name": "Ada Lovelace",
            "given_name": "Ada",
            "activation_bytes": "0a1b2c3d"
        }));
        assert_eq!(info.given_name.as_deref(), Some("Ada"));
        assert_eq!(info.activation_bytes.as_deref(), Some("0a1b2c3d"));
        assert!(info.email.is_none());
    }
}
