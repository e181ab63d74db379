//! Outbound subscription frames for the trading channels.

use serde::{Deserialize, Serialize};

use crate::auth::ApiCreds;

/// Subscription operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Subscribe,
    Unsubscribe,
}

/// Credentials as carried on the user-channel wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl AuthPayload {
    pub fn from_creds(creds: &ApiCreds) -> Option<Self> {
        if !creds.is_valid() {
            return None;
        }
        Some(Self {
            api_key: creds.api_key.clone(),
            secret: creds.secret.clone(),
            passphrase: creds.passphrase.clone(),
        })
    }
}

/// The wire frame for subscribe/unsubscribe on either channel.
///
/// Quirks preserved from the server contract: a user *subscribe* carries
/// `type: "subscribe"` while a user *unsubscribe* carries `type: "user"`;
/// `initial_dump` is only sent on market subscribes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSubscription {
    #[serde(rename = "type")]
    pub kind: String,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub asset_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub markets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_dump: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_feature_enabled: Option<bool>,
}

impl WireSubscription {
    pub fn market_subscribe(asset_ids: Vec<String>, custom_features: bool) -> Self {
        Self {
            kind: "market".to_string(),
            operation: Operation::Subscribe,
            asset_ids,
            markets: Vec::new(),
            auth: None,
            initial_dump: Some(true),
            custom_feature_enabled: custom_features.then_some(true),
        }
    }

    pub fn market_unsubscribe(asset_ids: Vec<String>) -> Self {
        Self {
            kind: "market".to_string(),
            operation: Operation::Unsubscribe,
            asset_ids,
            markets: Vec::new(),
            auth: None,
            initial_dump: None,
            custom_feature_enabled: None,
        }
    }

    pub fn user_subscribe(markets: Vec<String>, auth: AuthPayload) -> Self {
        Self {
            kind: "subscribe".to_string(),
            operation: Operation::Subscribe,
            asset_ids: Vec::new(),
            markets,
            auth: Some(auth),
            initial_dump: None,
            custom_feature_enabled: None,
        }
    }

    pub fn user_unsubscribe(markets: Vec<String>, auth: AuthPayload) -> Self {
        Self {
            kind: "user".to_string(),
            operation: Operation::Unsubscribe,
            asset_ids: Vec::new(),
            markets,
            auth: Some(auth),
            initial_dump: None,
            custom_feature_enabled: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_subscribe_frame() {
        let frame = WireSubscription::market_subscribe(vec!["a1".into()], false);
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "market");
        assert_eq!(json["operation"], "subscribe");
        assert_eq!(json["asset_ids"][0], "a1");
        assert_eq!(json["initial_dump"], true);
        assert!(json.get("custom_feature_enabled").is_none());
        assert!(json.get("markets").is_none());
        assert!(json.get("auth").is_none());
    }

    #[test]
    fn test_market_subscribe_with_custom_features() {
        let frame = WireSubscription::market_subscribe(vec!["a1".into()], true);
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["custom_feature_enabled"], true);
    }

    #[test]
    fn test_market_unsubscribe_drops_initial_dump() {
        let frame = WireSubscription::market_unsubscribe(vec!["a1".into()]);
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["operation"], "unsubscribe");
        assert!(json.get("initial_dump").is_none());
    }

    #[test]
    fn test_user_frames_type_quirk() {
        let auth = AuthPayload {
            api_key: "k".into(),
            secret: "s".into(),
            passphrase: "p".into(),
        };
        let sub = WireSubscription::user_subscribe(vec!["m1".into()], auth.clone());
        let json: serde_json::Value = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["operation"], "subscribe");
        assert_eq!(json["markets"][0], "m1");
        assert_eq!(json["auth"]["api_key"], "k");

        let unsub = WireSubscription::user_unsubscribe(vec!["m1".into()], auth);
        let json: serde_json::Value = serde_json::to_value(&unsub).unwrap();
        assert_eq!(json["type"], "user");
        assert_eq!(json["operation"], "unsubscribe");
    }
}
