//! Serde types for the venue's public depth stream.
//!
//! Depth payloads carry only the changed side(s) as arrays of
//! `["price", "qty"]` string pairs; subscription acknowledgements are
//! distinguished by the presence of a `success` field.

use byb_common::types::PriceLevel;
use serde::{Deserialize, Serialize};

/// Topic prefix for depth subscriptions.
pub const DEPTH_TOPIC_PREFIX: &str = "orderbook.";
/// Book depth requested from the venue.
pub const DEPTH_LEVELS: u32 = 50;

/// Outbound subscribe request.
#[derive(Debug, Serialize)]
pub struct SubscribeRequest {
    pub op: &'static str,
    pub args: Vec<String>,
}

impl SubscribeRequest {
    /// Depth subscription for one symbol: `orderbook.50.<SYMBOL>`.
    pub fn depth(symbol: &str) -> Self {
        Self {
            op: "subscribe",
            args: vec![format!("{DEPTH_TOPIC_PREFIX}{DEPTH_LEVELS}.{symbol}")],
        }
    }
}

/// Any inbound frame on the public stream. All fields are optional so a
/// single parse distinguishes acks from data messages.
#[derive(Debug, Deserialize)]
pub struct PublicMessage {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub ret_msg: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub data: Option<DepthData>,
}

/// Depth diff body: `b`/`a` arrays of string pairs; an absent or empty
/// side means that side is unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct DepthData {
    #[serde(default)]
    pub b: Vec<Vec<String>>,
    #[serde(default)]
    pub a: Vec<Vec<String>>,
}

/// Convert string pairs into numeric levels, skipping malformed entries
/// (short rows, unparsable or non-finite numbers).
pub fn parse_levels(rows: &[Vec<String>]) -> Vec<PriceLevel> {
    rows.iter()
        .filter_map(|row| {
            let price: f64 = row.first()?.parse().ok()?;
            let qty: f64 = row.get(1)?.parse().ok()?;
            (price.is_finite() && qty.is_finite()).then_some(PriceLevel::new(price, qty))
        })
        .collect()
}

/// Extract the symbol suffix of a depth topic
/// (`orderbook.50.BTCUSDT` → `BTCUSDT`).
pub fn depth_topic_symbol(topic: &str) -> Option<&str> {
    if !topic.starts_with(DEPTH_TOPIC_PREFIX) {
        return None;
    }
    topic.rsplit('.').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_request_shape() {
        let req = SubscribeRequest::depth("BTCUSDT");
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"op":"subscribe","args":["orderbook.50.BTCUSDT"]}"#
        );
    }

    #[test]
    fn test_parse_depth_payload() {
        let json = r#"{
            "topic": "orderbook.50.BTCUSDT",
            "data": {
                "b": [["60000.0", "1.5"], ["59999.5", "2.0"]],
                "a": [["60005.0", "0.8"]]
            }
        }"#;
        let msg: PublicMessage = serde_json::from_str(json).unwrap();
        assert!(msg.success.is_none());
        assert_eq!(msg.topic.as_deref(), Some("orderbook.50.BTCUSDT"));

        let data = msg.data.unwrap();
        let bids = parse_levels(&data.b);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].price, 60000.0);
        assert_eq!(bids[0].qty, 1.5);
        assert_eq!(parse_levels(&data.a).len(), 1);
    }

    #[test]
    fn test_parse_ack() {
        let json = r#"{"success":true,"ret_msg":"","op":"subscribe"}"#;
        let msg: PublicMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.success, Some(true));
        assert!(msg.topic.is_none());
    }

    #[test]
    fn test_malformed_levels_are_skipped() {
        let rows = vec![
            vec!["60000.0".to_string(), "1.0".to_string()],
            vec!["not-a-price".to_string(), "1.0".to_string()],
            vec!["60001.0".to_string()],
            vec!["inf".to_string(), "1.0".to_string()],
            vec![],
            vec!["59999.0".to_string(), "2.0".to_string()],
        ];
        let levels = parse_levels(&rows);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price, 60000.0);
        assert_eq!(levels[1].price, 59999.0);
    }

    #[test]
    fn test_topic_symbol_extraction() {
        assert_eq!(
            depth_topic_symbol("orderbook.50.BTCUSDT"),
            Some("BTCUSDT")
        );
        assert_eq!(depth_topic_symbol("orderbook.50."), None);
        assert_eq!(depth_topic_symbol("tickers.BTCUSDT"), None);
    }

    #[test]
    fn test_missing_side_defaults_empty() {
        let json = r#"{"topic":"orderbook.50.ETHUSDT","data":{"a":[["3000.1","4"]]}}"#;
        let msg: PublicMessage = serde_json::from_str(json).unwrap();
        let data = msg.data.unwrap();
        assert!(data.b.is_empty());
        assert_eq!(data.a.len(), 1);
    }
}
