//! Order Aggregate
//!
//! The unit of work flowing through the service. Only `order_uid` is
//! load-bearing for deduplication and lookup; the remaining attributes are
//! carried as an opaque, serializable payload.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Order Identifier
// =============================================================================

/// Order identifier (value object). Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(String);

impl OrderId {
    /// Validate and wrap an identifier.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::BadRequest("order identifier is empty".to_string()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for OrderId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Order
// =============================================================================

/// Delivery details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    /// Unix seconds
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// A single line item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    pub sale: i32,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

/// An order record as delivered by the inbound stream.
///
/// Every attribute except the identifier defaults when absent, so
/// identifier-only messages decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_uid: OrderId,
    #[serde(default)]
    pub track_number: String,
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default)]
    pub payment: Payment,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub delivery_service: String,
    #[serde(default)]
    pub shardkey: String,
    #[serde(default)]
    pub sm_id: i32,
    #[serde(default)]
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub oof_shard: String,
}

impl Order {
    /// Create an order carrying only its identifier.
    pub fn new(order_uid: OrderId) -> Self {
        Self {
            order_uid,
            track_number: String::new(),
            entry: String::new(),
            delivery: Delivery::default(),
            payment: Payment::default(),
            items: Vec::new(),
            locale: String::new(),
            internal_signature: String::new(),
            customer_id: String::new(),
            delivery_service: String::new(),
            shardkey: String::new(),
            sm_id: 0,
            date_created: DateTime::<Utc>::default(),
            oof_shard: String::new(),
        }
    }

    pub fn id(&self) -> &OrderId {
        &self.order_uid
    }

    /// Decode an inbound payload.
    ///
    /// Any failure, including a missing or empty identifier, is `Malformed`:
    /// the record can never become valid.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Malformed(e.to_string()))
    }

    /// Serialize for the cache and the blob mirror.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_order_id_rejects_empty() {
        assert_matches!(OrderId::parse(""), Err(Error::BadRequest(_)));
        assert_eq!(OrderId::parse("b563feb7b2b84b6test").unwrap().as_str(), "b563feb7b2b84b6test");
    }

    #[test]
    fn test_decode_identifier_only_message() {
        let order = Order::decode(br#"{"order_uid":"A1"}"#).unwrap();
        assert_eq!(order.id().as_str(), "A1");
        assert!(order.items.is_empty());
        assert_eq!(order.payment, Payment::default());
    }

    #[test]
    fn test_decode_full_message() {
        let payload = br#"{
            "order_uid": "b563feb7b2b84b6test",
            "track_number": "WBILMTESTTRACK",
            "entry": "WBIL",
            "delivery": {"name": "Test Testov", "phone": "+9720000000", "zip": "2639809",
                         "city": "Kiryat Mozkin", "address": "Ploshad Mira 15",
                         "region": "Kraiot", "email": "test@gmail.com"},
            "payment": {"transaction": "b563feb7b2b84b6test", "request_id": "", "currency": "USD",
                        "provider": "wbpay", "amount": 1817, "payment_dt": 1637907727,
                        "bank": "alpha", "delivery_cost": 1500, "goods_total": 317, "custom_fee": 0},
            "items": [{"chrt_id": 9934930, "track_number": "WBILMTESTTRACK", "price": 453,
                       "rid": "ab4219087a764ae0btest", "name": "Mascaras", "sale": 30, "size": "0",
                       "total_price": 317, "nm_id": 2389212, "brand": "Vivienne Sabo", "status": 202}],
            "locale": "en",
            "internal_signature": "",
            "customer_id": "test",
            "delivery_service": "meest",
            "shardkey": "9",
            "sm_id": 99,
            "date_created": "2021-11-26T06:22:19Z",
            "oof_shard": "1"
        }"#;

        let order = Order::decode(payload).unwrap();
        assert_eq!(order.delivery.city, "Kiryat Mozkin");
        assert_eq!(order.payment.amount, 1817);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].brand, "Vivienne Sabo");
        assert_eq!(order.sm_id, 99);

        let decoded = Order::decode(&order.encode().unwrap()).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn test_decode_rejects_missing_or_empty_identifier() {
        assert_matches!(Order::decode(br#"{"track_number":"X"}"#), Err(Error::Malformed(_)));
        assert_matches!(Order::decode(br#"{"order_uid":""}"#), Err(Error::Malformed(_)));
        assert_matches!(Order::decode(b"not json"), Err(Error::Malformed(_)));
    }
}
