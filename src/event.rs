// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Wire Types
//!
//! Protobuf messages shared by the broker path and the gRPC facade. An [`Event`] travels
//! through RabbitMQ as its protobuf encoding, with no length prefix, and the same type is
//! streamed to remote consumers.

use prost_types::{value::Kind, ListValue, Struct, Value};
use std::collections::{BTreeMap, HashMap};

/// The unit of transport.
///
/// `key` is the routing key, `type` tells handlers how to interpret `data`, and `uuid`
/// identifies the subject the event is about.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Event {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub uuid: String,
    #[prost(string, tag = "3")]
    pub key: String,
    #[prost(map = "string, message", tag = "4")]
    pub data: HashMap<String, Value>,
    /// Message id, stamped on publish when empty.
    #[prost(string, tag = "5")]
    pub id: String,
    /// Unix seconds, stamped on publish when zero.
    #[prost(int64, tag = "6")]
    pub ts: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConsumeRequest {
    #[prost(string, tag = "1")]
    pub key: String,
}

impl Event {
    pub fn new(key: &str, kind: &str, uuid: &str) -> Self {
        Event {
            r#type: kind.to_owned(),
            uuid: uuid.to_owned(),
            key: key.to_owned(),
            ..Default::default()
        }
    }

    /// Sets a data field from a JSON value.
    pub fn with_data(mut self, field: &str, value: serde_json::Value) -> Self {
        self.data.insert(field.to_owned(), value_from_json(value));
        self
    }

    /// Reads a data field back as JSON.
    pub fn data_json(&self, field: &str) -> Option<serde_json::Value> {
        self.data.get(field).map(value_to_json)
    }
}

/// Converts a JSON value into a protobuf `Value`.
pub fn value_from_json(value: serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(value_from_json).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .into_iter()
                .map(|(k, v)| (k, value_from_json(v)))
                .collect::<BTreeMap<_, _>>(),
        }),
    };

    Value { kind: Some(kind) }
}

/// Converts a protobuf `Value` into JSON. Numbers that are not finite become `null`.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::NumberValue(n)) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(st)) => serde_json::Value::Object(
            st.fields
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}
