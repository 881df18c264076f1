//! Pluggable message encoding applied around every channel payload.

use serde_json::Value as JsonValue;

use crate::message::Message;
use crate::{Error, Result};

/// Converts messages to and from channel payloads.
///
/// `serialize` runs on every outgoing message, `deserialize` on every inbound payload before
/// the endpoint looks at it.
pub trait Codec: Send + Sync + 'static {
	/// Encodes an outgoing message.
	fn serialize(&self, msg: &Message) -> Result<JsonValue>;

	/// Decodes an inbound payload.
	fn deserialize(&self, payload: JsonValue) -> Result<Message>;
}

/// Structural identity codec: payloads are the message's JSON value as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
	fn serialize(&self, msg: &Message) -> Result<JsonValue> {
		serde_json::to_value(msg).map_err(|e| Error::Serialize(e.to_string()))
	}

	fn deserialize(&self, payload: JsonValue) -> Result<Message> {
		serde_json::from_value(payload).map_err(|e| Error::Deserialize(e.to_string()))
	}
}

/// Encodes messages as JSON text carried in a string payload.
///
/// Useful for channels that only move strings (sockets, `postMessage`-style bridges).
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl Codec for TextCodec {
	fn serialize(&self, msg: &Message) -> Result<JsonValue> {
		serde_json::to_string(msg)
			.map(JsonValue::String)
			.map_err(|e| Error::Serialize(e.to_string()))
	}

	fn deserialize(&self, payload: JsonValue) -> Result<Message> {
		match payload {
			JsonValue::String(text) => {
				serde_json::from_str(&text).map_err(|e| Error::Deserialize(e.to_string()))
			}
			other => Err(Error::Deserialize(format!("expected a text payload, got {other}"))),
		}
	}
}
