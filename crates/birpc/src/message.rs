//! Wire-level message model.
//!
//! Messages use compact keys: a request is `{"t":"q","i":id,"m":method,"a":args}` (no `i` for
//! events, `"s":true` for streaming calls), a response is `{"t":"s","i":id,"r":result}` or
//! `{"t":"s","i":id,"e":error}`, with `"d"` marking stream progress.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::CallId;
use crate::{Error, Result};

/// Numeric error code carried by a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
	/// The remote function returned an error or panicked.
	pub const FUNCTION_FAILED: Self = Self(-32000);
	/// The request hook asked the caller to try again later.
	pub const RETRY: Self = Self(-32001);
	/// Arguments could not be decoded into the function's parameter types.
	pub const INVALID_PARAMS: Self = Self(-32602);
	/// No function is registered (or resolvable) under the requested name.
	pub const METHOD_NOT_FOUND: Self = Self(-32601);
	/// The response could not be encoded.
	pub const SERIALIZATION: Self = Self(-32603);
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// An error produced on the remote side and carried back in a [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
	/// Error classification.
	pub code: ErrorCode,
	/// Human-readable description.
	pub message: String,
	/// Optional structured payload.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl RemoteError {
	/// Creates an error with an explicit code.
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	/// Creates a function failure.
	pub fn function(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::FUNCTION_FAILED, message)
	}

	/// Creates the error sent back when `method` cannot be resolved.
	pub fn not_found(method: &str) -> Self {
		Self::new(ErrorCode::METHOD_NOT_FOUND, format!("function \"{method}\" not found"))
	}

	/// Creates the error sent back when a request hook defers `method`.
	pub fn retry(method: &str) -> Self {
		Self::new(ErrorCode::RETRY, format!("call to \"{method}\" should be retried"))
	}

	/// Creates an argument decoding failure.
	pub fn invalid_params(err: impl fmt::Display) -> Self {
		Self::new(ErrorCode::INVALID_PARAMS, format!("invalid arguments: {err}"))
	}

	/// Creates a response encoding failure.
	pub fn serialization(err: impl fmt::Display) -> Self {
		Self::new(ErrorCode::SERIALIZATION, format!("failed to serialize response: {err}"))
	}

	/// Attaches structured data.
	#[must_use]
	pub fn with_data(mut self, data: JsonValue) -> Self {
		self.data = Some(data);
		self
	}

	/// Returns true if the remote side asked for the call to be retried.
	pub fn is_retry(&self) -> bool {
		self.code == ErrorCode::RETRY
	}

	/// Returns true if the remote side had no function under the requested name.
	pub fn is_not_found(&self) -> bool {
		self.code == ErrorCode::METHOD_NOT_FOUND
	}
}

impl From<String> for RemoteError {
	fn from(message: String) -> Self {
		Self::function(message)
	}
}

impl From<&str> for RemoteError {
	fn from(message: &str) -> Self {
		Self::function(message)
	}
}

/// A call or event sent to the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	/// Correlation id; absent for fire-and-forget events.
	#[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
	pub id: Option<CallId>,
	/// Remote function name.
	#[serde(rename = "m")]
	pub method: String,
	/// Positional arguments.
	#[serde(rename = "a", default)]
	pub args: Vec<JsonValue>,
	/// The caller consumes the result as a stream.
	#[serde(rename = "s", default, skip_serializing_if = "std::ops::Not::not")]
	pub stream: bool,
}

impl Request {
	/// Creates a request expecting a single response.
	pub fn call(id: CallId, method: impl Into<String>, args: Vec<JsonValue>) -> Self {
		Self {
			id: Some(id),
			method: method.into(),
			args,
			stream: false,
		}
	}

	/// Creates a request expecting a stream of responses.
	pub fn stream(id: CallId, method: impl Into<String>, args: Vec<JsonValue>) -> Self {
		Self {
			stream: true,
			..Self::call(id, method, args)
		}
	}

	/// Creates a fire-and-forget request.
	pub fn event(method: impl Into<String>, args: Vec<JsonValue>) -> Self {
		Self {
			id: None,
			method: method.into(),
			args,
			stream: false,
		}
	}

	/// Returns true if no response is expected.
	pub fn is_event(&self) -> bool {
		self.id.is_none()
	}
}

/// The answer to a [`Request`], or one step of a streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	/// Id of the request being answered.
	#[serde(rename = "i")]
	pub id: CallId,
	/// Success value.
	#[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	/// Failure value.
	#[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
	pub error: Option<RemoteError>,
	/// Stream progress: `Some(false)` for an item, `Some(true)` for the end.
	#[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
	pub done: Option<bool>,
}

impl Response {
	/// Creates a successful response.
	pub fn ok(id: CallId, result: JsonValue) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
			done: None,
		}
	}

	/// Creates a failed response.
	pub fn err(id: CallId, error: RemoteError) -> Self {
		Self {
			id,
			result: None,
			error: Some(error),
			done: None,
		}
	}

	/// Creates one streamed item.
	pub fn chunk(id: CallId, item: JsonValue) -> Self {
		Self {
			done: Some(false),
			..Self::ok(id, item)
		}
	}

	/// Creates the end-of-stream marker.
	pub fn end(id: CallId) -> Self {
		Self {
			id,
			result: None,
			error: None,
			done: Some(true),
		}
	}

	/// Converts into the result a caller observes.
	pub fn into_result(self) -> Result<JsonValue> {
		match self.error {
			Some(err) => Err(Error::Remote(err)),
			None => Ok(self.result.unwrap_or(JsonValue::Null)),
		}
	}
}

/// Any message exchanged between two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Message {
	/// A call or event.
	#[serde(rename = "q")]
	Request(Request),
	/// An answer to a call.
	#[serde(rename = "s")]
	Response(Response),
}

/// Encodes a serializable argument tuple into positional arguments.
///
/// Tuples and sequences become one argument per element, `()` becomes no arguments, and any
/// other value becomes a single argument. Wrap a lone sequence argument in a 1-tuple.
pub fn encode_args(args: impl Serialize) -> Result<Vec<JsonValue>> {
	match serde_json::to_value(args).map_err(|e| Error::Serialize(e.to_string()))? {
		JsonValue::Array(items) => Ok(items),
		JsonValue::Null => Ok(Vec::new()),
		other => Ok(vec![other]),
	}
}
