//! Bidirectional async RPC over an arbitrary, caller-supplied message channel.
//!
//! Two peers each bind a [`Birpc`] endpoint to their side of a duplex [`Channel`]. Each
//! endpoint exposes a set of local [`Functions`] to the other side and calls the other side's
//! functions by name, receiving the result as a future. The crate is transport and encoding
//! agnostic: the channel only needs to deliver whole, ordered messages, and the [`Codec`]
//! decides what a message looks like on the wire.
//!
//! * [`Birpc`]: one endpoint over one channel (calls, events, streaming calls, close).
//! * [`BirpcGroup`]: one function set served over many channels, with broadcast calls.
//! * [`Functions`]: the live, mutable set of local functions.
//! * [`BirpcOptions`]: timeouts, event names, resolver, and the hook pipeline.
//! * [`memory`]: an in-process channel pair, handy for tests and same-process peers.
//!
//! ## Example
//!
//! ```no_run
//! use birpc::{Birpc, BirpcOptions, Functions, RemoteError, function, memory};
//!
//! # async fn demo() -> birpc::Result<()> {
//! let (left, right) = memory::pair();
//!
//! let alice = Functions::new().with(
//! 	"hello",
//! 	function(|(name,): (String,)| Ok::<_, RemoteError>(format!("Hello {name}, my name is Alice"))),
//! );
//! let _alice = Birpc::new(alice, left, BirpcOptions::default());
//! let bob = Birpc::new(Functions::new(), right, BirpcOptions::default());
//!
//! let greeting: String = bob.call("hello", ("Bob",)).await?;
//! assert_eq!(greeting, "Hello Bob, my name is Alice");
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub use serde_json::Value as JsonValue;

mod cache;
mod channel;
mod codec;
mod dispatch;
mod endpoint;
mod function;
mod group;
mod id;
mod mainloop;
mod message;
mod options;
mod pending;
mod stream;

pub mod memory;

pub use channel::{Channel, Inbound, InboundSink};
pub use codec::{Codec, JsonCodec, TextCodec};
pub use endpoint::{Birpc, RemoteFn};
pub use function::{
	Bind, CallContext, Function, FunctionRef, Functions, Output, This, async_function, function,
	function_with_context, stream_function,
};
pub use group::{BirpcGroup, Broadcast, BroadcastFn, ChannelConfig};
pub use id::{CallId, DEFAULT_ID_LEN, URL_ALPHABET, nanoid};
pub use message::{ErrorCode, Message, RemoteError, Request, Response, encode_args};
pub use options::{
	BirpcOptions, DEFAULT_TIMEOUT, EndpointConfig, RequestAction, ResponseReason, TimeoutAction,
};
pub use pending::PendingCall;
pub use stream::CallStream;

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The endpoint is closed, either before the call was made or while it was pending.
	#[error("rpc is closed, cannot call \"{method}\"")]
	Closed {
		/// The method being called.
		method: String,
	},
	/// The remote side did not answer within the configured timeout.
	#[error("timeout on calling \"{method}\"")]
	Timeout {
		/// The method being called.
		method: String,
	},
	/// The remote function failed, or could not be found.
	#[error("{0}")]
	Remote(#[from] RemoteError),
	/// A pending call was handed to a bulk rejection handler that did not reject it.
	#[error("pending call to \"{method}\" was cancelled")]
	Cancelled {
		/// The method being called.
		method: String,
	},
	/// A value could not be encoded.
	#[error("serialization failed: {0}")]
	Serialize(String),
	/// An inbound payload or a returned value could not be decoded.
	#[error("deserialization failed: {0}")]
	Deserialize(String),
	/// The underlying channel failed to register, post or deliver.
	#[error("transport error: {0}")]
	Transport(String),
	/// A caller-supplied error, e.g. from a close or timeout hook.
	#[error("{0}")]
	Custom(String),
}

impl Error {
	/// Creates a caller-supplied error with the given message.
	pub fn custom(message: impl Into<String>) -> Self {
		Self::Custom(message.into())
	}

	/// Returns the remote error if the call failed on the other side.
	pub fn as_remote(&self) -> Option<&RemoteError> {
		match self {
			Self::Remote(err) => Some(err),
			_ => None,
		}
	}
}
