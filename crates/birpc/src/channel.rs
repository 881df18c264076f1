//! Transport contract between an endpoint and the outside world.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::Result;

/// One inbound payload with its transport-specific extras.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
	/// The still-encoded message.
	pub payload: JsonValue,
	/// Transport-specific arguments, echoed back when replying.
	pub extra: Vec<JsonValue>,
}

/// Handle a channel uses to hand inbound messages to its endpoint.
///
/// Obtained through [`Channel::on`]. Cloning is cheap; every clone feeds the same endpoint.
#[derive(Debug, Clone)]
pub struct InboundSink {
	tx: mpsc::UnboundedSender<Inbound>,
}

impl InboundSink {
	pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
		Self { tx }
	}

	/// Delivers one message. Returns false if the endpoint is gone.
	pub fn deliver(&self, payload: JsonValue, extra: Vec<JsonValue>) -> bool {
		self.send(Inbound { payload, extra }).is_ok()
	}

	/// Delivers one message, handing it back if the endpoint is gone.
	pub fn send(&self, inbound: Inbound) -> std::result::Result<(), Inbound> {
		self.tx.send(inbound).map_err(|err| err.0)
	}

	/// Returns true once the endpoint stopped listening.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// A duplex message channel supplied by the caller.
///
/// The channel must deliver whole messages, in the order the peer posted them. Both
/// registration and posting may be asynchronous; the endpoint holds back its first outgoing
/// message until [`Channel::on`] has completed.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
	/// Delivers one encoded message to the peer.
	///
	/// `extra` carries the transport arguments of the request being answered, if any.
	async fn post(&self, payload: JsonValue, extra: Vec<JsonValue>) -> Result<()>;

	/// Registers the sink inbound messages must be delivered to.
	async fn on(&self, sink: InboundSink) -> Result<()>;

	/// Deregisters the sink. Called once when the endpoint closes.
	fn off(&self) {}
}

#[async_trait]
impl<C: Channel + ?Sized> Channel for Arc<C> {
	async fn post(&self, payload: JsonValue, extra: Vec<JsonValue>) -> Result<()> {
		(**self).post(payload, extra).await
	}

	async fn on(&self, sink: InboundSink) -> Result<()> {
		(**self).on(sink).await
	}

	fn off(&self) {
		(**self).off();
	}
}
