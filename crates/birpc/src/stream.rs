//! Caller side of streaming calls.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::pending::PendingGuard;
use crate::{Error, Result};

/// Items produced by a remote function, in order.
///
/// The stream ends after the remote side signals completion. A failure, whether raised by the
/// remote sequence, a timeout between items or the endpoint closing, is yielded once as an
/// `Err` item after every item produced before it, and ends the stream. Dropping the stream
/// stops waiting for further items.
pub struct CallStream {
	method: String,
	rx: mpsc::UnboundedReceiver<Result<JsonValue>>,
	done: bool,
	guard: PendingGuard,
}

impl CallStream {
	pub(crate) fn new(method: &str, rx: mpsc::UnboundedReceiver<Result<JsonValue>>, guard: PendingGuard) -> Self {
		Self {
			method: method.to_owned(),
			rx,
			done: false,
			guard,
		}
	}

	/// The remote method being streamed.
	pub fn method(&self) -> &str {
		&self.method
	}

	/// Decodes every item into `T`.
	pub fn typed<T>(self) -> BoxStream<'static, Result<T>>
	where
		T: DeserializeOwned + Send + 'static,
	{
		self.map(|item| item.and_then(|value| serde_json::from_value(value).map_err(|e| Error::Deserialize(e.to_string()))))
			.boxed()
	}
}

impl Stream for CallStream {
	type Item = Result<JsonValue>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if this.done {
			return Poll::Ready(None);
		}
		let item = std::task::ready!(this.rx.poll_recv(cx));
		if !matches!(item, Some(Ok(_))) {
			this.done = true;
		}
		Poll::Ready(item)
	}
}

impl fmt::Debug for CallStream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallStream")
			.field("method", &self.method)
			.field("id", self.guard.id())
			.field("done", &self.done)
			.finish()
	}
}
