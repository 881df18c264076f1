//! The per-channel endpoint handle.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cache::CallCache;
use crate::channel::Channel;
use crate::function::Functions;
use crate::mainloop::{MainLoop, Outgoing};
use crate::message::{Request, encode_args};
use crate::options::BirpcOptions;
use crate::pending::{PendingCall, PendingCalls, PendingGuard, Settle};
use crate::stream::CallStream;
use crate::{Error, Result};

/// State shared between the handles of an endpoint and its main loop.
pub(crate) struct Core {
	pub(crate) channel: Arc<dyn Channel>,
	pub(crate) options: BirpcOptions,
	pub(crate) pending: Arc<PendingCalls>,
	pub(crate) cancel: CancellationToken,
}

impl Core {
	/// Closes the endpoint. Returns false if it was already closed.
	pub(crate) fn close(&self, err: Option<Error>) -> bool {
		if !self.pending.close(err.as_ref()) {
			return false;
		}
		self.cancel.cancel();
		self.channel.off();
		match &err {
			Some(err) => debug!(error = %err, "rpc.closed"),
			None => debug!("rpc.closed"),
		}
		true
	}

	/// Reports a codec or transport failure.
	///
	/// The frame that failed is dropped; pending calls and the endpoint are unaffected.
	pub(crate) fn general_error(&self, err: Error, method: Option<&str>, args: &[JsonValue]) {
		let handled = self
			.options
			.on_general_error
			.as_ref()
			.is_some_and(|hook| hook(&err, method, args));
		if handled {
			warn!(error = %err, method, "rpc.general_error.handled");
		} else {
			error!(error = %err, method, "rpc.general_error");
		}
	}
}

pub(crate) struct Shared {
	pub(crate) core: Arc<Core>,
	pub(crate) functions: Functions,
	pub(crate) outbound: mpsc::UnboundedSender<Outgoing>,
	pub(crate) cache: CallCache,
}

/// One side of a bidirectional RPC connection.
///
/// Cloning is cheap; every clone drives the same endpoint. The endpoint's background task
/// stops once every handle is dropped or [`Birpc::close`] is called.
#[derive(Clone)]
pub struct Birpc {
	pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for Birpc {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Birpc")
			.field("functions", &self.shared.functions)
			.field("pending", &self.pending_len())
			.field("closed", &self.is_closed())
			.finish_non_exhaustive()
	}
}

impl Birpc {
	/// Binds `functions` to `channel`.
	///
	/// Spawns the endpoint's main loop on the current tokio runtime.
	///
	/// # Panics
	///
	/// Panics if called outside of a tokio runtime.
	pub fn new(functions: Functions, channel: impl Channel, options: BirpcOptions) -> Self {
		Self::from_parts(functions, Arc::new(channel), options)
	}

	pub(crate) fn from_parts(functions: Functions, channel: Arc<dyn Channel>, options: BirpcOptions) -> Self {
		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		let pending = PendingCalls::new(options.timeout, options.on_timeout_error.clone());
		let core = Arc::new(Core {
			channel,
			options,
			pending,
			cancel: CancellationToken::new(),
		});
		let shared = Arc::new(Shared {
			core: Arc::clone(&core),
			functions,
			outbound,
			cache: CallCache::default(),
		});
		MainLoop::new(Arc::downgrade(&shared), core, outbound_rx).spawn();
		Self { shared }
	}

	fn core(&self) -> &Core {
		&self.shared.core
	}

	/// Calls `method` on the remote side and decodes its result.
	///
	/// `args` is an argument tuple, see [`encode_args`]. The request is sent right away; the
	/// returned future only waits for the answer. Methods declared as event names are sent
	/// as events and resolve to `null` immediately.
	pub fn call<R>(&self, method: &str, args: impl Serialize) -> BoxFuture<'static, Result<R>>
	where
		R: DeserializeOwned + Send + 'static,
	{
		let call = match encode_args(args) {
			Ok(args) => self.call_value(method, args),
			Err(err) => return future::ready(Err(err)).boxed(),
		};
		async move { decode(call.await?) }.boxed()
	}

	/// Untyped variant of [`Birpc::call`].
	pub fn call_value(&self, method: &str, args: Vec<JsonValue>) -> BoxFuture<'static, Result<JsonValue>> {
		if self.core().options.is_event(method) {
			return future::ready(self.send_event(method, args).map(|()| JsonValue::Null)).boxed();
		}
		let (tx, rx) = oneshot::channel();
		let started = self.start(method, args, Settle::Once(tx), false);
		let method = method.to_owned();
		async move {
			let _guard = started?;
			rx.await.unwrap_or(Err(Error::Closed { method }))
		}
		.boxed()
	}

	/// Sends `method` as a fire-and-forget event.
	pub fn event(&self, method: &str, args: impl Serialize) -> Result<()> {
		self.send_event(method, encode_args(args)?)
	}

	/// Calls `method` and consumes its result as a stream of items.
	pub fn call_stream(&self, method: &str, args: impl Serialize) -> Result<CallStream> {
		let args = encode_args(args)?;
		let (tx, rx) = mpsc::unbounded_channel();
		let guard = self.start(method, args, Settle::Stream(tx), true)?;
		Ok(CallStream::new(method, rx, guard))
	}

	/// Like [`Birpc::call`], but answers repeated calls with identical arguments from a
	/// local cache without touching the channel.
	///
	/// Failed calls are not cached. See [`Birpc::refresh`].
	pub fn cached_call<R>(&self, method: &str, args: impl Serialize) -> BoxFuture<'static, Result<R>>
	where
		R: DeserializeOwned + Send + 'static,
	{
		let args = match encode_args(args) {
			Ok(args) => args,
			Err(err) => return future::ready(Err(err)).boxed(),
		};
		let key = JsonValue::Array(args.clone()).to_string();
		let call = self
			.shared
			.cache
			.get_or_insert(method, &key, || self.call_value(method, args));
		let shared = Arc::clone(&self.shared);
		let method = method.to_owned();
		async move {
			let value = call.await;
			if value.is_err() {
				shared.cache.evict(&method, &key);
			}
			decode(value?)
		}
		.boxed()
	}

	/// Drops cached results of `method`, or of every method when `None`.
	pub fn refresh(&self, method: Option<&str>) {
		self.shared.cache.clear(method);
	}

	/// A callable proxy for one remote method.
	pub fn remote(&self, method: impl Into<String>) -> RemoteFn {
		RemoteFn {
			rpc: self.clone(),
			method: method.into(),
		}
	}

	/// The live set of local functions served by this endpoint.
	pub fn functions(&self) -> &Functions {
		&self.shared.functions
	}

	/// Closes the endpoint.
	///
	/// Every pending call is rejected with `err`, or with [`Error::Closed`] when `None`. The
	/// channel listener is removed and any later call fails immediately. Closing twice is a
	/// no-op.
	pub fn close(&self, err: Option<Error>) {
		self.core().close(err);
	}

	/// Returns true once the endpoint is closed.
	pub fn is_closed(&self) -> bool {
		self.core().pending.is_closed()
	}

	/// Hands every pending call to `handler` and clears them, without closing the endpoint.
	///
	/// Returns what `handler` returned for each call, in the order the calls were made. A
	/// call the handler does not reject fails with [`Error::Cancelled`] once dropped.
	pub fn reject_pending_calls<R>(&self, handler: impl FnMut(PendingCall) -> R) -> Vec<R> {
		self.core().pending.reject_all(handler)
	}

	/// Number of calls awaiting an answer.
	pub fn pending_len(&self) -> usize {
		self.core().pending.len()
	}

	/// Registers a call and queues its request.
	fn start(&self, method: &str, args: Vec<JsonValue>, settle: Settle, stream: bool) -> Result<PendingGuard> {
		let pending = &self.core().pending;
		let id = pending.register(method, args.clone(), settle)?;
		let guard = PendingGuard::new(Arc::clone(pending), id.clone());
		debug!(method, %id, stream, "rpc.call");
		let request = if stream {
			Request::stream(id, method, args)
		} else {
			Request::call(id, method, args)
		};
		self.enqueue(Outgoing::Request(request), method)?;
		Ok(guard)
	}

	fn send_event(&self, method: &str, args: Vec<JsonValue>) -> Result<()> {
		if self.is_closed() {
			return Err(Error::Closed { method: method.to_owned() });
		}
		debug!(method, "rpc.event");
		self.enqueue(Outgoing::Request(Request::event(method, args)), method)
	}

	fn enqueue(&self, msg: Outgoing, method: &str) -> Result<()> {
		self.shared
			.outbound
			.send(msg)
			.map_err(|_| Error::Closed { method: method.to_owned() })
	}
}

pub(crate) fn decode<R: DeserializeOwned>(value: JsonValue) -> Result<R> {
	serde_json::from_value(value).map_err(|e| Error::Deserialize(e.to_string()))
}

/// Proxy for one remote method of a [`Birpc`] endpoint.
#[derive(Debug, Clone)]
pub struct RemoteFn {
	rpc: Birpc,
	method: String,
}

impl RemoteFn {
	/// The remote method name.
	pub fn name(&self) -> &str {
		&self.method
	}

	/// See [`Birpc::call`].
	pub fn call<R>(&self, args: impl Serialize) -> BoxFuture<'static, Result<R>>
	where
		R: DeserializeOwned + Send + 'static,
	{
		self.rpc.call(&self.method, args)
	}

	/// See [`Birpc::call_value`].
	pub fn call_value(&self, args: Vec<JsonValue>) -> BoxFuture<'static, Result<JsonValue>> {
		self.rpc.call_value(&self.method, args)
	}

	/// Sends the call as an event, whether or not the method is declared as one.
	pub fn event(&self, args: impl Serialize) -> Result<()> {
		self.rpc.event(&self.method, args)
	}

	/// See [`Birpc::call_stream`].
	pub fn stream(&self, args: impl Serialize) -> Result<CallStream> {
		self.rpc.call_stream(&self.method, args)
	}

	/// See [`Birpc::cached_call`].
	pub fn cached_call<R>(&self, args: impl Serialize) -> BoxFuture<'static, Result<R>>
	where
		R: DeserializeOwned + Send + 'static,
	{
		self.rpc.cached_call(&self.method, args)
	}
}
