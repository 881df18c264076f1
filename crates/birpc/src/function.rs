//! Local functions exposed to the remote side.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::endpoint::Birpc;
use crate::message::RemoteError;

/// What a local function produced.
pub enum Output {
	/// A single value.
	Value(JsonValue),
	/// A lazy sequence, delivered to streaming callers item by item.
	Stream(BoxStream<'static, Result<JsonValue, RemoteError>>),
}

impl Output {
	/// Encodes a single value.
	pub fn value(value: impl Serialize) -> Result<Self, RemoteError> {
		serde_json::to_value(value)
			.map(Self::Value)
			.map_err(RemoteError::serialization)
	}
}

impl fmt::Debug for Output {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
			Self::Stream(_) => f.write_str("Stream(..)"),
		}
	}
}

/// A function callable by the remote side.
///
/// Most callers build these with [`function`], [`async_function`], [`stream_function`] or
/// [`function_with_context`] rather than implementing the trait by hand.
pub trait Function: Send + Sync + 'static {
	/// Invokes the function with positional arguments.
	fn call(&self, ctx: CallContext, args: Vec<JsonValue>) -> BoxFuture<'static, Result<Output, RemoteError>>;
}

/// Shared handle to a [`Function`].
pub type FunctionRef = Arc<dyn Function>;

/// What a local function sees as its call context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bind {
	/// The endpoint itself, so functions can call back into the remote side.
	#[default]
	Rpc,
	/// The raw local function set.
	Functions,
}

/// The call context value selected by [`Bind`].
#[derive(Clone)]
pub enum This {
	/// The endpoint that received the request.
	Rpc(Birpc),
	/// The endpoint's local function set.
	Functions(Functions),
}

/// Per-invocation context handed to local functions.
#[derive(Clone)]
pub struct CallContext {
	pub(crate) method: String,
	pub(crate) extra: Vec<JsonValue>,
	pub(crate) this: This,
}

impl CallContext {
	/// Name the function was invoked under.
	pub fn method(&self) -> &str {
		&self.method
	}

	/// Transport extras that came with the request.
	pub fn extra(&self) -> &[JsonValue] {
		&self.extra
	}

	/// The bound call context.
	pub fn this(&self) -> &This {
		&self.this
	}

	/// The endpoint, when bound with [`Bind::Rpc`].
	pub fn rpc(&self) -> Option<&Birpc> {
		match &self.this {
			This::Rpc(rpc) => Some(rpc),
			This::Functions(_) => None,
		}
	}

	/// The local function set, when bound with [`Bind::Functions`].
	pub fn functions(&self) -> Option<&Functions> {
		match &self.this {
			This::Functions(functions) => Some(functions),
			This::Rpc(_) => None,
		}
	}
}

impl fmt::Debug for CallContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallContext")
			.field("method", &self.method)
			.field("extra", &self.extra)
			.finish_non_exhaustive()
	}
}

/// Live, shared set of local functions keyed by name.
///
/// Clones share the same set. The endpoint looks functions up afresh for every inbound
/// request, so inserts and removals are visible to the very next call.
#[derive(Clone, Default)]
pub struct Functions {
	inner: Arc<RwLock<HashMap<String, FunctionRef>>>,
}

impl Functions {
	/// Creates an empty set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a function, builder style.
	#[must_use]
	pub fn with(self, name: impl Into<String>, function: FunctionRef) -> Self {
		self.insert(name, function);
		self
	}

	/// Adds or replaces a function, returning the previous one.
	pub fn insert(&self, name: impl Into<String>, function: FunctionRef) -> Option<FunctionRef> {
		self.inner.write().insert(name.into(), function)
	}

	/// Removes a function.
	pub fn remove(&self, name: &str) -> Option<FunctionRef> {
		self.inner.write().remove(name)
	}

	/// Looks a function up.
	pub fn get(&self, name: &str) -> Option<FunctionRef> {
		self.inner.read().get(name).cloned()
	}

	/// Returns true if a function is registered under `name`.
	pub fn contains(&self, name: &str) -> bool {
		self.inner.read().contains_key(name)
	}

	/// Registered names, sorted.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<_> = self.inner.read().keys().cloned().collect();
		names.sort_unstable();
		names
	}

	/// Number of registered functions.
	pub fn len(&self) -> usize {
		self.inner.read().len()
	}

	/// Returns true if no function is registered.
	pub fn is_empty(&self) -> bool {
		self.inner.read().is_empty()
	}
}

impl fmt::Debug for Functions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.names()).finish()
	}
}

/// Decodes positional arguments into a parameter tuple.
///
/// `()` accepts an empty argument list.
pub(crate) fn decode_args<A: DeserializeOwned>(args: Vec<JsonValue>) -> Result<A, RemoteError> {
	let empty = args.is_empty();
	match serde_json::from_value(JsonValue::Array(args)) {
		Ok(decoded) => Ok(decoded),
		Err(_) if empty => serde_json::from_value(JsonValue::Null).map_err(RemoteError::invalid_params),
		Err(err) => Err(RemoteError::invalid_params(err)),
	}
}

struct ContextFn<F, A> {
	f: F,
	_args: PhantomData<fn(A)>,
}

impl<A, R, F, Fut> Function for ContextFn<F, A>
where
	A: DeserializeOwned + 'static,
	R: Serialize + Send + 'static,
	F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
{
	fn call(&self, ctx: CallContext, args: Vec<JsonValue>) -> BoxFuture<'static, Result<Output, RemoteError>> {
		let fut = decode_args::<A>(args).map(|args| (self.f)(ctx, args));
		async move { Output::value(fut?.await?) }.boxed()
	}
}

struct StreamFn<F, A> {
	f: F,
	_args: PhantomData<fn(A)>,
}

impl<A, R, F, S> Function for StreamFn<F, A>
where
	A: DeserializeOwned + 'static,
	R: Serialize + 'static,
	F: Fn(A) -> S + Send + Sync + 'static,
	S: Stream<Item = Result<R, RemoteError>> + Send + 'static,
{
	fn call(&self, _ctx: CallContext, args: Vec<JsonValue>) -> BoxFuture<'static, Result<Output, RemoteError>> {
		let stream = decode_args::<A>(args).map(|args| (self.f)(args));
		async move {
			let items = stream?.map(|item| {
				item.and_then(|value| serde_json::to_value(value).map_err(RemoteError::serialization))
			});
			Ok(Output::Stream(items.boxed()))
		}
		.boxed()
	}
}

/// Wraps a synchronous closure taking a decoded argument tuple.
///
/// ```
/// use birpc::{RemoteError, function};
///
/// let hello = function(|(name,): (String,)| Ok::<_, RemoteError>(format!("Hello {name}")));
/// # let _ = hello;
/// ```
pub fn function<A, R, F>(f: F) -> FunctionRef
where
	A: DeserializeOwned + 'static,
	R: Serialize + Send + 'static,
	F: Fn(A) -> Result<R, RemoteError> + Send + Sync + 'static,
{
	function_with_context(move |_ctx, args: A| futures::future::ready(f(args)))
}

/// Wraps an async closure taking a decoded argument tuple.
pub fn async_function<A, R, F, Fut>(f: F) -> FunctionRef
where
	A: DeserializeOwned + 'static,
	R: Serialize + Send + 'static,
	F: Fn(A) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
{
	function_with_context(move |_ctx, args: A| f(args))
}

/// Wraps an async closure that also receives the [`CallContext`].
pub fn function_with_context<A, R, F, Fut>(f: F) -> FunctionRef
where
	A: DeserializeOwned + 'static,
	R: Serialize + Send + 'static,
	F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
{
	Arc::new(ContextFn {
		f,
		_args: PhantomData,
	})
}

/// Wraps a closure returning a stream of items.
///
/// Streaming callers receive each item as it is produced; plain callers receive all items
/// collected into one array.
pub fn stream_function<A, R, F, S>(f: F) -> FunctionRef
where
	A: DeserializeOwned + 'static,
	R: Serialize + 'static,
	F: Fn(A) -> S + Send + Sync + 'static,
	S: Stream<Item = Result<R, RemoteError>> + Send + 'static,
{
	Arc::new(StreamFn {
		f,
		_args: PhantomData,
	})
}
