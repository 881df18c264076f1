//! Endpoint configuration and the hook pipeline.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::codec::{Codec, JsonCodec};
use crate::function::{Bind, FunctionRef};
use crate::message::{RemoteError, Request, Response};
use crate::{Error, Result};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Decision returned by the request hook for one inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestAction {
	/// Invoke the local function as usual.
	Proceed,
	/// Answer with this value without invoking the function.
	Respond(JsonValue),
	/// Skip the function; the response hook supplies the answer (`null` if it does not).
	Skip,
	/// Answer with a retry error so the caller can try again later.
	Retry,
}

/// Why a response is about to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseReason {
	/// The function ran and succeeded.
	Ok,
	/// The function failed or could not be found.
	Error,
	/// The request hook short-circuited the call.
	Abort,
}

/// Decision returned by the timeout hook.
#[derive(Debug, Clone)]
pub enum TimeoutAction {
	/// Reject the call with the default timeout error.
	Reject,
	/// Reject the call with this error instead.
	RejectWith(Error),
	/// Keep the call pending without a deadline; a late response, bulk rejection or close
	/// settles it.
	Handled,
}

pub(crate) type Resolver =
	Arc<dyn Fn(&str, Option<FunctionRef>) -> BoxFuture<'static, Option<FunctionRef>> + Send + Sync>;
pub(crate) type FunctionErrorHook = Arc<dyn Fn(&RemoteError, &str, &[JsonValue]) -> bool + Send + Sync>;
pub(crate) type GeneralErrorHook = Arc<dyn Fn(&Error, Option<&str>, &[JsonValue]) -> bool + Send + Sync>;
pub(crate) type TimeoutHook = Arc<dyn Fn(&str, &[JsonValue]) -> TimeoutAction + Send + Sync>;
pub(crate) type RequestHook = Arc<dyn Fn(&Request) -> BoxFuture<'static, RequestAction> + Send + Sync>;
pub(crate) type ResponseHook = Arc<dyn Fn(&mut Response, &Request, ResponseReason) + Send + Sync>;

/// Options for an endpoint or group.
///
/// Error hooks return `true` when they handled the error, which suppresses the default
/// propagation for that error.
#[derive(Clone)]
pub struct BirpcOptions {
	pub(crate) event_names: HashSet<String>,
	pub(crate) timeout: Option<Duration>,
	pub(crate) bind: Bind,
	pub(crate) codec: Arc<dyn Codec>,
	pub(crate) resolver: Option<Resolver>,
	pub(crate) on_error: Option<FunctionErrorHook>,
	pub(crate) on_function_error: Option<FunctionErrorHook>,
	pub(crate) on_general_error: Option<GeneralErrorHook>,
	pub(crate) on_timeout_error: Option<TimeoutHook>,
	pub(crate) on_request: Option<RequestHook>,
	pub(crate) on_response: Option<ResponseHook>,
}

impl Default for BirpcOptions {
	fn default() -> Self {
		Self {
			event_names: HashSet::new(),
			timeout: Some(DEFAULT_TIMEOUT),
			bind: Bind::default(),
			codec: Arc::new(JsonCodec),
			resolver: None,
			on_error: None,
			on_function_error: None,
			on_general_error: None,
			on_timeout_error: None,
			on_request: None,
			on_response: None,
		}
	}
}

impl fmt::Debug for BirpcOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut event_names: Vec<_> = self.event_names.iter().collect();
		event_names.sort_unstable();
		f.debug_struct("BirpcOptions")
			.field("event_names", &event_names)
			.field("timeout", &self.timeout)
			.field("bind", &self.bind)
			.field("resolver", &self.resolver.is_some())
			.field("on_request", &self.on_request.is_some())
			.field("on_response", &self.on_response.is_some())
			.finish_non_exhaustive()
	}
}

impl BirpcOptions {
	/// Creates default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Declares remote methods that are always sent fire-and-forget.
	#[must_use]
	pub fn event_names(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.event_names = names.into_iter().map(Into::into).collect();
		self
	}

	/// Sets the per-call timeout.
	#[must_use]
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Disables the per-call timeout.
	#[must_use]
	pub fn no_timeout(mut self) -> Self {
		self.timeout = None;
		self
	}

	/// Sets the timeout from milliseconds; negative values disable it.
	#[must_use]
	pub fn timeout_ms(mut self, ms: i64) -> Self {
		self.timeout = u64::try_from(ms).ok().map(Duration::from_millis);
		self
	}

	/// Selects the call context local functions receive.
	#[must_use]
	pub fn bind(mut self, bind: Bind) -> Self {
		self.bind = bind;
		self
	}

	/// Replaces the message codec.
	#[must_use]
	pub fn codec(mut self, codec: impl Codec) -> Self {
		self.codec = Arc::new(codec);
		self
	}

	/// Overrides how method names map to local functions.
	///
	/// The resolver receives the name and the function registered under it, if any.
	#[must_use]
	pub fn resolver(
		self,
		resolver: impl Fn(&str, Option<FunctionRef>) -> Option<FunctionRef> + Send + Sync + 'static,
	) -> Self {
		self.resolver_async(move |name, function| futures::future::ready(resolver(name, function)).boxed())
	}

	/// Async variant of [`BirpcOptions::resolver`].
	#[must_use]
	pub fn resolver_async(
		mut self,
		resolver: impl Fn(&str, Option<FunctionRef>) -> BoxFuture<'static, Option<FunctionRef>>
		+ Send
		+ Sync
		+ 'static,
	) -> Self {
		self.resolver = Some(Arc::new(resolver));
		self
	}

	/// Legacy catch-all observer for function errors (`error, method, args`).
	#[must_use]
	pub fn on_error(mut self, hook: impl Fn(&RemoteError, &str, &[JsonValue]) -> bool + Send + Sync + 'static) -> Self {
		self.on_error = Some(Arc::new(hook));
		self
	}

	/// Observer for errors raised while running a local function.
	///
	/// Returning `true` suppresses the error response entirely.
	#[must_use]
	pub fn on_function_error(
		mut self,
		hook: impl Fn(&RemoteError, &str, &[JsonValue]) -> bool + Send + Sync + 'static,
	) -> Self {
		self.on_function_error = Some(Arc::new(hook));
		self
	}

	/// Observer for codec and transport errors.
	///
	/// The failing frame is dropped either way. Unhandled errors (`false`) are logged at error
	/// level; the endpoint keeps serving.
	#[must_use]
	pub fn on_general_error(
		mut self,
		hook: impl Fn(&Error, Option<&str>, &[JsonValue]) -> bool + Send + Sync + 'static,
	) -> Self {
		self.on_general_error = Some(Arc::new(hook));
		self
	}

	/// Decides what happens when a call times out (`method, args`).
	#[must_use]
	pub fn on_timeout_error(mut self, hook: impl Fn(&str, &[JsonValue]) -> TimeoutAction + Send + Sync + 'static) -> Self {
		self.on_timeout_error = Some(Arc::new(hook));
		self
	}

	/// Intercepts inbound requests before the local function runs.
	#[must_use]
	pub fn on_request(self, hook: impl Fn(&Request) -> RequestAction + Send + Sync + 'static) -> Self {
		self.on_request_async(move |req| futures::future::ready(hook(req)).boxed())
	}

	/// Async variant of [`BirpcOptions::on_request`].
	#[must_use]
	pub fn on_request_async(
		mut self,
		hook: impl Fn(&Request) -> BoxFuture<'static, RequestAction> + Send + Sync + 'static,
	) -> Self {
		self.on_request = Some(Arc::new(hook));
		self
	}

	/// Post-processes every response right before it is sent.
	#[must_use]
	pub fn on_response(
		mut self,
		hook: impl Fn(&mut Response, &Request, ResponseReason) + Send + Sync + 'static,
	) -> Self {
		self.on_response = Some(Arc::new(hook));
		self
	}

	/// Returns true if `method` is declared as an event.
	pub fn is_event(&self, method: &str) -> bool {
		self.event_names.contains(method)
	}

	/// The configured per-call timeout.
	pub fn call_timeout(&self) -> Option<Duration> {
		self.timeout
	}
}

/// Plain-data subset of [`BirpcOptions`], loadable from configuration files.
///
/// ```toml
/// event_names = ["bump"]
/// timeout_ms = 5000
/// bind = "functions"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
	/// Remote methods always sent fire-and-forget.
	pub event_names: Vec<String>,
	/// Per-call timeout in milliseconds; negative disables it.
	pub timeout_ms: i64,
	/// Call context for local functions.
	pub bind: Bind,
}

impl Default for EndpointConfig {
	fn default() -> Self {
		Self {
			event_names: Vec::new(),
			timeout_ms: 60_000,
			bind: Bind::default(),
		}
	}
}

impl EndpointConfig {
	/// Parses a JSON document.
	pub fn from_json_str(text: &str) -> Result<Self> {
		serde_json::from_str(text).map_err(|e| Error::Deserialize(e.to_string()))
	}

	/// Parses a TOML document.
	pub fn from_toml_str(text: &str) -> Result<Self> {
		toml::from_str(text).map_err(|e| Error::Deserialize(e.to_string()))
	}

	/// The timeout this configuration describes.
	pub fn timeout(&self) -> Option<Duration> {
		u64::try_from(self.timeout_ms).ok().map(Duration::from_millis)
	}
}

impl From<EndpointConfig> for BirpcOptions {
	fn from(config: EndpointConfig) -> Self {
		Self::default()
			.event_names(config.event_names)
			.timeout_ms(config.timeout_ms)
			.bind(config.bind)
	}
}
