//! Inbound request handling.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::stream::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::endpoint::Birpc;
use crate::function::{Bind, CallContext, FunctionRef, Output, This};
use crate::id::CallId;
use crate::mainloop::Outgoing;
use crate::message::{RemoteError, Request, Response};
use crate::options::{BirpcOptions, RequestAction, ResponseReason};

/// Answers one inbound request. Runs as its own task so slow functions never hold up the
/// endpoint.
pub(crate) async fn handle(rpc: Birpc, req: Request, extra: Vec<JsonValue>) {
	let responder = Responder {
		options: &rpc.shared.core.options,
		outbound: &rpc.shared.outbound,
		req: &req,
		extra: &extra,
	};

	let action = match &responder.options.on_request {
		Some(hook) => hook(&req).await,
		None => RequestAction::Proceed,
	};
	match action {
		RequestAction::Proceed => {}
		RequestAction::Respond(value) => return responder.value(value, ResponseReason::Abort),
		RequestAction::Skip => return responder.value(JsonValue::Null, ResponseReason::Abort),
		RequestAction::Retry => {
			if let Some(id) = &req.id {
				responder.send(Response::err(id.clone(), RemoteError::retry(&req.method)), ResponseReason::Abort);
			}
			return;
		}
	}

	let result = match resolve(&rpc, &req.method).await {
		Some(function) => invoke(&rpc, function, &req, extra.clone()).await,
		None => Err(RemoteError::not_found(&req.method)),
	};
	match result {
		Ok(output) => responder.output(output).await,
		Err(err) => responder.error(err),
	}
}

/// Looks the function up afresh, then lets the resolver override it.
async fn resolve(rpc: &Birpc, method: &str) -> Option<FunctionRef> {
	let function = rpc.shared.functions.get(method);
	match &rpc.shared.core.options.resolver {
		Some(resolver) => resolver(method, function).await,
		None => function,
	}
}

async fn invoke(
	rpc: &Birpc,
	function: FunctionRef,
	req: &Request,
	extra: Vec<JsonValue>,
) -> Result<Output, RemoteError> {
	let this = match rpc.shared.core.options.bind {
		Bind::Rpc => This::Rpc(rpc.clone()),
		Bind::Functions => This::Functions(rpc.shared.functions.clone()),
	};
	let ctx = CallContext {
		method: req.method.clone(),
		extra,
		this,
	};
	let args = req.args.clone();
	debug!(method = %req.method, id = ?req.id, "rpc.invoke");
	AssertUnwindSafe(async move { function.call(ctx, args).await })
		.catch_unwind()
		.await
		.unwrap_or_else(|panic| Err(panicked(&req.method, panic)))
}

fn panicked(method: &str, panic: Box<dyn Any + Send>) -> RemoteError {
	let detail = panic
		.downcast_ref::<&str>()
		.map(|s| (*s).to_owned())
		.or_else(|| panic.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown panic".to_owned());
	warn!(method, panic = %detail, "rpc.function.panicked");
	RemoteError::function(format!("function \"{method}\" panicked: {detail}"))
}

/// Sends the frames answering one request through the response hook.
struct Responder<'a> {
	options: &'a BirpcOptions,
	outbound: &'a mpsc::UnboundedSender<Outgoing>,
	req: &'a Request,
	extra: &'a [JsonValue],
}

impl Responder<'_> {
	fn id(&self) -> Option<CallId> {
		self.req.id.clone()
	}

	fn send(&self, mut response: Response, reason: ResponseReason) {
		if let Some(hook) = &self.options.on_response {
			hook(&mut response, self.req, reason);
		}
		// The endpoint may have shut down meanwhile; the answer has nowhere to go then.
		let _ = self.outbound.send(Outgoing::Response {
			response,
			method: self.req.method.clone(),
			args: self.req.args.clone(),
			extra: self.extra.to_vec(),
		});
	}

	/// Answers with a single value, as one frame or as a one-item stream.
	fn value(&self, value: JsonValue, reason: ResponseReason) {
		let Some(id) = self.id() else { return };
		if self.req.stream {
			self.send(Response::chunk(id.clone(), value), reason);
			self.send(Response::end(id), reason);
		} else {
			self.send(Response::ok(id, value), reason);
		}
	}

	async fn output(&self, output: Output) {
		let mut items = match output {
			Output::Value(value) => return self.value(value, ResponseReason::Ok),
			Output::Stream(items) => items,
		};
		// Plain callers get every item at once; events still run the sequence to completion.
		let streaming = match &self.req.id {
			Some(id) if self.req.stream => Some(id.clone()),
			_ => None,
		};
		let mut collected = Vec::new();
		loop {
			let next = AssertUnwindSafe(items.next())
				.catch_unwind()
				.await
				.unwrap_or_else(|panic| Some(Err(panicked(&self.req.method, panic))));
			match (next, &streaming) {
				(Some(Ok(item)), Some(id)) => self.send(Response::chunk(id.clone(), item), ResponseReason::Ok),
				(Some(Ok(item)), None) => collected.push(item),
				(Some(Err(err)), _) => return self.error(err),
				(None, _) => break,
			}
		}
		match streaming {
			Some(id) => self.send(Response::end(id), ResponseReason::Ok),
			None => self.value(JsonValue::Array(collected), ResponseReason::Ok),
		}
	}

	/// Reports a function failure to the error hooks, then answers with it unless a hook
	/// handled it.
	fn error(&self, err: RemoteError) {
		let method = &self.req.method;
		let args = &self.req.args;
		warn!(%method, id = ?self.req.id, error = %err, "rpc.function.failed");
		let legacy = self.options.on_error.as_ref().is_some_and(|hook| hook(&err, method, args));
		let handled = self
			.options
			.on_function_error
			.as_ref()
			.is_some_and(|hook| hook(&err, method, args));
		if legacy || handled {
			return;
		}
		if let Some(id) = self.id() {
			self.send(Response::err(id, err), ResponseReason::Error);
		}
	}
}
