//! Endpoint main loop driver.
//!
//! Each endpoint owns one background task that registers with the channel, then routes
//! inbound frames: responses settle pending calls inline, requests run as independent
//! handler tasks. Outbound frames go through a separate writer task that posts them in
//! order, so a slow channel never holds up routing.

use std::sync::{Arc, Weak};

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

use crate::channel::{Inbound, InboundSink};
use crate::dispatch;
use crate::endpoint::{Birpc, Core, Shared};
use crate::message::{Message, RemoteError, Request, Response};
use crate::Error;

/// A frame waiting to be posted.
pub(crate) enum Outgoing {
	/// An outgoing call or event.
	Request(Request),
	/// An answer to an inbound request, posted with the request's transport extras.
	Response {
		response: Response,
		method: String,
		args: Vec<JsonValue>,
		extra: Vec<JsonValue>,
	},
}

pub(crate) struct MainLoop {
	/// Handles of the endpoint; inbound requests are only served while one is alive.
	shared: Weak<Shared>,
	core: Arc<Core>,
	/// Handed to the writer once the channel is ready.
	outbound: Option<mpsc::UnboundedReceiver<Outgoing>>,
	/// Inbound request handlers in flight.
	tasks: JoinSet<()>,
}

impl MainLoop {
	pub(crate) fn new(shared: Weak<Shared>, core: Arc<Core>, outbound: mpsc::UnboundedReceiver<Outgoing>) -> Self {
		Self {
			shared,
			core,
			outbound: Some(outbound),
			tasks: JoinSet::new(),
		}
	}

	pub(crate) fn spawn(self) {
		tokio::spawn(self.run());
	}

	async fn run(mut self) {
		let (tx, mut inbound) = mpsc::unbounded_channel();
		let cancel = self.core.cancel.clone();

		// Nothing is posted before the channel is ready to deliver the answers.
		let setup = tokio::select! {
			biased;
			_ = cancel.cancelled() => return,
			setup = self.core.channel.on(InboundSink::new(tx)) => setup,
		};
		if let Err(err) = setup {
			error!(error = %err, "rpc.channel.setup_failed");
			self.core.close(Some(err));
			return;
		}
		debug!("rpc.channel.ready");

		let Some(outbound) = self.outbound.take() else {
			return;
		};
		let mut writer = tokio::spawn(
			Writer {
				core: Arc::clone(&self.core),
				outbound,
			}
			.run(),
		);

		let mut inbound_open = true;
		loop {
			tokio::select! {
				biased;

				_ = cancel.cancelled() => break,

				// The outbound queue closes once every handle is gone.
				_ = &mut writer => break,

				res = self.tasks.join_next(), if !self.tasks.is_empty() => {
					if let Some(Err(err)) = res
						&& err.is_panic()
					{
						self.core.general_error(Error::custom(format!("request handler panicked: {err}")), None, &[]);
					}
				}

				msg = inbound.recv(), if inbound_open => match msg {
					Some(msg) => self.receive(msg),
					None => {
						debug!("rpc.channel.inbound_closed");
						inbound_open = false;
					}
				},
			}
		}

		writer.abort();
		// Handlers still in flight are aborted.
		self.tasks.shutdown().await;
		self.core.close(None);
	}

	/// Decodes one inbound payload and routes it.
	fn receive(&mut self, inbound: Inbound) {
		let Inbound { payload, extra } = inbound;
		let msg = match self.core.options.codec.deserialize(payload) {
			Ok(msg) => msg,
			Err(err) => return self.core.general_error(err, None, &[]),
		};
		match msg {
			Message::Response(resp) => {
				let id = resp.id.clone();
				trace!(%id, "rpc.recv.response");
				if !self.core.pending.settle(resp) {
					warn!(%id, "rpc.response.stale");
				}
			}
			Message::Request(req) => {
				trace!(method = %req.method, id = ?req.id, "rpc.recv.request");
				let Some(shared) = self.shared.upgrade() else {
					return;
				};
				self.tasks.spawn(dispatch::handle(Birpc { shared }, req, extra));
			}
		}
	}
}

/// Posts queued frames one at a time, in queue order.
struct Writer {
	core: Arc<Core>,
	outbound: mpsc::UnboundedReceiver<Outgoing>,
}

impl Writer {
	async fn run(mut self) {
		let cancel = self.core.cancel.clone();
		loop {
			let msg = tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				msg = self.outbound.recv() => msg,
			};
			match msg {
				Some(msg) => self.post(msg).await,
				None => break,
			}
		}
	}

	/// Serializes and posts one frame.
	///
	/// A failed call is rejected on its own; any other failure is a general error and only
	/// loses this frame.
	async fn post(&self, msg: Outgoing) {
		let codec = &self.core.options.codec;
		match msg {
			Outgoing::Request(req) => {
				let msg = Message::Request(req);
				let posted = match codec.serialize(&msg) {
					Ok(payload) => self.core.channel.post(payload, Vec::new()).await,
					Err(err) => Err(err),
				};
				let Message::Request(req) = msg else { return };
				trace!(method = %req.method, id = ?req.id, ok = posted.is_ok(), "rpc.post.request");
				if let Err(err) = posted {
					match &req.id {
						Some(id) => self.core.pending.fail(id, err),
						None => self.core.general_error(err, Some(&req.method), &req.args),
					}
				}
			}
			Outgoing::Response {
				response,
				method,
				args,
				extra,
			} => {
				let id = response.id.clone();
				let payload = match codec.serialize(&Message::Response(response)) {
					Ok(payload) => payload,
					Err(err) => {
						warn!(error = %err, %method, %id, "rpc.response.serialize_failed");
						let fallback = Response::err(id.clone(), RemoteError::serialization(&err));
						match codec.serialize(&Message::Response(fallback)) {
							Ok(payload) => payload,
							Err(err) => return self.core.general_error(err, Some(&method), &args),
						}
					}
				};
				trace!(%method, %id, "rpc.post.response");
				if let Err(err) = self.core.channel.post(payload, extra).await {
					self.core.general_error(err, Some(&method), &args);
				}
			}
		}
	}
}
