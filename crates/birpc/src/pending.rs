//! Registry of outgoing calls awaiting a response.

use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::id::CallId;
use crate::message::Response;
use crate::options::{TimeoutAction, TimeoutHook};
use crate::{Error, Result};

/// Where the outcome of a call goes.
pub(crate) enum Settle {
	/// A plain call, settled once.
	Once(oneshot::Sender<Result<JsonValue>>),
	/// A streaming call, fed item by item until the end marker or an error.
	Stream(mpsc::UnboundedSender<Result<JsonValue>>),
}

impl Settle {
	fn fail(self, err: Error) {
		// The caller may have gone away; nothing left to notify then.
		match self {
			Self::Once(tx) => {
				let _ = tx.send(Err(err));
			}
			Self::Stream(tx) => {
				let _ = tx.send(Err(err));
			}
		}
	}
}

/// Armed deadline for one entry; dropping it cancels the timer task.
struct Timer(AbortHandle);

impl Drop for Timer {
	fn drop(&mut self) {
		self.0.abort();
	}
}

struct Entry {
	method: String,
	args: Vec<JsonValue>,
	settle: Settle,
	timer: Option<Timer>,
}

#[derive(Default)]
struct State {
	entries: IndexMap<CallId, Entry>,
	closed: bool,
}

/// Outstanding calls of one endpoint, keyed by correlation id.
///
/// Once closed, the registry refuses new calls; closing is the endpoint's terminal state.
pub(crate) struct PendingCalls {
	state: Mutex<State>,
	timeout: Option<Duration>,
	on_timeout: Option<TimeoutHook>,
	this: Weak<PendingCalls>,
}

impl PendingCalls {
	pub(crate) fn new(timeout: Option<Duration>, on_timeout: Option<TimeoutHook>) -> Arc<Self> {
		Arc::new_cyclic(|this| Self {
			state: Mutex::new(State::default()),
			timeout,
			on_timeout,
			this: this.clone(),
		})
	}

	/// Registers a call and arms its timeout, returning its fresh id.
	pub(crate) fn register(&self, method: &str, args: Vec<JsonValue>, settle: Settle) -> Result<CallId> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(Error::Closed { method: method.to_owned() });
		}
		let mut id = CallId::generate();
		while state.entries.contains_key(&id) {
			id = CallId::generate();
		}
		let timer = self.arm(&id);
		state.entries.insert(
			id.clone(),
			Entry {
				method: method.to_owned(),
				args,
				settle,
				timer,
			},
		);
		Ok(id)
	}

	fn arm(&self, id: &CallId) -> Option<Timer> {
		let timeout = self.timeout?;
		let this = self.this.clone();
		let id = id.clone();
		let task = tokio::spawn(async move {
			tokio::time::sleep(timeout).await;
			if let Some(this) = this.upgrade() {
				this.expire(&id);
			}
		});
		Some(Timer(task.abort_handle()))
	}

	/// Routes a response to its call. Returns false if no call is waiting for it.
	pub(crate) fn settle(&self, resp: Response) -> bool {
		let mut state = self.state.lock();
		let Some(mut entry) = state.entries.shift_remove(&resp.id) else {
			return false;
		};
		let Response { id, result, error, done } = resp;
		match entry.settle {
			Settle::Once(tx) => {
				let outcome = match error {
					Some(err) => Err(Error::Remote(err)),
					None => Ok(result.unwrap_or(JsonValue::Null)),
				};
				let _ = tx.send(outcome);
			}
			Settle::Stream(ref tx) => {
				if let Some(err) = error {
					let _ = tx.send(Err(Error::Remote(err)));
					return true;
				}
				let delivered = match result {
					Some(item) => tx.send(Ok(item)).is_ok(),
					None => true,
				};
				if delivered && done != Some(true) {
					// More items to come; give the next one a fresh deadline.
					entry.timer = self.arm(&id);
					state.entries.insert(id, entry);
				}
			}
		}
		true
	}

	fn expire(&self, id: &CallId) {
		let Some(mut entry) = self.state.lock().entries.shift_remove(id) else {
			return;
		};
		entry.timer = None;
		let action = match &self.on_timeout {
			Some(hook) => hook(&entry.method, &entry.args),
			None => TimeoutAction::Reject,
		};
		warn!(method = %entry.method, %id, "rpc.call.timeout");
		match action {
			TimeoutAction::Reject => {
				let method = entry.method.clone();
				entry.settle.fail(Error::Timeout { method });
			}
			TimeoutAction::RejectWith(err) => entry.settle.fail(err),
			TimeoutAction::Handled => {
				let mut state = self.state.lock();
				if state.closed {
					let method = entry.method.clone();
					drop(state);
					entry.settle.fail(Error::Closed { method });
				} else {
					state.entries.insert(id.clone(), entry);
				}
			}
		}
	}

	/// Rejects one call, e.g. because its request could not be sent.
	pub(crate) fn fail(&self, id: &CallId, err: Error) {
		let entry = self.state.lock().entries.shift_remove(id);
		if let Some(entry) = entry {
			entry.settle.fail(err);
		}
	}

	/// Drops one call without notifying it; used when the caller went away.
	pub(crate) fn forget(&self, id: &CallId) {
		let entry = self.state.lock().entries.shift_remove(id);
		if entry.is_some() {
			debug!(%id, "rpc.call.abandoned");
		}
	}

	/// Hands every pending call to `handler`, in registration order, and clears the registry.
	pub(crate) fn reject_all<R>(&self, handler: impl FnMut(PendingCall) -> R) -> Vec<R> {
		let entries = std::mem::take(&mut self.state.lock().entries);
		entries
			.into_values()
			.map(|entry| PendingCall {
				method: entry.method,
				args: entry.args,
				settle: Some(entry.settle),
			})
			.map(handler)
			.collect()
	}

	/// Closes the registry, rejecting every pending call.
	///
	/// Returns false if it was already closed.
	pub(crate) fn close(&self, err: Option<&Error>) -> bool {
		let entries = {
			let mut state = self.state.lock();
			if state.closed {
				return false;
			}
			state.closed = true;
			std::mem::take(&mut state.entries)
		};
		for entry in entries.into_values() {
			let err = match err {
				Some(err) => err.clone(),
				None => Error::Closed { method: entry.method },
			};
			entry.settle.fail(err);
		}
		true
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	pub(crate) fn len(&self) -> usize {
		self.state.lock().entries.len()
	}
}

/// Removes a call from the registry if its caller stops waiting.
pub(crate) struct PendingGuard {
	pending: Arc<PendingCalls>,
	id: CallId,
}

impl PendingGuard {
	pub(crate) fn new(pending: Arc<PendingCalls>, id: CallId) -> Self {
		Self { pending, id }
	}

	pub(crate) fn id(&self) -> &CallId {
		&self.id
	}
}

impl Drop for PendingGuard {
	fn drop(&mut self) {
		self.pending.forget(&self.id);
	}
}

/// A pending call handed out by [`Birpc::reject_pending_calls`](crate::Birpc::reject_pending_calls).
///
/// Dropping it without calling [`PendingCall::reject`] rejects the call with
/// [`Error::Cancelled`].
pub struct PendingCall {
	method: String,
	args: Vec<JsonValue>,
	settle: Option<Settle>,
}

impl PendingCall {
	/// Name of the remote method that was called.
	pub fn method(&self) -> &str {
		&self.method
	}

	/// Arguments the call was made with.
	pub fn args(&self) -> &[JsonValue] {
		&self.args
	}

	/// Rejects the call with `err`.
	pub fn reject(mut self, err: Error) {
		if let Some(settle) = self.settle.take() {
			settle.fail(err);
		}
	}
}

impl std::fmt::Debug for PendingCall {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingCall")
			.field("method", &self.method)
			.field("args", &self.args)
			.finish_non_exhaustive()
	}
}

impl Drop for PendingCall {
	fn drop(&mut self) {
		if let Some(settle) = self.settle.take() {
			settle.fail(Error::Cancelled {
				method: std::mem::take(&mut self.method),
			});
		}
	}
}
