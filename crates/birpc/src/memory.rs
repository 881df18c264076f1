//! In-process channel pair.
//!
//! [`pair`] returns two connected [`MemoryChannel`]s, the in-process counterpart of a message
//! port pair: whatever one side posts arrives at the other side's endpoint, in order.
//! Messages posted before the receiving side has registered are buffered and flushed when it
//! does, so the two endpoints can be created in any order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::channel::{Channel, Inbound, InboundSink};
use crate::{Error, Result};

#[derive(Default)]
struct PortState {
	sink: Option<InboundSink>,
	backlog: VecDeque<Inbound>,
}

/// Receiving half of one direction.
#[derive(Default)]
struct Port {
	state: Mutex<PortState>,
}

impl Port {
	fn push(&self, inbound: Inbound) {
		let mut state = self.state.lock();
		let inbound = match &state.sink {
			Some(sink) => match sink.send(inbound) {
				Ok(()) => return,
				Err(inbound) => inbound,
			},
			None => inbound,
		};
		// Receiver went away; hold messages until someone registers again.
		state.sink = None;
		state.backlog.push_back(inbound);
	}

	fn attach(&self, sink: InboundSink) {
		let mut state = self.state.lock();
		while let Some(inbound) = state.backlog.pop_front() {
			if let Err(inbound) = sink.send(inbound) {
				state.backlog.push_front(inbound);
				return;
			}
		}
		state.sink = Some(sink);
	}

	fn detach(&self) {
		self.state.lock().sink = None;
	}
}

/// One side of an in-process duplex channel.
pub struct MemoryChannel {
	local: Arc<Port>,
	remote: Arc<Port>,
	setup_delay: Option<Duration>,
	posted: AtomicUsize,
	broken: AtomicBool,
}

/// Creates two connected channel ends.
pub fn pair() -> (MemoryChannel, MemoryChannel) {
	let a = Arc::new(Port::default());
	let b = Arc::new(Port::default());
	(MemoryChannel::new(Arc::clone(&a), Arc::clone(&b)), MemoryChannel::new(b, a))
}

impl MemoryChannel {
	fn new(local: Arc<Port>, remote: Arc<Port>) -> Self {
		Self {
			local,
			remote,
			setup_delay: None,
			posted: AtomicUsize::new(0),
			broken: AtomicBool::new(false),
		}
	}

	/// Makes listener registration take `delay` before completing.
	#[must_use]
	pub fn with_setup_delay(mut self, delay: Duration) -> Self {
		self.setup_delay = Some(delay);
		self
	}

	/// Number of messages successfully posted from this side.
	pub fn posted(&self) -> usize {
		self.posted.load(Ordering::Acquire)
	}

	/// Makes every subsequent post fail (or succeed again).
	pub fn set_broken(&self, broken: bool) {
		self.broken.store(broken, Ordering::Release);
	}
}

#[async_trait]
impl Channel for MemoryChannel {
	async fn post(&self, payload: JsonValue, extra: Vec<JsonValue>) -> Result<()> {
		if self.broken.load(Ordering::Acquire) {
			return Err(Error::Transport("memory channel is broken".into()));
		}
		self.posted.fetch_add(1, Ordering::AcqRel);
		self.remote.push(Inbound { payload, extra });
		Ok(())
	}

	async fn on(&self, sink: InboundSink) -> Result<()> {
		if let Some(delay) = self.setup_delay {
			tokio::time::sleep(delay).await;
		}
		self.local.attach(sink);
		Ok(())
	}

	fn off(&self) {
		self.local.detach();
	}
}
