//! Shared fixtures: the Alice and Bob function sets, and channels to wire them up.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use birpc::memory::{self, MemoryChannel};
use birpc::{
	Birpc, BirpcOptions, Channel, Error, Functions, InboundSink, JsonValue, RemoteError, Result,
	function, stream_function,
};
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;

/// Installs a test subscriber once per process.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn greeting(name: &str) -> String {
	format!("Hello {name}, my name is Alice")
}

/// Yields the greeting three times, 50ms apart, failing instead of the third one if `fail`.
fn greetings(name: String, fail: bool) -> impl Stream<Item = std::result::Result<String, RemoteError>> + Send {
	stream::iter(0..3).then(move |step| {
		let name = name.clone();
		async move {
			if step > 0 {
				tokio::time::sleep(Duration::from_millis(50)).await;
			}
			if fail && step == 2 {
				return Err(RemoteError::function("Oops, something went wrong!"));
			}
			Ok(greeting(&name))
		}
	})
}

pub fn alice_functions() -> Functions {
	Functions::new()
		.with("hello", function(|(name,): (String,)| Ok::<_, RemoteError>(greeting(&name))))
		.with(
			"helloAsyncGenerator",
			stream_function(|(name,): (String,)| greetings(name, false)),
		)
		.with("helloAsyncError", stream_function(|(name,): (String,)| greetings(name, true)))
}

pub fn bob_functions(count: &Arc<AtomicUsize>) -> Functions {
	let bump = Arc::clone(count);
	let get = Arc::clone(count);
	Functions::new()
		.with("hi", function(|(name,): (String,)| Ok::<_, RemoteError>(format!("Hi {name}, I am Bob"))))
		.with(
			"bump",
			function(move |(): ()| {
				bump.fetch_add(1, Ordering::SeqCst);
				Ok::<_, RemoteError>(())
			}),
		)
		.with("getCount", function(move |(): ()| Ok::<_, RemoteError>(get.load(Ordering::SeqCst))))
}

/// Alice and Bob connected over an in-memory channel pair.
pub struct Peers {
	pub alice: Birpc,
	pub bob: Birpc,
	/// Bob's bump counter.
	pub count: Arc<AtomicUsize>,
	/// Alice's side of the channel.
	pub alice_channel: Arc<MemoryChannel>,
	/// Bob's side of the channel.
	pub bob_channel: Arc<MemoryChannel>,
}

/// Wires Alice (who treats Bob's `bump` as an event) to Bob.
pub fn peers() -> Peers {
	peers_with(BirpcOptions::default(), BirpcOptions::default())
}

pub fn peers_with(alice_options: BirpcOptions, bob_options: BirpcOptions) -> Peers {
	init_tracing();
	let (left, right) = memory::pair();
	let (alice_channel, bob_channel) = (Arc::new(left), Arc::new(right));
	let count = Arc::new(AtomicUsize::new(0));
	let alice = Birpc::new(
		alice_functions(),
		Arc::clone(&alice_channel),
		alice_options.event_names(["bump"]),
	);
	let bob = Birpc::new(bob_functions(&count), Arc::clone(&bob_channel), bob_options);
	Peers {
		alice,
		bob,
		count,
		alice_channel,
		bob_channel,
	}
}

/// A channel driven by hand: it records posts and lets the test inject inbound payloads.
#[derive(Default)]
pub struct ManualChannel {
	sink: Mutex<Option<InboundSink>>,
	posted: Mutex<Vec<(JsonValue, Vec<JsonValue>)>>,
	offs: AtomicUsize,
	post_delay: Mutex<Option<Duration>>,
	refused: Mutex<Option<String>>,
}

impl ManualChannel {
	/// Hands a payload to the endpoint, as if the peer had sent it.
	pub fn inject(&self, payload: JsonValue, extra: Vec<JsonValue>) -> bool {
		match &*self.sink.lock() {
			Some(sink) => sink.deliver(payload, extra),
			None => false,
		}
	}

	pub fn is_listening(&self) -> bool {
		self.sink.lock().is_some()
	}

	pub fn posted(&self) -> Vec<(JsonValue, Vec<JsonValue>)> {
		self.posted.lock().clone()
	}

	pub fn offs(&self) -> usize {
		self.offs.load(Ordering::SeqCst)
	}

	/// Makes every later post take `delay` before it lands.
	pub fn set_post_delay(&self, delay: Duration) {
		*self.post_delay.lock() = Some(delay);
	}

	/// Makes posts of requests for `method` fail.
	pub fn refuse(&self, method: &str) {
		*self.refused.lock() = Some(method.to_owned());
	}
}

#[async_trait]
impl Channel for ManualChannel {
	async fn post(&self, payload: JsonValue, extra: Vec<JsonValue>) -> Result<()> {
		let delay = *self.post_delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let method = payload.get("m").and_then(JsonValue::as_str);
		if let Some(method) = method
			&& Some(method) == self.refused.lock().as_deref()
		{
			return Err(Error::Transport(format!("post of \"{method}\" refused")));
		}
		self.posted.lock().push((payload, extra));
		Ok(())
	}

	async fn on(&self, sink: InboundSink) -> Result<()> {
		*self.sink.lock() = Some(sink);
		Ok(())
	}

	fn off(&self) {
		self.offs.fetch_add(1, Ordering::SeqCst);
		self.sink.lock().take();
	}
}

/// An endpoint over a [`ManualChannel`] that has finished registering.
pub async fn manual(functions: Functions, options: BirpcOptions) -> (Birpc, Arc<ManualChannel>) {
	init_tracing();
	let channel = Arc::new(ManualChannel::default());
	let rpc = Birpc::new(functions, Arc::clone(&channel), options);
	wait_until(|| channel.is_listening()).await;
	(rpc, channel)
}

/// Yields to other tasks until `cond` holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
	for _ in 0..10_000 {
		if cond() {
			return;
		}
		tokio::task::yield_now().await;
	}
	panic!("condition not reached");
}
