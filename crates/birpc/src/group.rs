//! One function set served over many channels.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::channel::Channel;
use crate::codec::Codec;
use crate::endpoint::{Birpc, decode};
use crate::function::Functions;
use crate::message::encode_args;
use crate::options::BirpcOptions;
use crate::Result;

/// One channel of a [`BirpcGroup`], optionally with its own codec.
///
/// Configurations are shared as `Arc<ChannelConfig>` and identified by pointer: an
/// unchanged configuration keeps its endpoint across [`BirpcGroup::update_channels`].
pub struct ChannelConfig {
	channel: Arc<dyn Channel>,
	codec: Option<Arc<dyn Codec>>,
}

impl ChannelConfig {
	/// Wraps a channel, using the group's codec.
	pub fn new(channel: impl Channel) -> Self {
		Self {
			channel: Arc::new(channel),
			codec: None,
		}
	}

	/// Overrides the codec for this channel.
	#[must_use]
	pub fn with_codec(mut self, codec: impl Codec) -> Self {
		self.codec = Some(Arc::new(codec));
		self
	}
}

impl fmt::Debug for ChannelConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChannelConfig")
			.field("codec", &self.codec.is_some())
			.finish_non_exhaustive()
	}
}

struct Client {
	config: Arc<ChannelConfig>,
	rpc: Birpc,
}

struct GroupInner {
	functions: Functions,
	options: BirpcOptions,
	clients: Mutex<Vec<Client>>,
}

impl GroupInner {
	fn connect(&self, config: &Arc<ChannelConfig>) -> Birpc {
		let mut options = self.options.clone();
		if let Some(codec) = &config.codec {
			options.codec = Arc::clone(codec);
		}
		Birpc::from_parts(self.functions.clone(), Arc::clone(&config.channel), options)
	}
}

/// Serves one [`Functions`] set over a changing list of channels.
///
/// Every channel gets its own [`Birpc`] endpoint sharing the group's functions and options.
/// Cloning is cheap; clones manage the same group.
#[derive(Clone)]
pub struct BirpcGroup {
	inner: Arc<GroupInner>,
}

impl BirpcGroup {
	/// Creates a group and connects every channel.
	///
	/// # Panics
	///
	/// Panics if called outside of a tokio runtime.
	pub fn new(functions: Functions, channels: impl IntoIterator<Item = ChannelConfig>, options: BirpcOptions) -> Self {
		let inner = Arc::new(GroupInner {
			functions,
			options,
			clients: Mutex::new(Vec::new()),
		});
		let clients = channels
			.into_iter()
			.map(|config| {
				let config = Arc::new(config);
				let rpc = inner.connect(&config);
				Client { config, rpc }
			})
			.collect();
		*inner.clients.lock() = clients;
		Self { inner }
	}

	/// The endpoints, in channel order.
	pub fn clients(&self) -> Vec<Birpc> {
		self.inner.clients.lock().iter().map(|c| c.rpc.clone()).collect()
	}

	/// The current channel configurations.
	pub fn channels(&self) -> Vec<Arc<ChannelConfig>> {
		self.inner.clients.lock().iter().map(|c| Arc::clone(&c.config)).collect()
	}

	/// Edits the channel list and returns the refreshed endpoints.
	///
	/// Configurations still present keep their endpoint, new ones are connected and the
	/// endpoints of removed ones are closed. Concurrent updates apply one after the other;
	/// `update` runs while the group is locked and must not call back into it.
	pub fn update_channels(&self, update: impl FnOnce(&mut Vec<Arc<ChannelConfig>>)) -> Vec<Birpc> {
		let (removed, rpcs) = {
			let mut clients = self.inner.clients.lock();
			let mut configs: Vec<_> = clients.iter().map(|c| Arc::clone(&c.config)).collect();
			update(&mut configs);

			let mut previous = std::mem::take(&mut *clients);
			for config in configs {
				let kept = previous.iter().position(|c| Arc::ptr_eq(&c.config, &config));
				let client = match kept {
					Some(index) => previous.swap_remove(index),
					None => Client {
						rpc: self.inner.connect(&config),
						config,
					},
				};
				clients.push(client);
			}
			let rpcs: Vec<_> = clients.iter().map(|c| c.rpc.clone()).collect();
			(previous, rpcs)
		};
		debug!(clients = rpcs.len(), removed = removed.len(), "rpc.group.updated");
		for client in removed {
			client.rpc.close(None);
		}
		rpcs
	}

	/// A broadcast proxy over the current endpoints.
	///
	/// The endpoints are captured now; later channel updates do not affect it.
	pub fn broadcast(&self) -> Broadcast {
		Broadcast { clients: self.clients() }
	}

	/// The function set shared by every endpoint.
	pub fn functions(&self) -> &Functions {
		&self.inner.functions
	}

	/// Closes every endpoint.
	pub fn close(&self) {
		for rpc in self.clients() {
			rpc.close(None);
		}
	}
}

impl fmt::Debug for BirpcGroup {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BirpcGroup")
			.field("functions", &self.inner.functions)
			.field("clients", &self.inner.clients.lock().len())
			.finish()
	}
}

/// Calls every endpoint of a group at once.
#[derive(Debug, Clone)]
pub struct Broadcast {
	clients: Vec<Birpc>,
}

impl Broadcast {
	/// The endpoints this broadcast reaches.
	pub fn clients(&self) -> &[Birpc] {
		&self.clients
	}

	/// Calls `method` on every endpoint; results are in client order.
	///
	/// Fails with the first error if any call fails.
	pub fn call<R>(&self, method: &str, args: impl Serialize) -> BoxFuture<'static, Result<Vec<R>>>
	where
		R: DeserializeOwned + Send + 'static,
	{
		let args = match encode_args(args) {
			Ok(args) => args,
			Err(err) => return future::ready(Err(err)).boxed(),
		};
		let calls: Vec<_> = self.clients.iter().map(|rpc| rpc.call_value(method, args.clone())).collect();
		async move { future::try_join_all(calls).await?.into_iter().map(decode::<R>).collect() }.boxed()
	}

	/// Calls `method` on every endpoint and reports each outcome separately.
	pub fn call_all<R>(&self, method: &str, args: impl Serialize) -> BoxFuture<'static, Vec<Result<R>>>
	where
		R: DeserializeOwned + Send + 'static,
	{
		let args = match encode_args(args) {
			Ok(args) => args,
			Err(err) => return future::ready(self.clients.iter().map(|_| Err(err.clone())).collect()).boxed(),
		};
		let calls: Vec<_> = self.clients.iter().map(|rpc| rpc.call_value(method, args.clone())).collect();
		async move {
			future::join_all(calls)
				.await
				.into_iter()
				.map(|value| value.and_then(decode::<R>))
				.collect()
		}
		.boxed()
	}

	/// Sends `method` as an event to every endpoint.
	///
	/// Every endpoint is attempted; the first failure is returned.
	pub fn event(&self, method: &str, args: impl Serialize) -> Result<()> {
		let args = encode_args(args)?;
		self.clients
			.iter()
			.map(|rpc| rpc.event(method, args.clone()))
			.fold(Ok(()), |acc: Result<()>, sent| acc.and(sent))
	}

	/// A broadcast proxy for one remote method.
	pub fn remote(&self, method: impl Into<String>) -> BroadcastFn {
		BroadcastFn {
			broadcast: self.clone(),
			method: method.into(),
		}
	}
}

/// Proxy for one remote method across every endpoint of a [`Broadcast`].
#[derive(Debug, Clone)]
pub struct BroadcastFn {
	broadcast: Broadcast,
	method: String,
}

impl BroadcastFn {
	/// The remote method name.
	pub fn name(&self) -> &str {
		&self.method
	}

	/// See [`Broadcast::call`].
	pub fn call<R>(&self, args: impl Serialize) -> BoxFuture<'static, Result<Vec<R>>>
	where
		R: DeserializeOwned + Send + 'static,
	{
		self.broadcast.call(&self.method, args)
	}

	/// See [`Broadcast::call_all`].
	pub fn call_all<R>(&self, args: impl Serialize) -> BoxFuture<'static, Vec<Result<R>>>
	where
		R: DeserializeOwned + Send + 'static,
	{
		self.broadcast.call_all(&self.method, args)
	}

	/// See [`Broadcast::event`].
	pub fn event(&self, args: impl Serialize) -> Result<()> {
		self.broadcast.event(&self.method, args)
	}
}
