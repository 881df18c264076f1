use async_trait::async_trait;
use birpc::{Birpc, BirpcOptions, Channel, Error, Functions, InboundSink, JsonValue, Result};
use pretty_assertions::assert_eq;

use crate::common::{init_tracing, manual, peers, wait_until};

#[tokio::test]
async fn close_rejects_pending_and_later_calls() {
	let (rpc, channel) = manual(Functions::new(), BirpcOptions::default()).await;

	let pending = rpc.call::<JsonValue>("hello", ());
	wait_until(|| channel.posted().len() == 1).await;

	rpc.close(None);
	let err = pending.await.unwrap_err();
	assert_eq!(err.to_string(), "rpc is closed, cannot call \"hello\"");
	assert!(rpc.is_closed());

	let err = rpc.call::<JsonValue>("hello", ()).await.unwrap_err();
	assert!(matches!(err, Error::Closed { method } if method == "hello"));
	assert!(matches!(rpc.event("bump", ()), Err(Error::Closed { .. })));
	assert!(rpc.call_stream("gen", ()).is_err());

	tokio::task::yield_now().await;
	assert_eq!(channel.posted().len(), 1);
	assert_eq!(rpc.pending_len(), 0);
}

#[tokio::test]
async fn close_is_idempotent() {
	let (rpc, channel) = manual(Functions::new(), BirpcOptions::default()).await;
	let pending = rpc.call::<JsonValue>("hello", ());

	rpc.close(Some(Error::custom("peer went away")));
	rpc.close(None);
	rpc.clone().close(Some(Error::custom("again")));

	assert_eq!(pending.await.unwrap_err().to_string(), "peer went away");
	assert_eq!(channel.offs(), 1);
	assert!(!channel.is_listening());
}

#[tokio::test]
async fn closed_endpoint_ignores_inbound() {
	let peers = peers();
	peers.alice.close(None);
	let err = peers.bob.call::<String>("hello", ("Bob",));
	peers.bob.close(Some(Error::custom("gave up")));
	assert_eq!(err.await.unwrap_err().to_string(), "gave up");
}

struct BrokenChannel;

#[async_trait]
impl Channel for BrokenChannel {
	async fn post(&self, _payload: JsonValue, _extra: Vec<JsonValue>) -> Result<()> {
		Ok(())
	}

	async fn on(&self, _sink: InboundSink) -> Result<()> {
		Err(Error::Transport("port unavailable".into()))
	}
}

#[tokio::test]
async fn failed_listener_setup_closes_endpoint() {
	init_tracing();
	let rpc = Birpc::new(Functions::new(), BrokenChannel, BirpcOptions::default());
	let err = rpc.call::<JsonValue>("hello", ()).await.unwrap_err();
	assert_eq!(err.to_string(), "transport error: port unavailable");
	assert!(rpc.is_closed());
}
