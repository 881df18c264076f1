use birpc::{BirpcOptions, Error, Functions, JsonValue};
use pretty_assertions::assert_eq;

use crate::common::manual;

#[tokio::test]
async fn rejects_every_pending_call() {
	let (rpc, _channel) = manual(Functions::new(), BirpcOptions::default()).await;

	let first = rpc.call::<JsonValue>("first", ());
	let second = rpc.call::<JsonValue>("second", (1, 2));
	assert_eq!(rpc.pending_len(), 2);

	let rejected = rpc.reject_pending_calls(|call| {
		let method = call.method().to_owned();
		call.reject(Error::custom(format!("Rejected call. Method: \"{method}\".")));
		method
	});
	assert_eq!(rejected, vec!["first", "second"]);

	assert_eq!(first.await.unwrap_err().to_string(), "Rejected call. Method: \"first\".");
	assert_eq!(second.await.unwrap_err().to_string(), "Rejected call. Method: \"second\".");

	assert!(rpc.reject_pending_calls(|_| ()).is_empty());
}

#[tokio::test]
async fn endpoint_stays_usable() {
	let (rpc, _channel) = manual(Functions::new(), BirpcOptions::default()).await;
	let call = rpc.call::<JsonValue>("first", ());
	let args: Vec<_> = rpc.reject_pending_calls(|call| call.args().to_vec());
	assert_eq!(args, vec![Vec::<JsonValue>::new()]);
	assert!(matches!(call.await, Err(Error::Cancelled { method }) if method == "first"));

	assert!(!rpc.is_closed());
	let _again = rpc.call::<JsonValue>("first", ());
	assert_eq!(rpc.pending_len(), 1);
}
