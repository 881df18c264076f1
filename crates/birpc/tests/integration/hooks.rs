use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use birpc::{
	Bind, BirpcOptions, Error, JsonValue, RemoteError, RequestAction, ResponseReason, function,
	function_with_context,
};
use futures::FutureExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{greeting, peers, peers_with};

#[tokio::test]
async fn request_hook_answers_from_cache() {
	let invoked = Arc::new(AtomicUsize::new(0));
	let answers: Arc<Mutex<HashMap<String, JsonValue>>> = Arc::default();

	let lookup = Arc::clone(&answers);
	let store = Arc::clone(&answers);
	let options = BirpcOptions::new()
		.on_request(move |req| match lookup.lock().get(&JsonValue::Array(req.args.clone()).to_string()) {
			Some(value) => RequestAction::Respond(value.clone()),
			None => RequestAction::Proceed,
		})
		.on_response(move |resp, req, reason| {
			if reason == ResponseReason::Ok
				&& let Some(result) = &resp.result
			{
				store.lock().insert(JsonValue::Array(req.args.clone()).to_string(), result.clone());
			}
		});
	let peers = peers_with(options, BirpcOptions::default());

	let counter = Arc::clone(&invoked);
	peers.alice.functions().insert(
		"hello",
		function(move |(name,): (String,)| {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok::<_, RemoteError>(greeting(&name))
		}),
	);

	for _ in 0..3 {
		let reply: String = peers.bob.call("hello", ("Bob",)).await.unwrap();
		assert_eq!(reply, greeting("Bob"));
	}
	assert_eq!(invoked.load(Ordering::SeqCst), 1);

	let reply: String = peers.bob.call("hello", ("Carol",)).await.unwrap();
	assert_eq!(reply, greeting("Carol"));
	assert_eq!(invoked.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn skipped_request_is_answered_by_response_hook() {
	let options = BirpcOptions::new()
		.on_request(|req| match req.method.as_str() {
			"secret" => RequestAction::Skip,
			_ => RequestAction::Proceed,
		})
		.on_response(|resp, req, reason| {
			if reason == ResponseReason::Abort && req.method == "secret" {
				resp.result = Some(json!("overridden"));
			}
		});
	let peers = peers_with(options, BirpcOptions::default());

	let reply: String = peers.bob.call("secret", ()).await.unwrap();
	assert_eq!(reply, "overridden");
	let reply: String = peers.bob.call("hello", ("Bob",)).await.unwrap();
	assert_eq!(reply, greeting("Bob"));
}

#[tokio::test]
async fn skipped_request_without_response_hook_yields_null() {
	let options = BirpcOptions::new().on_request(|_| RequestAction::Skip);
	let peers = peers_with(options, BirpcOptions::default());
	let reply: JsonValue = peers.bob.call("hello", ("Bob",)).await.unwrap();
	assert_eq!(reply, JsonValue::Null);
}

#[tokio::test]
async fn retry_is_signalled_to_caller() {
	let busy = Arc::new(Mutex::new(true));
	let check = Arc::clone(&busy);
	let options = BirpcOptions::new().on_request_async(move |_| {
		let busy = *check.lock();
		async move {
			tokio::task::yield_now().await;
			if busy { RequestAction::Retry } else { RequestAction::Proceed }
		}
		.boxed()
	});
	let peers = peers_with(options, BirpcOptions::default());

	let err = peers.bob.call::<String>("hello", ("Bob",)).await.unwrap_err();
	assert!(err.as_remote().unwrap().is_retry());

	*busy.lock() = false;
	let reply: String = peers.bob.call("hello", ("Bob",)).await.unwrap();
	assert_eq!(reply, greeting("Bob"));
}

#[tokio::test]
async fn response_hook_sees_every_reason() {
	let reasons = Arc::new(Mutex::new(Vec::new()));
	let log = Arc::clone(&reasons);
	let options = BirpcOptions::new()
		.on_request(|req| match req.method.as_str() {
			"cached" => RequestAction::Respond(json!(1)),
			_ => RequestAction::Proceed,
		})
		.on_response(move |_, req, reason| log.lock().push((req.method.clone(), reason)));
	let peers = peers_with(options, BirpcOptions::default());

	let _: String = peers.bob.call("hello", ("Bob",)).await.unwrap();
	assert!(peers.bob.call::<JsonValue>("nope", ()).await.is_err());
	let _: i64 = peers.bob.call("cached", ()).await.unwrap();

	assert_eq!(
		*reasons.lock(),
		vec![
			("hello".to_owned(), ResponseReason::Ok),
			("nope".to_owned(), ResponseReason::Error),
			("cached".to_owned(), ResponseReason::Abort),
		]
	);
}

#[tokio::test]
async fn response_hook_can_rewrite_errors() {
	let options = BirpcOptions::new().on_response(|resp, _, reason| {
		if reason == ResponseReason::Error
			&& let Some(err) = &mut resp.error
		{
			err.message = format!("[alice] {}", err.message);
		}
	});
	let peers = peers_with(options, BirpcOptions::default());
	let err = peers.bob.call::<JsonValue>("nope", ()).await.unwrap_err();
	assert_eq!(err.to_string(), "[alice] function \"nope\" not found");
}

#[tokio::test]
async fn functions_can_call_back_through_the_endpoint() {
	let peers = peers();
	peers.alice.functions().insert(
		"relay",
		function_with_context(|ctx, (name,): (String,)| async move {
			let rpc = ctx.rpc().ok_or("unbound")?.clone();
			let hi: String = rpc.call("hi", (name,)).await.map_err(|e| RemoteError::function(e.to_string()))?;
			Ok::<_, RemoteError>(format!("{} says: {hi}", ctx.method()))
		}),
	);

	let reply: String = peers.bob.call("relay", ("Carol",)).await.unwrap();
	assert_eq!(reply, "relay says: Hi Carol, I am Bob");
}

#[tokio::test]
async fn functions_binding_exposes_local_set() {
	let peers = peers_with(BirpcOptions::new().bind(Bind::Functions), BirpcOptions::default());
	peers.alice.functions().insert(
		"list",
		function_with_context(|ctx, (): ()| async move {
			assert!(ctx.rpc().is_none());
			let functions = ctx.functions().ok_or("unbound")?;
			Ok::<_, RemoteError>(functions.names())
		}),
	);

	let names: Vec<String> = peers.bob.call("list", ()).await.unwrap();
	assert_eq!(names, vec!["hello", "helloAsyncError", "helloAsyncGenerator", "list"]);
}

#[tokio::test]
async fn error_hooks_do_not_change_success() {
	let calls = Arc::new(AtomicUsize::new(0));
	let seen = Arc::clone(&calls);
	let options = BirpcOptions::new().on_function_error(move |_, _, _| {
		seen.fetch_add(1, Ordering::SeqCst);
		false
	});
	let peers = peers_with(options, BirpcOptions::default());
	let _: String = peers.bob.call("hello", ("Bob",)).await.unwrap();
	assert_eq!(calls.load(Ordering::SeqCst), 0);
	assert!(matches!(peers.bob.call::<String>("nope", ()).await, Err(Error::Remote(_))));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}
