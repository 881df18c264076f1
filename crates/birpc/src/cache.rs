//! Memoised remote calls.

use std::collections::HashMap;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::Result;

type CachedCall = Shared<BoxFuture<'static, Result<JsonValue>>>;

/// Results of cached calls, keyed by method and then by encoded arguments.
///
/// A call in flight is cached too, so concurrent identical calls share one request.
#[derive(Default)]
pub(crate) struct CallCache {
	entries: Mutex<HashMap<String, HashMap<String, CachedCall>>>,
}

impl CallCache {
	pub(crate) fn get_or_insert(
		&self,
		method: &str,
		key: &str,
		call: impl FnOnce() -> BoxFuture<'static, Result<JsonValue>>,
	) -> CachedCall {
		let mut entries = self.entries.lock();
		let calls = entries.entry(method.to_owned()).or_default();
		if let Some(cached) = calls.get(key) {
			return cached.clone();
		}
		let cached = call().shared();
		calls.insert(key.to_owned(), cached.clone());
		cached
	}

	pub(crate) fn evict(&self, method: &str, key: &str) {
		if let Some(calls) = self.entries.lock().get_mut(method) {
			calls.remove(key);
		}
	}

	pub(crate) fn clear(&self, method: Option<&str>) {
		let mut entries = self.entries.lock();
		match method {
			Some(method) => {
				entries.remove(method);
			}
			None => entries.clear(),
		}
	}

	#[cfg(test)]
	fn len(&self) -> usize {
		self.entries.lock().values().map(HashMap::len).sum()
	}
}
