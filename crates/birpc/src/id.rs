//! Random correlation tokens for in-flight calls.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// URL-safe alphabet ids are drawn from.
pub const URL_ALPHABET: &[u8; 64] = b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";

/// Default id length.
pub const DEFAULT_ID_LEN: usize = 21;

/// Generates a random id of `size` characters from [`URL_ALPHABET`].
///
/// There is no counter behind this; uniqueness is probabilistic only.
pub fn nanoid(size: usize) -> String {
	let mut rng = rand::rng();
	(0..size)
		.map(|_| char::from(URL_ALPHABET[rng.random_range(0..URL_ALPHABET.len())]))
		.collect()
}

/// Correlation token tying a response to the request that asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
	/// Generates a fresh random id of [`DEFAULT_ID_LEN`] characters.
	pub fn generate() -> Self {
		Self(nanoid(DEFAULT_ID_LEN))
	}

	/// Returns the id as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for CallId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for CallId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<&str> for CallId {
	fn from(id: &str) -> Self {
		Self(id.to_owned())
	}
}
