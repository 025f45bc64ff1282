//! Connection and call identifiers.
//!
//! Both are random alphanumeric strings. At the default length of 22
//! characters the space is about 2^131, so concurrent ids never collide in
//! practice; callers still check their pending tables before use.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

pub const DEFAULT_ID_LENGTH: usize = 22;

/// Generates a random alphanumeric id of `length` characters.
pub fn generate_id(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate(length: usize) -> Self {
                Self(generate_id(length))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// Names one handshake. Shared by both peers once the host assigns it.
    ConnectionId
}

string_id! {
    /// Names one outstanding call, unique among the calls in flight on a
    /// connection.
    CallId
}
