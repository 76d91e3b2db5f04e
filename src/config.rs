use linkcore::{DecodePolicy, Framing};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Receive-side behaviour of a [`SocketClient`](crate::client::SocketClient).
///
/// Responses are always decoded as UTF-8; `decode_policy` decides what happens
/// to bytes that are not.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub framing: Framing,
    pub decode_policy: DecodePolicy,
    /// Largest accepted response unit in bytes. `None` lets unframeable data
    /// accumulate without bound.
    pub max_buffer_size: Option<NonZeroUsize>,
}

impl ClientConfig {
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    pub fn with_max_buffer_size(mut self, max: usize) -> Self {
        self.max_buffer_size = NonZeroUsize::new(max);
        self
    }
}
