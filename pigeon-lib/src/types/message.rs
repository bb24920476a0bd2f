use std::fmt::{self, Display};

use bytes::Bytes;

/// A single payload to deliver.
///
/// Messages are opaque to the dispatcher: no parsing, no validation, no
/// size limit. The bytes are reference-counted, so cloning is cheap and the
/// same payload can travel into a delivery worker and, on failure, back out
/// through the error callback without being copied.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Message {
    bytes: Bytes,
}

impl Message {
    /// Creates a message from anything byte-shaped
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The raw payload
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for a zero-length payload, which is still a valid message
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(text.as_bytes()),
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self {
            bytes: Bytes::from(text),
        }
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Bytes::from(bytes),
        }
    }
}

impl From<&[u8]> for Message {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(bytes),
        }
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl From<Message> for reqwest::Body {
    fn from(message: Message) -> Self {
        reqwest::Body::from(message.bytes)
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Display for Message {
    /// Lossy UTF-8 rendering, meant for logs and error reports
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}
