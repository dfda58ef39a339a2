//! Server configuration.

use std::fmt;
use std::time::Duration;
use vault_protocol::{CHUNK_SIZE, MAX_FILE_SIZE};
use zeroize::Zeroizing;

/// Configuration for the vault server.
#[derive(Clone)]
pub struct ServerConfig {
    /// Serials reserved from the backing counter per round trip.
    pub serial_batch_size: u64,
    /// Lifetime of an issued token.
    pub token_ttl: Duration,
    /// HMAC key for token signatures.
    pub token_key: Zeroizing<Vec<u8>>,
    /// Largest accepted file upload.
    pub max_file_size: usize,
    /// Largest file chunk, in either direction.
    pub chunk_size: usize,
    /// Capacity of the merged update channel.
    pub stream_buffer: usize,
}

impl ServerConfig {
    /// Creates a configuration with defaults and an empty token key.
    ///
    /// An empty key is replaced by a random one when the server starts.
    pub fn new() -> Self {
        Self {
            serial_batch_size: 10,
            token_ttl: Duration::from_secs(2 * 60 * 60),
            token_key: Zeroizing::new(Vec::new()),
            max_file_size: MAX_FILE_SIZE,
            chunk_size: CHUNK_SIZE,
            stream_buffer: 64,
        }
    }

    /// Sets the serial batch size.
    pub fn with_serial_batch_size(mut self, size: u64) -> Self {
        self.serial_batch_size = size;
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Sets the token signing key.
    pub fn with_token_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.token_key = Zeroizing::new(key.into());
        self
    }

    /// Sets the maximum upload size.
    pub fn with_max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the file chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the update channel capacity.
    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("serial_batch_size", &self.serial_batch_size)
            .field("token_ttl", &self.token_ttl)
            .field("token_key", &format_args!("<{} bytes>", self.token_key.len()))
            .field("max_file_size", &self.max_file_size)
            .field("chunk_size", &self.chunk_size)
            .field("stream_buffer", &self.stream_buffer)
            .finish()
    }
}
