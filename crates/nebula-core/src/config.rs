//! Engine configuration types.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Default size of the intermediate copy buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Default capacity of a job's progress channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Configuration for the operation engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Size in bytes of the buffer used to stream file contents.
    #[builder(default = "DEFAULT_BUFFER_SIZE")]
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Number of snapshots that may queue up before the worker waits.
    #[builder(default = "DEFAULT_CHANNEL_CAPACITY")]
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Write to a temporary sibling and rename into place on success.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub atomic_writes: bool,

    /// Copy modification time and permission bits onto destinations.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub preserve_metadata: bool,
}

fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.buffer_size == Some(0) {
            return Err("Buffer size must be greater than zero".to_string());
        }
        if self.channel_capacity == Some(0) {
            return Err("Channel capacity must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Check a config that did not come through the builder (e.g. deserialized).
    pub fn validate(&self) -> Result<(), String> {
        EngineConfigBuilder::default()
            .buffer_size(self.buffer_size)
            .channel_capacity(self.channel_capacity)
            .validate()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            atomic_writes: true,
            preserve_metadata: true,
        }
    }
}
