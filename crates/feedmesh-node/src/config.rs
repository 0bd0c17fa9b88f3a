//! Node configuration

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use feedmesh_core::{
    Chain, FeedError, FeedIdentity, FeedKey, FeedResult, PrivateKey, DEFAULT_MAX_VALUE_SIZE,
};

/// feedmesh node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Feed this node replicates
    pub feed_key: FeedKey,
    /// Secret used in session handshakes
    pub private_key: PrivateKey,
    /// Full replication: peers want everything, so no range requests
    pub full: bool,
    /// Initial trust chain
    pub chain: Chain,
    /// Peer poll interval, also the service housekeeping period
    pub poll_interval: Duration,
    /// Largest accepted value in bytes
    pub max_value_size: usize,
    /// Service command queue depth
    pub command_buffer: usize,
}

impl NodeConfig {
    pub fn new(feed_key: FeedKey, private_key: PrivateKey) -> Self {
        NodeConfig {
            feed_key,
            private_key,
            full: true,
            chain: Chain::empty(),
            poll_interval: Duration::from_secs(1),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            command_buffer: 256,
        }
    }

    /// Configuration for a feed owned by `identity`
    pub fn from_identity(identity: &FeedIdentity) -> Self {
        Self::new(identity.feed_key(), identity.private_key())
    }

    /// Range-restricted replication
    pub fn partial(mut self) -> Self {
        self.full = false;
        self
    }

    pub fn with_full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_value_size(mut self, max_value_size: usize) -> Self {
        self.max_value_size = max_value_size;
        self
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.private_key.is_empty() {
            return Err(FeedError::InvalidArgument(
                "private key must not be empty".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(FeedError::InvalidConfig(
                "poll_interval must be non-zero".into(),
            ));
        }
        if self.max_value_size == 0 {
            return Err(FeedError::InvalidConfig(
                "max_value_size must be non-zero".into(),
            ));
        }
        if self.command_buffer == 0 {
            return Err(FeedError::InvalidConfig(
                "command_buffer must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Tunables loadable from a settings file. Keys never live here.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSettings {
    pub full: bool,
    #[serde(deserialize_with = "human_duration")]
    pub poll_interval: Duration,
    pub max_value_size: usize,
    pub command_buffer: usize,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            full: true,
            poll_interval: Duration::from_secs(1),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            command_buffer: 256,
        }
    }
}

impl NodeSettings {
    pub fn from_json(json: &str) -> FeedResult<Self> {
        serde_json::from_str(json).map_err(|e| FeedError::InvalidConfig(e.to_string()))
    }

    /// Overlay these settings on `config`
    pub fn apply(self, mut config: NodeConfig) -> NodeConfig {
        config.full = self.full;
        config.poll_interval = self.poll_interval;
        config.max_value_size = self.max_value_size;
        config.command_buffer = self.command_buffer;
        config
    }
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}
