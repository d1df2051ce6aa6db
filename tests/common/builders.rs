//! Test data builders for creating test objects

use exsync::config::ChannelConfig;
use exsync::transport::{MockPeer, MockTransport};
use exsync::{ChannelId, ChannelSpec, Direction, Link};

/// Builder for a link on top of the in-memory transport
pub struct LinkBuilder {
    instance_name: String,
    alias: Option<String>,
    channels: Vec<ChannelSpec>,
}

impl LinkBuilder {
    pub fn new(instance_name: &str) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            alias: None,
            channels: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn channel(mut self, spec: ChannelSpec) -> Self {
        self.channels.push(spec);
        self
    }

    /// Build the link; channel ids are returned in declaration order
    pub fn build(self) -> (Link, MockPeer, Vec<ChannelId>) {
        let (transport, peer) = MockTransport::new();
        let mut link = Link::new(self.instance_name, Box::new(transport));
        if let Some(alias) = self.alias {
            link = link.with_alias(alias);
        }
        let ids = self
            .channels
            .into_iter()
            .map(|spec| link.add_channel(spec).unwrap())
            .collect();
        (link, peer, ids)
    }
}

/// Builder for channel entries of a config file
pub struct ChannelConfigBuilder {
    config: ChannelConfig,
}

impl ChannelConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: ChannelConfig::new(name, Direction::Publish, 4),
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.config.direction = direction;
        self
    }

    pub fn byte_size(mut self, byte_size: usize) -> Self {
        self.config.byte_size = byte_size;
        self
    }

    pub fn buffered(mut self, capacity: usize) -> Self {
        self.config.buffered = true;
        self.config.buffer_capacity = capacity;
        self
    }

    pub fn build(self) -> ChannelConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_builder() {
        let (link, _peer, ids) = LinkBuilder::new("test")
            .alias("alias")
            .channel(ChannelSpec::publish("a", 4))
            .build();

        assert_eq!(link.instance_name(), "test");
        assert_eq!(link.alias(), Some("alias"));
        assert_eq!(ids, vec![ChannelId::new(0)]);
    }
}
