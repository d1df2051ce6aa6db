//! exsync demo - Main Entry Point
//!
//! Runs a cyclic driver against the in-memory transport. The peer side feeds
//! every subscribed channel with counter values while the owner side changes
//! its published values now and then, so the whole lifecycle and the
//! buffering can be watched in the log.
//!
//! Usage: `exsync [CONFIG] [CYCLES]`

use anyhow::Context;
use exsync::{
    config::{ChannelConfig, SyncConfig},
    logging,
    transport::MockTransport,
    ChannelId, CyclicDriver, Direction, Link, LogServer,
};

const DEFAULT_CYCLES: usize = 300;

/// Nettime advance per cycle, in microseconds
const NETTIME_STEP_US: i32 = 10_000;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SyncConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => SyncConfig::load_default().context("loading default config")?,
    };
    let cycles = match args.next() {
        Some(n) => n.parse().with_context(|| format!("invalid cycle count '{}'", n))?,
        None => DEFAULT_CYCLES,
    };
    let config = if config.link.channels.is_empty() {
        demo_config()
    } else {
        config
    };

    // Keep the guard alive so the file writer is flushed on exit
    let _guard = logging::init(&config.log)?;
    tracing::info!(
        "Starting exsync demo: link {} with {} channel(s), {} cycles",
        config.link.instance_name,
        config.link.channels.len(),
        cycles
    );

    let mut log_server = LogServer::new(config.log.default_filter.clone())?;
    let logger = log_server.subscribe(&config.log.module_name)?;

    let (transport, peer) = MockTransport::new();
    let link = Link::from_config(&config.link, Box::new(transport))?;
    let mut driver = CyclicDriver::new(link).with_logger(logger);

    let channels: Vec<(ChannelId, Direction, bool, usize)> = driver
        .link()
        .channels()
        .iter()
        .map(|c| (c.id(), c.direction(), c.is_buffered(), c.byte_size()))
        .collect();

    let mut nettime: i32 = 0;
    for cycle in 0..cycles {
        nettime = nettime.wrapping_add(NETTIME_STEP_US);
        peer.set_nettime(nettime);

        for &(id, direction, buffered, size) in &channels {
            // buffered channels get bursts, single-slot ones a steady trickle
            let burst = if buffered && cycle % 50 == 25 { 25 } else { 1 };
            if direction.can_subscribe() && cycle % 5 == 0 {
                for n in 0..burst {
                    peer.update_at(id, counter_bytes(cycle + n, size), nettime.wrapping_sub(150));
                }
            }
        }

        let status = driver.cycle(true, true);

        for &(id, direction, buffered, size) in &channels {
            if buffered {
                let buffer = driver.update_buffered(id, true)?;
                if buffer.updated && buffer.pending > 0 {
                    tracing::trace!("{} samples pending on {}", buffer.pending, id);
                }
            } else if direction.can_publish() && cycle % 50 == 0 {
                driver.image_mut().set(id, &counter_bytes(cycle / 50, size))?;
            }
        }

        log_server.process();
        for record in log_server.drain_records() {
            tracing::info!(target: "exsync::log_server", "{}", record);
        }

        if status.aborted {
            tracing::warn!("Link aborted: {:?}", driver.link().last_error());
        }
        std::thread::sleep(config.driver.cycle_time());
    }

    driver.cycle(false, false);

    for channel in driver.link().channels() {
        tracing::info!(
            "{}: published {}, delivered {}, overflows {}, avg latency {:.0}us",
            channel.name(),
            channel.published_count(),
            channel.delivered_count(),
            channel.overflow_count(),
            channel.latency().avg_latency_us()
        );
    }
    tracing::info!("Peer received {} frame(s)", peer.sent().len());

    Ok(())
}

/// Channel layout used when no channels are configured
fn demo_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.link.instance_name = "BufferFub_0".to_string();
    let mut sample = ChannelConfig::new("bufferedSample", Direction::Subscribe, 4);
    sample.buffered = true;
    config.link.channels = vec![
        sample,
        ChannelConfig::new("setup", Direction::Publish, 8),
        ChannelConfig::new("cmdSendBurst", Direction::Publish, 1),
    ];
    config.log.module_name = "gBufferFub_0".to_string();
    config
}

/// Little-endian counter padded or cut to `size` bytes
fn counter_bytes(value: usize, size: usize) -> Vec<u8> {
    let mut bytes = (value as u64).to_le_bytes().to_vec();
    bytes.resize(size, 0);
    bytes
}
