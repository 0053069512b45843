extern crate tokio;

use clap::Parser;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

pub mod cat240;
pub mod client;
pub mod network;
pub mod util;

use cat240::DecodeOptions;
use client::{
    Cat240Client, ChannelHandler, ClientConfig, ClientError, ClientEvent, ClientHandle, SourceSpec,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PACKAGE: &str = env!("CARGO_PKG_NAME");

// Events buffered per client before the consumer starts dropping them
const EVENT_DEPTH: usize = 256;

#[derive(Parser, Clone, Debug)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Receive on this interface only
    #[arg(short, long)]
    pub interface: Option<Ipv4Addr>,

    /// Radar video source, repeat for more than one:
    /// - `multicast:<group>:<port>` = join the group
    /// - `unicast:<sender>:<port>` = receive from a single sender on the local port
    /// - `listen:<port>` = receive from anybody on the local port
    #[arg(short, long = "source", required = true)]
    pub sources: Vec<SourceSpec>,

    /// Decode workers per source; more than one may reorder messages
    #[arg(short, long, default_value_t = 1)]
    pub workers: usize,

    /// Datagrams queued per source before new ones are dropped
    #[arg(long, default_value_t = 64)]
    pub queue: usize,

    /// Milliseconds to wait before reopening a failed socket
    #[arg(long, default_value_t = 1000)]
    pub reconnect_delay: u64,

    /// Milliseconds a source gets to finish its queued datagrams on shutdown
    #[arg(long, default_value_t = 5000)]
    pub stop_timeout: u64,

    /// Accept datagrams with a wrong category or resolution
    #[arg(long, default_value_t = false)]
    pub lenient: bool,

    /// Write decoded messages to stdout as JSON lines
    #[arg(long, default_value_t = false)]
    pub output: bool,
}

impl Cli {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            reconnect_delay_ms: self.reconnect_delay,
            stop_timeout_ms: self.stop_timeout,
            workers: self.workers,
            queue_depth: self.queue,
            decode: DecodeOptions {
                lenient: self.lenient,
            },
        }
    }
}

/// A started client and the events it produces.
pub struct Session {
    pub id: usize,
    pub source: SourceSpec,
    pub handle: ClientHandle,
    pub events: mpsc::Receiver<ClientEvent>,
}

///
/// Start one client subsystem per configured source. The events of each
/// client arrive on its own channel, so the caller decides how they are
/// consumed.
///
pub fn start_session(
    subsystem: &SubsystemHandle,
    args: &Cli,
) -> Result<Vec<Session>, ClientError> {
    if args.sources.is_empty() {
        return Err(ClientError::InvalidSource("no source given".to_string()));
    }
    let nic_addr = args.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let config = args.client_config();

    let sessions = args
        .sources
        .iter()
        .enumerate()
        .map(|(id, source)| {
            let (handler, events) = ChannelHandler::channel(EVENT_DEPTH);
            let client = Cat240Client::new(
                id,
                source.transport(nic_addr),
                Arc::new(handler),
                config.clone(),
            );
            let handle = client.handle();
            log::debug!("Starting {}", client.key());
            subsystem.start(SubsystemBuilder::new(
                format!("Cat240-{}", id),
                move |s| client.run_subsystem(s),
            ));

            Session {
                id,
                source: source.clone(),
                handle,
                events,
            }
        })
        .collect();

    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_arguments() {
        let args = Cli::try_parse_from([
            "cat240-server",
            "--source",
            "multicast:239.255.0.1:4379",
            "-s",
            "listen:4380",
            "--workers",
            "2",
            "--lenient",
            "--stop-timeout",
            "250",
        ])
        .unwrap();

        assert_eq!(args.sources.len(), 2);
        assert_eq!(args.sources[1], SourceSpec::Listener { port: 4380 });
        assert_eq!(args.interface, None);

        let config = args.client_config();
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.reconnect_delay_ms, 1000);
        assert_eq!(config.stop_timeout(), std::time::Duration::from_millis(250));
        assert!(config.decode.lenient);
    }

    #[test]
    fn rejects_bad_source() {
        assert!(Cli::try_parse_from(["cat240-server", "--source", "tcp:1.2.3.4:5"]).is_err());
        assert!(Cli::try_parse_from(["cat240-server"]).is_err());
    }
}
