extern crate tokio;

use cat240::cat240::SpecTracker;
use cat240::client::{ClientError, ClientEvent};
use cat240::{Cli, Session, VERSION};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use miette::Result;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputLine<'a> {
    client_id: usize,
    message: &'a cat240::cat240::Cat240Message,
}

struct Consumer {
    tracker: SpecTracker,
    output: bool,
}

impl Consumer {
    fn handle(&mut self, event: ClientEvent) -> Result<(), ClientError> {
        match event {
            ClientEvent::Connected { client_id, addr } => {
                info!("Source #{} connected on {}", client_id, addr);
                self.tracker.reset();
            }
            ClientEvent::Disconnected { client_id, addr } => {
                info!("Source #{} disconnected from {}", client_id, addr);
            }
            ClientEvent::Error {
                client_id,
                addr,
                error,
            } => {
                warn!("Source #{} on {}: {}", client_id, addr, error);
            }
            ClientEvent::Message { client_id, message } => {
                if self.tracker.observe(&message) {
                    let b = &message.body;
                    info!(
                        "Source #{}: {} cells of {} bits, cell duration {:?} {:?}",
                        client_id,
                        b.cell_count(),
                        b.video_resolution,
                        b.cell_duration,
                        b.duration_unit
                    );
                }
                if self.output {
                    let line = OutputLine {
                        client_id,
                        message: &message,
                    };
                    match serde_json::to_string(&line) {
                        Ok(json) => {
                            let mut stdout = std::io::stdout().lock();
                            writeln!(stdout, "{}", json)?;
                        }
                        Err(e) => warn!("Cannot serialize message: {}", e),
                    }
                }
            }
        }
        Ok(())
    }
}

///
/// Drains the events of one client, logging lifecycle changes and
/// optionally writing every message to stdout. On shutdown the client is
/// stopped first so the messages it still had queued are written too.
///
async fn consume(
    subsys: SubsystemHandle,
    mut session: Session,
    output: bool,
) -> Result<(), ClientError> {
    let mut consumer = Consumer {
        tracker: SpecTracker::new(),
        output,
    };

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {
                if let Err(e) = session.handle.shutdown().await {
                    warn!("Source #{} did not stop cleanly: {}", session.id, e);
                }
                while let Ok(event) = session.events.try_recv() {
                    consumer.handle(event)?;
                }
                break;
            },
            event = session.events.recv() => match event {
                Some(event) => consumer.handle(event)?,
                None => break,
            },
        }
    }

    log::debug!(
        "Source #{} ({:?}) done, {:?}",
        session.id,
        session.source,
        session.handle.statistics()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = args.verbose.log_level_filter();
    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    info!("CAT240 receiver {} loglevel {}", VERSION, log_level);
    if args.workers > 1 {
        warn!(
            "{} decode workers per source, messages may be delivered out of order",
            args.workers
        );
    }
    if args.output {
        warn!("Output mode activated; decoded messages are written to stdout as JSON");
    }

    // Clients get their stop timeout, the consumers a little longer
    let shutdown_timeout = args.client_config().stop_timeout() + Duration::from_millis(1000);

    Toplevel::new(|s| async move {
        match cat240::start_session(&s, &args) {
            Ok(sessions) => {
                for session in sessions {
                    let output = args.output;
                    s.start(SubsystemBuilder::new(
                        format!("Consumer-{}", session.id),
                        move |a| consume(a, session, output),
                    ));
                }
            }
            Err(e) => {
                log::error!("{}", e);
                s.request_shutdown();
            }
        }
    })
    .catch_signals()
    .handle_shutdown_requests(shutdown_timeout)
    .await
    .map_err(Into::into)
}
