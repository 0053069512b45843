use std::io;
use std::net::SocketAddrV4;
use tokio::sync::mpsc;

use crate::cat240::Cat240Message;

///
/// The consumer side of a client. Message callbacks run on the decode
/// workers, the others on the receive loop, so implementations must be
/// cheap or hand the work off.
///
pub trait Cat240Handler: Send + Sync {
    fn on_connected(&self, _client_id: usize, _addr: SocketAddrV4) {}

    fn on_message_decoded(&self, client_id: usize, message: Cat240Message);

    fn on_disconnected(&self, _client_id: usize, _addr: SocketAddrV4) {}

    fn on_error(&self, _client_id: usize, _addr: SocketAddrV4, _error: &io::Error) {}
}

#[derive(Debug)]
pub enum ClientEvent {
    Connected {
        client_id: usize,
        addr: SocketAddrV4,
    },
    Message {
        client_id: usize,
        message: Box<Cat240Message>,
    },
    Disconnected {
        client_id: usize,
        addr: SocketAddrV4,
    },
    Error {
        client_id: usize,
        addr: SocketAddrV4,
        error: String,
    },
}

///
/// Forwards every callback into a channel, for consumers that want to
/// process messages in their own task.
///
pub struct ChannelHandler {
    tx: mpsc::Sender<ClientEvent>,
}

impl ChannelHandler {
    pub fn new(tx: mpsc::Sender<ClientEvent>) -> Self {
        ChannelHandler { tx }
    }

    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(depth);
        (ChannelHandler { tx }, rx)
    }

    fn send(&self, event: ClientEvent) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    log::warn!("Consumer is not keeping up, dropping {:?}", EventKind(&event));
                }
                mpsc::error::TrySendError::Closed(_) => {
                    log::trace!("Consumer has gone away");
                }
            }
        }
    }
}

impl Cat240Handler for ChannelHandler {
    fn on_connected(&self, client_id: usize, addr: SocketAddrV4) {
        self.send(ClientEvent::Connected { client_id, addr });
    }

    fn on_message_decoded(&self, client_id: usize, message: Cat240Message) {
        self.send(ClientEvent::Message {
            client_id,
            message: Box::new(message),
        });
    }

    fn on_disconnected(&self, client_id: usize, addr: SocketAddrV4) {
        self.send(ClientEvent::Disconnected { client_id, addr });
    }

    fn on_error(&self, client_id: usize, addr: SocketAddrV4, error: &io::Error) {
        self.send(ClientEvent::Error {
            client_id,
            addr,
            error: error.to_string(),
        });
    }
}

// Logs the event without dumping all the cells
struct EventKind<'a>(&'a ClientEvent);

impl std::fmt::Debug for EventKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            ClientEvent::Connected { client_id, .. } => write!(f, "connect of #{}", client_id),
            ClientEvent::Message { client_id, message } => write!(
                f,
                "message {:?} of #{}",
                message.body.message_index, client_id
            ),
            ClientEvent::Disconnected { client_id, .. } => {
                write!(f, "disconnect of #{}", client_id)
            }
            ClientEvent::Error { client_id, .. } => write!(f, "error of #{}", client_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cat240::testdata::VideoDatagram;
    use crate::cat240::DecodeOptions;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn channel_handler_forwards() {
        let (handler, mut rx) = ChannelHandler::channel(4);
        let addr = SocketAddrV4::new(Ipv4Addr::new(239, 1, 1, 1), 4379);
        let message =
            Cat240Message::decode(&VideoDatagram::default().encode(), &DecodeOptions::default())
                .unwrap();

        handler.on_connected(3, addr);
        handler.on_message_decoded(3, message.clone());
        handler.on_error(3, addr, &io::Error::other("boom"));
        handler.on_disconnected(3, addr);

        assert!(matches!(
            rx.recv().await,
            Some(ClientEvent::Connected { client_id: 3, .. })
        ));
        match rx.recv().await {
            Some(ClientEvent::Message { client_id, message: m }) => {
                assert_eq!(client_id, 3);
                assert_eq!(*m, message);
            }
            e => panic!("Unexpected {:?}", e),
        }
        match rx.recv().await {
            Some(ClientEvent::Error { error, .. }) => assert_eq!(error, "boom"),
            e => panic!("Unexpected {:?}", e),
        }
        assert!(matches!(
            rx.recv().await,
            Some(ClientEvent::Disconnected { client_id: 3, .. })
        ));
    }

    #[test]
    fn full_channel_drops() {
        let (handler, mut rx) = ChannelHandler::channel(1);
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1);
        handler.on_connected(1, addr);
        handler.on_disconnected(1, addr);
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Connected { .. })));
        assert!(rx.try_recv().is_err());
    }
}
