use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::Statistics;
use super::handler::Cat240Handler;
use crate::cat240::{Cat240Message, DecodeOptions};
use crate::util::PrintableCells;

pub(crate) struct DecodeContext {
    pub key: String,
    pub client_id: usize,
    pub options: DecodeOptions,
    pub handler: Arc<dyn Cat240Handler>,
    pub statistics: Arc<Statistics>,
}

impl DecodeContext {
    fn process(&self, datagram: &[u8]) {
        let message = match Cat240Message::decode(datagram, &self.options) {
            Ok(message) => message,
            Err(e) => {
                self.statistics.decode_errors.fetch_add(1, Ordering::Relaxed);
                log::debug!("{}: dropping datagram: {}", self.key, e);
                return;
            }
        };

        if !message.is_valid() {
            self.statistics.invalid_spec.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "{}: field specification {:04X} matches no CAT240 layout",
                self.key,
                message.header.field_spec.bits()
            );
        }
        self.statistics.decoded.fetch_add(1, Ordering::Relaxed);

        log::trace!(
            "{}: #{:?} azimuth {:.2}..{:.2} cells {}",
            self.key,
            message.body.message_index,
            message.body.start_azimuth_in_degree,
            message.body.end_azimuth_in_degree,
            PrintableCells::new(&message.body)
        );

        self.handler.on_message_decoded(self.client_id, message);
    }
}

///
/// Decodes and dispatches datagrams off the receive loop. With one worker
/// messages reach the consumer in arrival order; with more they may not,
/// and consumers have to order on the message index themselves.
///
/// Dropping the pool without `drain` aborts the workers, so nothing reaches
/// the handler once the owning client is gone.
///
pub(crate) struct DecodePool {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePool {
    pub fn new(workers: usize, depth: usize, context: DecodeContext) -> Self {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let context = Arc::new(context);

        let workers = (0..workers.max(1))
            .map(|_| {
                let rx = rx.clone();
                let context = context.clone();
                tokio::spawn(async move {
                    loop {
                        let datagram = { rx.lock().await.recv().await };
                        match datagram {
                            Some(datagram) => context.process(&datagram),
                            None => break,
                        }
                    }
                })
            })
            .collect();

        DecodePool {
            tx: Some(tx),
            workers,
        }
    }

    /// Queue a datagram, handing it back when the queue is full.
    pub fn submit(&self, datagram: Vec<u8>) -> Result<(), Vec<u8>> {
        match &self.tx {
            Some(tx) => tx.try_send(datagram).map_err(|e| e.into_inner()),
            None => Err(datagram),
        }
    }

    /// Let the workers finish what is queued, then stop them.
    pub async fn drain(mut self) {
        self.tx = None;
        // Workers stay owned until they finish, so a cancelled drain still aborts them
        while let Some(worker) = self.workers.last_mut() {
            if let Err(e) = worker.await {
                log::error!("Decode worker failed: {}", e);
            }
            self.workers.pop();
        }
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
