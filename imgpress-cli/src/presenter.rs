//! Delivers previews to a callback on one dedicated thread.
//!
//! The callback never runs on the async runtime, so it may block (render,
//! print, hand off to a UI toolkit) without stalling stage executions.
//! [`PresenterHandle::present`] resolves once the callback has returned, which
//! makes the display stage's ordering the delivery ordering.

use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::preview::Preview;

#[derive(Debug, Error)]
#[error("presenter thread has stopped")]
pub struct PresenterClosed;

enum Message {
    Present(Preview, oneshot::Sender<()>),
    Stop,
}

/// Cloneable sender side used by the display stage.
#[derive(Clone)]
pub struct PresenterHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl PresenterHandle {
    pub async fn present(&self, preview: Preview) -> Result<(), PresenterClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Message::Present(preview, ack_tx))
            .map_err(|_| PresenterClosed)?;
        ack_rx.await.map_err(|_| PresenterClosed)
    }
}

pub struct Presenter {
    handle: PresenterHandle,
    thread: JoinHandle<u64>,
}

impl Presenter {
    pub fn spawn<F>(mut callback: F) -> std::io::Result<Self>
    where
        F: FnMut(Preview) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("imgpress-presenter".to_string())
            .spawn(move || {
                let mut delivered = 0u64;
                while let Some(message) = rx.blocking_recv() {
                    match message {
                        Message::Present(preview, ack) => {
                            callback(preview);
                            delivered += 1;
                            let _ = ack.send(());
                        }
                        Message::Stop => break,
                    }
                }
                debug!(delivered, "Presenter stopped");
                delivered
            })?;

        Ok(Self {
            handle: PresenterHandle { tx },
            thread,
        })
    }

    pub fn handle(&self) -> PresenterHandle {
        self.handle.clone()
    }

    /// Stop the thread after pending deliveries and return how many previews
    /// it delivered. Blocks; call from a blocking context.
    pub fn shutdown(self) -> u64 {
        let _ = self.handle.tx.send(Message::Stop);
        match self.thread.join() {
            Ok(delivered) => delivered,
            Err(_) => {
                warn!("Presenter callback panicked");
                0
            }
        }
    }
}
