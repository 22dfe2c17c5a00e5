//! Fan-out link.
//!
//! Every item is copied once per target. Each target is fed by its own
//! bounded lane and forwarder task, so a slow target only stalls its siblings
//! once its lane is full.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancellation::or_cancelled;
use crate::link::LinkOptions;
use crate::stage::Target;
use crate::{AdmissionRejected, PipelineContext};

type Cloner<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

struct Lane<T> {
    target: Arc<dyn Target<T>>,
    tx: mpsc::Sender<T>,
    forwarder: JoinHandle<()>,
}

pub struct Broadcast<T> {
    name: &'static str,
    context: Arc<PipelineContext>,
    lanes: Vec<Lane<T>>,
    cloner: Cloner<T>,
    options: LinkOptions,
}

impl<T> Broadcast<T>
where
    T: Send + 'static,
{
    /// Broadcast using `Clone` to produce the copies.
    pub fn new(
        name: &'static str,
        context: Arc<PipelineContext>,
        targets: Vec<Arc<dyn Target<T>>>,
        lane_capacity: usize,
        options: LinkOptions,
    ) -> Self
    where
        T: Clone,
    {
        Self::with_cloner(name, context, targets, lane_capacity, options, T::clone)
    }

    /// Broadcast using `cloner` to produce each target's copy.
    pub fn with_cloner(
        name: &'static str,
        context: Arc<PipelineContext>,
        targets: Vec<Arc<dyn Target<T>>>,
        lane_capacity: usize,
        options: LinkOptions,
        cloner: impl Fn(&T) -> T + Send + Sync + 'static,
    ) -> Self {
        let lanes = targets
            .into_iter()
            .map(|target| {
                let (tx, rx) = mpsc::channel(lane_capacity.max(1));
                let forwarder = tokio::spawn(forward_lane(name, target.clone(), rx));
                Lane {
                    target,
                    tx,
                    forwarder,
                }
            })
            .collect();

        Self {
            name,
            context,
            lanes,
            cloner: Arc::new(cloner),
            options,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue one copy of `item` on every lane.
    ///
    /// Succeeds when at least one lane took its copy.
    pub(crate) async fn forward(&self, item: T) -> Result<(), AdmissionRejected> {
        let Some((last, rest)) = self.lanes.split_last() else {
            return Ok(());
        };

        let mut accepted = 0usize;
        for lane in rest {
            let copy = (self.cloner)(&item);
            if self.send_to(lane, copy).await? {
                accepted += 1;
            }
        }
        if self.send_to(last, item).await? {
            accepted += 1;
        }

        if accepted == 0 {
            Err(AdmissionRejected::Completed(self.name))
        } else {
            Ok(())
        }
    }

    async fn send_to(&self, lane: &Lane<T>, item: T) -> Result<bool, AdmissionRejected> {
        match or_cancelled(&self.context.token, lane.tx.send(item)).await {
            Some(Ok(())) => Ok(true),
            // Forwarder stopped: that target no longer accepts items.
            Some(Err(_)) => Ok(false),
            None => Err(AdmissionRejected::Cancelled(self.name)),
        }
    }

    /// Flush every lane, then complete the targets if configured to.
    pub(crate) async fn finish(self) {
        let mut targets = Vec::with_capacity(self.lanes.len());
        let mut forwarders = Vec::with_capacity(self.lanes.len());
        for lane in self.lanes {
            drop(lane.tx);
            targets.push(lane.target);
            forwarders.push(lane.forwarder);
        }

        for forwarder in forwarders {
            if let Err(e) = forwarder.await {
                warn!(broadcast = self.name, error = %e, "Broadcast forwarder failed");
            }
        }

        if self.options.propagate_completion {
            for target in targets {
                debug!(broadcast = self.name, target_stage = target.name(), "Propagating completion");
                target.complete();
            }
        }
    }
}

async fn forward_lane<T>(name: &'static str, target: Arc<dyn Target<T>>, mut rx: mpsc::Receiver<T>)
where
    T: Send + 'static,
{
    while let Some(item) = rx.recv().await {
        if let Err(rejected) = target.submit(item).await {
            debug!(broadcast = name, target_stage = target.name(), reason = %rejected, "Lane closed");
            break;
        }
    }
}
