//! Edges between stages.

use std::sync::Arc;
use tracing::debug;

use crate::AdmissionRejected;
use crate::broadcast::Broadcast;
use crate::stage::Target;

/// Options for a link between an upstream stage and its targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkOptions {
    /// Complete the downstream targets once the upstream stage has drained.
    pub propagate_completion: bool,
}

impl LinkOptions {
    pub fn propagate() -> Self {
        Self {
            propagate_completion: true,
        }
    }
}

/// Directed edge forwarding results to a single downstream target.
pub struct Link<T> {
    target: Arc<dyn Target<T>>,
    options: LinkOptions,
}

impl<T> Link<T>
where
    T: Send + 'static,
{
    pub fn new(target: Arc<dyn Target<T>>, options: LinkOptions) -> Self {
        Self { target, options }
    }

    pub fn target_name(&self) -> &'static str {
        self.target.name()
    }
}

/// Where a stage sends its results.
pub enum Output<T> {
    /// Terminal stage; results are discarded.
    Discard,
    Link(Link<T>),
    Broadcast(Broadcast<T>),
}

impl<T> Output<T>
where
    T: Send + 'static,
{
    pub(crate) async fn forward(&self, item: T) -> Result<(), AdmissionRejected> {
        match self {
            Output::Discard => Ok(()),
            Output::Link(link) => link.target.submit(item).await,
            Output::Broadcast(broadcast) => broadcast.forward(item).await,
        }
    }

    /// Called once the upstream stage delivered its last result.
    pub(crate) async fn finish(self) {
        match self {
            Output::Discard => {}
            Output::Link(link) => {
                if link.options.propagate_completion {
                    debug!(target_stage = link.target.name(), "Propagating completion");
                    link.target.complete();
                }
            }
            Output::Broadcast(broadcast) => broadcast.finish().await,
        }
    }
}

impl<T> From<Link<T>> for Output<T> {
    fn from(link: Link<T>) -> Self {
        Output::Link(link)
    }
}

impl<T> From<Broadcast<T>> for Output<T> {
    fn from(broadcast: Broadcast<T>) -> Self {
        Output::Broadcast(broadcast)
    }
}
