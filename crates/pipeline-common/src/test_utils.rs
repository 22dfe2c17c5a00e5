use parking_lot::Mutex;
use std::sync::Arc;

use crate::{Output, PipelineContext, Stage, StageConfig};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer() // Write to test output
        .try_init();
}

/// Terminal stage recording every item it receives, in arrival order.
pub fn collector<T>(context: Arc<PipelineContext>) -> (Arc<Stage<T>>, Arc<Mutex<Vec<T>>>)
where
    T: Send + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let stage = Stage::spawn(
        "collector",
        StageConfig::default(),
        context,
        move |item: T| {
            let seen = sink_seen.clone();
            async move {
                seen.lock().push(item);
                Ok::<_, std::io::Error>(())
            }
        },
        Output::Discard,
    )
    .expect("collector config is valid");
    (stage, seen)
}
