//! # Stage
//!
//! A stage wraps an async transform and runs it over admitted items with
//! bounded parallelism. Each stage is driven by two tasks:
//!
//! - the **dispatcher** takes an execution slot, then an item from the
//!   admission queue, tags it with its submission sequence and spawns the
//!   execution;
//! - the **emitter** receives finished executions, optionally restores
//!   submission order through a [`ReorderBuffer`], and forwards results to the
//!   stage's [`Output`].
//!
//! An execution keeps its slot until its result has been forwarded, so a slow
//! downstream throttles the stage and the reorder buffer never holds more than
//! `max_parallelism` results.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tracing::{debug, warn};

use crate::cancellation::or_cancelled;
use crate::config::{Capacity, FaultPolicy, StageConfig};
use crate::link::Output;
use crate::reorder::ReorderBuffer;
use crate::run_completion::{StageFault, StageReport, StageState};
use crate::{AdmissionRejected, BoxError, PipelineContext, PipelineError};

const PROGRESS_LOG_INTERVAL: u64 = 1_000;

/// Anything items can be submitted to.
///
/// Implemented by [`Stage`]; links and broadcasts forward into `Target`s.
#[async_trait]
pub trait Target<T: Send + 'static>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Admit one item, waiting for queue space.
    async fn submit(&self, item: T) -> Result<(), AdmissionRejected>;

    /// Mark that no further items will arrive. Idempotent.
    fn complete(&self);
}

enum AdmissionTx<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> Clone for AdmissionTx<T> {
    fn clone(&self) -> Self {
        match self {
            AdmissionTx::Bounded(tx) => AdmissionTx::Bounded(tx.clone()),
            AdmissionTx::Unbounded(tx) => AdmissionTx::Unbounded(tx.clone()),
        }
    }
}

enum AdmissionRx<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> AdmissionRx<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            AdmissionRx::Bounded(rx) => rx.recv().await,
            AdmissionRx::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Close the queue and discard whatever is still waiting in it.
    fn close_and_discard(&mut self) -> u64 {
        let mut discarded = 0;
        match self {
            AdmissionRx::Bounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    discarded += 1;
                }
            }
            AdmissionRx::Unbounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    discarded += 1;
                }
            }
        }
        discarded
    }
}

fn admission_channel<T>(capacity: Capacity) -> (AdmissionTx<T>, AdmissionRx<T>) {
    match capacity {
        Capacity::Bounded(n) => {
            let (tx, rx) = mpsc::channel(n);
            (AdmissionTx::Bounded(tx), AdmissionRx::Bounded(rx))
        }
        Capacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (AdmissionTx::Unbounded(tx), AdmissionRx::Unbounded(rx))
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn report(&self, name: &'static str, state: StageState) -> StageReport {
        StageReport {
            name,
            state,
            admitted: self.admitted.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Why an execution produced no value.
enum Failure {
    /// Already recorded as the stage's fault by the execution itself.
    Recorded,
    Error(BoxError),
}

/// An execution that finished, successfully or not.
struct Finished<O> {
    seq: u64,
    outcome: Result<O, Failure>,
    permit: OwnedSemaphorePermit,
}

/// Cloneable view of a stage's lifecycle, independent of its item type.
#[derive(Clone)]
pub struct StageHandle {
    name: &'static str,
    state: watch::Receiver<StageReport>,
}

impl StageHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait until the stage has executed everything it admitted, forwarded
    /// the results and propagated completion downstream.
    pub async fn drain(&self) -> StageReport {
        let mut rx = self.state.clone();
        let drained = match rx.wait_for(|report| report.state != StageState::Running).await {
            Ok(report) => Some(report.clone()),
            Err(_) => None,
        };
        match drained {
            Some(report) => report,
            None => {
                // Emitter went away without publishing a final state.
                let mut report = rx.borrow().clone();
                report.state = StageState::Faulted;
                report
            }
        }
    }

    pub fn is_drained(&self) -> bool {
        self.state.borrow().state != StageState::Running
    }
}

/// A bounded, parallel execution unit.
///
/// Created through [`Stage::spawn`] (or [`crate::Pipeline::add_stage`]); items
/// enter through [`Stage::submit`].
pub struct Stage<T> {
    name: &'static str,
    context: Arc<PipelineContext>,
    admission: Mutex<Option<AdmissionTx<T>>>,
    counters: Arc<Counters>,
    handle: StageHandle,
}

impl<T> Stage<T>
where
    T: Send + 'static,
{
    /// Spawn the stage's tasks and return its input side.
    ///
    /// `output` receives every successful result; it must be built before the
    /// stage, so pipelines are declared sinks first.
    pub fn spawn<O, F, Fut, E>(
        name: &'static str,
        config: StageConfig,
        context: Arc<PipelineContext>,
        transform: F,
        output: Output<O>,
    ) -> Result<Arc<Self>, PipelineError>
    where
        O: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        config.validate()?;

        let (admission_tx, admission_rx) = admission_channel(config.capacity);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let (state_tx, state_rx) = watch::channel(counters.report(name, StageState::Running));

        debug!(
            stage = name,
            max_parallelism = config.max_parallelism,
            capacity = ?config.capacity,
            preserve_order = config.preserve_order,
            "Stage started"
        );

        let slots = Arc::new(Semaphore::new(config.max_parallelism));
        tokio::spawn(dispatch(
            name,
            context.clone(),
            admission_rx,
            slots,
            config.fault_policy,
            Arc::new(transform),
            results_tx,
            counters.clone(),
        ));
        tokio::spawn(emit(
            name,
            config,
            context.clone(),
            results_rx,
            output,
            counters.clone(),
            state_tx,
        ));

        Ok(Arc::new(Self {
            name,
            context,
            admission: Mutex::new(Some(admission_tx)),
            counters,
            handle: StageHandle {
                name,
                state: state_rx,
            },
        }))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handle(&self) -> StageHandle {
        self.handle.clone()
    }

    fn sender(&self) -> Option<AdmissionTx<T>> {
        self.admission.lock().clone()
    }

    /// Admit `item`, waiting while the queue is full.
    ///
    /// Fails once [`Stage::complete`] was called or the run is cancelled,
    /// including while waiting for space.
    pub async fn submit(&self, item: T) -> Result<(), AdmissionRejected> {
        let token = &self.context.token;
        if token.is_cancelled() {
            return Err(AdmissionRejected::Cancelled(self.name));
        }
        let Some(tx) = self.sender() else {
            return Err(AdmissionRejected::Completed(self.name));
        };

        let sent = match tx {
            AdmissionTx::Unbounded(tx) => tx.send(item).is_ok(),
            AdmissionTx::Bounded(tx) => match or_cancelled(token, tx.send(item)).await {
                Some(result) => result.is_ok(),
                None => return Err(AdmissionRejected::Cancelled(self.name)),
            },
        };

        if !sent {
            // The dispatcher only closes the queue when it stops on cancellation.
            return Err(if token.is_cancelled() {
                AdmissionRejected::Cancelled(self.name)
            } else {
                AdmissionRejected::Completed(self.name)
            });
        }
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop admitting items. Queued items still execute.
    pub fn complete(&self) {
        if self.admission.lock().take().is_some() {
            debug!(stage = self.name, "Stage completed by upstream");
        }
    }

    pub fn is_completed(&self) -> bool {
        self.admission.lock().is_none()
    }

    /// See [`StageHandle::drain`].
    pub async fn drain(&self) -> StageReport {
        self.handle.drain().await
    }
}

#[async_trait]
impl<T> Target<T> for Stage<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn submit(&self, item: T) -> Result<(), AdmissionRejected> {
        Stage::submit(self, item).await
    }

    fn complete(&self) {
        Stage::complete(self)
    }
}

fn panic_error(payload: Box<dyn std::any::Any + Send>) -> BoxError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    Box::new(std::io::Error::other(format!("transform panicked: {message}")))
}

async fn dispatch<T, O, F, Fut, E>(
    name: &'static str,
    context: Arc<PipelineContext>,
    mut admission: AdmissionRx<T>,
    slots: Arc<Semaphore>,
    fault_policy: FaultPolicy,
    transform: Arc<F>,
    results: mpsc::UnboundedSender<Finished<O>>,
    counters: Arc<Counters>,
) where
    T: Send + 'static,
    O: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let token = &context.token;
    let mut next_seq: u64 = 0;

    loop {
        // Slot first: items keep waiting in the bounded queue, not in memory here.
        let permit = match or_cancelled(token, slots.clone().acquire_owned()).await {
            Some(Ok(permit)) => permit,
            _ => break,
        };
        let item = match or_cancelled(token, admission.recv()).await {
            Some(Some(item)) => item,
            _ => break,
        };

        let seq = next_seq;
        next_seq += 1;
        let transform = transform.clone();
        let results = results.clone();
        let context = context.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { transform(item).await })
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(e.into()),
                Err(panic) => Err(panic_error(panic)),
            };
            // A fatal failure cancels the run now, even while the emitter
            // is still waiting on downstream backpressure.
            let outcome = match error {
                Ok(output) => Ok(output),
                Err(e) if fault_policy == FaultPolicy::Fatal && !context.is_cancelled() => {
                    context.fault(StageFault::new(name, e));
                    Err(Failure::Recorded)
                }
                Err(e) => Err(Failure::Error(e)),
            };
            let _ = results.send(Finished {
                seq,
                outcome,
                permit,
            });
        });
    }

    let discarded = admission.close_and_discard();
    if discarded > 0 {
        counters.dropped.fetch_add(discarded, Ordering::Relaxed);
        debug!(stage = name, discarded, "Discarded queued items on cancellation");
    }
}

async fn emit<O>(
    name: &'static str,
    config: StageConfig,
    context: Arc<PipelineContext>,
    mut results: mpsc::UnboundedReceiver<Finished<O>>,
    output: Output<O>,
    counters: Arc<Counters>,
    state: watch::Sender<StageReport>,
) where
    O: Send + 'static,
{
    let mut reorder: ReorderBuffer<(Option<O>, OwnedSemaphorePermit)> = ReorderBuffer::new();
    let mut faulted = false;
    let mut next_progress_log_at = PROGRESS_LOG_INTERVAL;

    while let Some(Finished {
        seq,
        outcome,
        permit,
    }) = results.recv().await
    {
        let value = match outcome {
            Ok(value) => {
                let processed = counters.processed.fetch_add(1, Ordering::Relaxed) + 1;
                if processed >= next_progress_log_at {
                    debug!(stage = name, processed, "Stage progress");
                    next_progress_log_at = next_progress_log_at.saturating_add(PROGRESS_LOG_INTERVAL);
                }
                Some(value)
            }
            Err(Failure::Recorded) => {
                faulted = true;
                None
            }
            Err(Failure::Error(e)) if context.is_cancelled() && !faulted => {
                // Cooperative abort after cancellation, not an item failure.
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(stage = name, seq, error = %e, "Execution aborted after cancellation");
                None
            }
            Err(Failure::Error(e)) => {
                match config.fault_policy {
                    FaultPolicy::Fatal => {
                        debug!(stage = name, seq, error = %e, "Further failure after stage fault");
                    }
                    FaultPolicy::SkipItem => {
                        counters.skipped.fetch_add(1, Ordering::Relaxed);
                        warn!(stage = name, seq, error = %e, "Item failed, skipping");
                    }
                }
                None
            }
        };

        if config.preserve_order {
            if reorder.insert(seq, (value, permit)).is_err() {
                warn!(stage = name, seq, "Duplicate sequence in reorder buffer");
            }
            while let Some((value, permit)) = reorder.pop_ready() {
                deliver(name, &context, &output, &counters, value).await;
                drop(permit);
            }
        } else {
            deliver(name, &context, &output, &counters, value).await;
            drop(permit);
        }
    }

    if !reorder.is_empty() {
        counters
            .dropped
            .fetch_add(reorder.len() as u64, Ordering::Relaxed);
    }

    output.finish().await;

    let final_state = if faulted {
        StageState::Faulted
    } else if context.is_cancelled() {
        StageState::Cancelled
    } else {
        StageState::Completed
    };
    let report = counters.report(name, final_state);
    debug!(
        stage = name,
        state = ?report.state,
        processed = report.processed,
        skipped = report.skipped,
        dropped = report.dropped,
        "Stage drained"
    );
    let _ = state.send(report);
}

async fn deliver<O>(
    name: &'static str,
    context: &PipelineContext,
    output: &Output<O>,
    counters: &Counters,
    value: Option<O>,
) where
    O: Send + 'static,
{
    let Some(value) = value else {
        return;
    };
    if context.is_cancelled() {
        counters.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if let Err(rejected) = output.forward(value).await {
        counters.dropped.fetch_add(1, Ordering::Relaxed);
        debug!(stage = name, reason = %rejected, "Downstream rejected result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Link, LinkOptions};
    use crate::test_utils::{collector, init_tracing};
    use std::time::Duration;

    #[tokio::test]
    async fn ordered_stage_restores_submission_order() {
        init_tracing();
        let context = PipelineContext::arc_new(Default::default());
        let (sink, seen) = collector::<u64>(context.clone());

        let stage = Stage::spawn(
            "ordered",
            StageConfig::new()
                .max_parallelism(4)
                .bounded(8)
                .preserve_order(true),
            context.clone(),
            |n: u64| async move {
                // Later items finish first.
                tokio::time::sleep(Duration::from_millis((20 - n) * 3)).await;
                Ok::<_, std::io::Error>(n)
            },
            Output::Link(Link::new(sink.clone(), LinkOptions::propagate())),
        )
        .unwrap();

        for n in 0..20 {
            stage.submit(n).await.unwrap();
        }
        stage.complete();

        let report = stage.drain().await;
        assert_eq!(report.state, StageState::Completed);
        assert_eq!(report.processed, 20);
        sink.drain().await;
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn bounded_capacity_blocks_producer() {
        let context = PipelineContext::arc_new(Default::default());
        let gate = Arc::new(Semaphore::new(0));
        let release = gate.clone();

        let stage = Stage::spawn(
            "gated",
            StageConfig::new().max_parallelism(1).bounded(2),
            context.clone(),
            move |n: u32| {
                let gate = gate.clone();
                async move {
                    gate.acquire().await.unwrap().forget();
                    Ok::<_, std::io::Error>(n)
                }
            },
            Output::Discard,
        )
        .unwrap();

        // One item executing, two waiting in the queue.
        stage.submit(1).await.unwrap();
        stage.submit(2).await.unwrap();
        stage.submit(3).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), stage.submit(4)).await;
        assert!(blocked.is_err(), "fourth submit must wait for a free slot");

        release.add_permits(1);
        tokio::time::timeout(Duration::from_secs(1), stage.submit(4))
            .await
            .expect("slot frees once the first item finishes")
            .unwrap();

        release.add_permits(3);
        stage.complete();
        let report = stage.drain().await;
        assert_eq!(report.processed, 4);
    }

    #[tokio::test]
    async fn submit_after_complete_is_rejected() {
        let context = PipelineContext::arc_new(Default::default());
        let stage = Stage::spawn(
            "closed",
            StageConfig::default(),
            context,
            |n: u32| async move { Ok::<_, std::io::Error>(n) },
            Output::Discard,
        )
        .unwrap();

        stage.complete();
        stage.complete();
        assert!(stage.is_completed());
        assert_eq!(
            stage.submit(1).await,
            Err(AdmissionRejected::Completed("closed"))
        );
        assert_eq!(stage.drain().await.state, StageState::Completed);
    }

    #[tokio::test]
    async fn cancellation_rejects_and_still_drains() {
        let context = PipelineContext::arc_new(Default::default());
        let stage = Stage::spawn(
            "cancel",
            StageConfig::new().max_parallelism(1).bounded(1),
            context.clone(),
            |n: u32| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, std::io::Error>(n)
            },
            Output::Discard,
        )
        .unwrap();

        stage.submit(1).await.unwrap();
        stage.submit(2).await.unwrap();
        let context_clone = context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            context_clone.token.cancel();
        });
        // Queue is full; the wait must fail fast once cancelled.
        assert_eq!(
            stage.submit(3).await,
            Err(AdmissionRejected::Cancelled("cancel"))
        );
        assert_eq!(
            stage.submit(4).await,
            Err(AdmissionRejected::Cancelled("cancel"))
        );

        // The in-flight item runs to completion; its result is dropped.
        let report = tokio::time::timeout(Duration::from_secs(5), stage.drain())
            .await
            .unwrap();
        assert_eq!(report.state, StageState::Cancelled);
    }

    #[tokio::test]
    async fn errors_after_cancellation_are_not_faults() {
        let context = PipelineContext::arc_new(Default::default());
        let token = context.token.clone();
        let stage = Stage::spawn(
            "cooperative",
            StageConfig::new().max_parallelism(2),
            context.clone(),
            move |n: u32| {
                let token = token.clone();
                async move {
                    token.cancelled().await;
                    Err::<u32, _>(std::io::Error::other(format!("item {n} aborted")))
                }
            },
            Output::Discard,
        )
        .unwrap();

        stage.submit(1).await.unwrap();
        stage.submit(2).await.unwrap();
        context.token.cancel();

        let report = stage.drain().await;
        assert_eq!(report.state, StageState::Cancelled);
        assert!(context.first_fault().is_none());
    }

    #[tokio::test]
    async fn fatal_error_faults_stage_and_cancels_run() {
        let context = PipelineContext::arc_new(Default::default());
        let stage = Stage::spawn(
            "fatal",
            StageConfig::new().max_parallelism(2),
            context.clone(),
            |n: u32| async move {
                if n == 3 {
                    Err(std::io::Error::other("boom"))
                } else {
                    Ok(n)
                }
            },
            Output::Discard,
        )
        .unwrap();

        for n in 0..5 {
            let _ = stage.submit(n).await;
        }
        stage.complete();

        let report = stage.drain().await;
        assert_eq!(report.state, StageState::Faulted);
        assert!(context.is_cancelled());
        let fault = context.first_fault().unwrap();
        assert_eq!(fault.stage, "fatal");
        assert_eq!(fault.source.to_string(), "boom");
    }

    #[tokio::test]
    async fn fatal_error_cancels_run_while_downstream_is_blocked() {
        let context = PipelineContext::arc_new(Default::default());
        let gate = Arc::new(Semaphore::new(0));
        let sink = {
            let gate = gate.clone();
            Stage::spawn(
                "blocked",
                StageConfig::new().max_parallelism(1).bounded(1),
                context.clone(),
                move |n: u32| {
                    let gate = gate.clone();
                    async move {
                        let _permit = gate.acquire().await;
                        Ok::<_, std::io::Error>(n)
                    }
                },
                Output::Discard,
            )
            .unwrap()
        };
        let stage = Stage::spawn(
            "fails-late",
            StageConfig::new().max_parallelism(4),
            context.clone(),
            |n: u32| async move {
                if n == 3 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(std::io::Error::other("late failure"))
                } else {
                    Ok(n)
                }
            },
            Output::Link(Link::new(sink.clone(), LinkOptions::propagate())),
        )
        .unwrap();

        // 0 runs in the sink, 1 waits in its queue, 2 holds the emitter.
        for n in 0..4 {
            stage.submit(n).await.unwrap();
        }
        stage.complete();

        tokio::time::timeout(Duration::from_secs(1), context.token.cancelled())
            .await
            .expect("fault must cancel the run while downstream is blocked");
        let fault = context.first_fault().unwrap();
        assert_eq!(fault.stage, "fails-late");
        assert_eq!(fault.source.to_string(), "late failure");

        gate.add_permits(8);
        let report = tokio::time::timeout(Duration::from_secs(5), stage.drain())
            .await
            .unwrap();
        assert_eq!(report.state, StageState::Faulted);
        let sink_report = tokio::time::timeout(Duration::from_secs(5), sink.drain())
            .await
            .unwrap();
        assert_eq!(sink_report.state, StageState::Cancelled);
    }

    #[tokio::test]
    async fn skip_policy_keeps_order_around_failures() {
        let context = PipelineContext::arc_new(Default::default());
        let (sink, seen) = collector::<u32>(context.clone());
        let stage = Stage::spawn(
            "skip",
            StageConfig::new()
                .max_parallelism(3)
                .preserve_order(true)
                .fault_policy(FaultPolicy::SkipItem),
            context.clone(),
            |n: u32| async move {
                if n % 3 == 0 {
                    Err(std::io::Error::other("bad input"))
                } else {
                    Ok(n)
                }
            },
            Output::Link(Link::new(sink.clone(), LinkOptions::propagate())),
        )
        .unwrap();

        for n in 0..10 {
            stage.submit(n).await.unwrap();
        }
        stage.complete();

        let report = stage.drain().await;
        assert_eq!(report.state, StageState::Completed);
        assert_eq!(report.skipped, 4);
        assert!(!context.is_cancelled());
        sink.drain().await;
        assert_eq!(*seen.lock(), vec![1, 2, 4, 5, 7, 8]);
    }

    #[tokio::test]
    async fn panicking_transform_faults_instead_of_hanging() {
        let context = PipelineContext::arc_new(Default::default());
        let stage = Stage::spawn(
            "panics",
            StageConfig::new().max_parallelism(2).preserve_order(true),
            context.clone(),
            |n: u32| async move {
                if n == 0 {
                    panic!("first item explodes");
                }
                Ok::<_, std::io::Error>(n)
            },
            Output::Discard,
        )
        .unwrap();

        stage.submit(0).await.unwrap();
        stage.submit(1).await.unwrap();
        stage.complete();

        let report = tokio::time::timeout(Duration::from_secs(5), stage.drain())
            .await
            .unwrap();
        assert_eq!(report.state, StageState::Faulted);
        let fault = context.first_fault().unwrap();
        assert!(fault.source.to_string().contains("first item explodes"));
    }

    #[test]
    fn invalid_config_is_refused() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let result = Stage::spawn(
                "invalid",
                StageConfig::new().max_parallelism(0),
                PipelineContext::arc_new(Default::default()),
                |n: u32| async move { Ok::<_, std::io::Error>(n) },
                Output::Discard,
            );
            assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
        });
    }
}
