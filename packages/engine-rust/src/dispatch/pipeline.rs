//! Per-asset-type pipeline runtime.
//!
//! A pipeline is an ordered chain of handler stages. Each stage owns a
//! queue and a set of worker tasks (`max_instances` wide); an element is
//! pulled, the stage callback runs, and the element moves to the next
//! stage or, after the last stage, to the dispatcher's completion channel.
//! Every event therefore visits every stage exactly once. FIFO holds
//! within a single stage queue; nothing is guaranteed across stages.
//!
//! Backpressure is enforced by the dispatcher's refill watermarks against
//! [`Pipeline::depth`]; directly dispatched events are exempt, so the
//! input channel itself is not capacity-limited.
//!
//! Cancellation is by closure: dropping the pipeline drops the input
//! sender, each stage's workers observe the closed queue, finish their
//! element and exit, cascading to the completion channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::event::EventDataElement;
use super::registry::Handler;

/// One per-type pipeline: the entry queue of its first stage.
pub struct Pipeline {
    input: mpsc::UnboundedSender<EventDataElement>,
    depth: Arc<AtomicUsize>,
}

impl Pipeline {
    /// Wires the stage chain and spawns its workers.
    ///
    /// `complete` receives every element after its last stage. With no
    /// handlers, elements pass straight through to completion.
    #[must_use]
    pub fn new(
        stages: Vec<Handler>,
        default_max_instances: usize,
        complete: mpsc::UnboundedSender<EventDataElement>,
    ) -> Self {
        let depth = Arc::new(AtomicUsize::new(0));
        let (input, mut upstream) = mpsc::unbounded_channel::<EventDataElement>();

        let mut first = true;
        for handler in stages {
            let (next_tx, next_rx) = mpsc::unbounded_channel::<EventDataElement>();
            let shared_rx = Arc::new(Mutex::new(upstream));
            let instances = if handler.max_instances == 0 {
                default_max_instances.max(1)
            } else {
                handler.max_instances
            };

            for _ in 0..instances {
                let rx = Arc::clone(&shared_rx);
                let tx = next_tx.clone();
                let handler = handler.clone();
                let depth = if first { Some(Arc::clone(&depth)) } else { None };
                tokio::spawn(stage_worker(handler, rx, tx, depth));
            }
            drop(next_tx);
            upstream = next_rx;
            first = false;
        }

        // Tail forwarder: moves post-last-stage elements to completion.
        // With zero stages this is the whole pipeline.
        let tail_depth = if first { Some(Arc::clone(&depth)) } else { None };
        tokio::spawn(async move {
            let mut rx = upstream;
            while let Some(element) = rx.recv().await {
                if let Some(depth) = &tail_depth {
                    depth.fetch_sub(1, Ordering::Relaxed);
                }
                if complete.send(element).is_err() {
                    return;
                }
            }
        });

        Self { input, depth }
    }

    /// Appends an element to the first stage's queue. Returns `false`
    /// after shutdown.
    pub fn append(&self, element: EventDataElement) -> bool {
        if self.input.send(element).is_ok() {
            self.depth.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Number of elements admitted but not yet picked up by the first
    /// stage; the quantity the refill watermarks compare against.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// One worker of one stage.
async fn stage_worker(
    handler: Handler,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<EventDataElement>>>,
    tx: mpsc::UnboundedSender<EventDataElement>,
    depth: Option<Arc<AtomicUsize>>,
) {
    loop {
        // The lock is held only across the recv; callbacks run unlocked so
        // sibling instances proceed in parallel.
        let element = rx.lock().await.recv().await;
        let Some(mut element) = element else {
            return;
        };
        if let Some(depth) = &depth {
            depth.fetch_sub(1, Ordering::Relaxed);
        }

        if let Err(err) = (handler.callback)(element.event.clone()).await {
            debug!(
                handler = %handler.name,
                plugin = %handler.plugin,
                event = %element.event.name,
                error = %err,
                "handler returned error"
            );
            element.error = Some(format!("{}: {err}", handler.name));
        }

        if tx.send(element).is_err() {
            return;
        }
    }
}
