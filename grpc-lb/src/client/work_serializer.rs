/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::rt::GrpcRuntime;

enum WorkItem {
    Closure(Box<dyn FnOnce() + Send>),
    Flush(oneshot::Sender<()>),
}

/// Runs closures one at a time, in the order they were submitted.
///
/// Everything that touches a channel's LB policy goes through its
/// serializer, so the policy itself needs no locking beyond what the
/// serializer provides.  Work is never run inline by [`WorkSerializer::run`],
/// which makes it safe to submit work while holding locks that the work
/// itself will take.
#[derive(Clone)]
pub struct WorkSerializer {
    tx: mpsc::UnboundedSender<WorkItem>,
    pending: Arc<AtomicUsize>,
}

impl WorkSerializer {
    /// Creates a serializer whose queue is drained by a task on `runtime`.
    /// The task exits once every clone of the serializer is dropped.
    pub fn new(runtime: &GrpcRuntime) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkItem>();
        let pending = Arc::new(AtomicUsize::new(0));
        let task_pending = pending.clone();
        // Detached; the loop ends when the last sender is dropped.
        let _ = runtime.spawn(Box::pin(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    WorkItem::Closure(f) => {
                        f();
                        task_pending.fetch_sub(1, Ordering::AcqRel);
                    }
                    WorkItem::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("work serializer exiting");
        }));
        WorkSerializer { tx, pending }
    }

    /// Queues `f` to run after all previously queued work.
    pub fn run(&self, f: impl FnOnce() + Send + 'static) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(WorkItem::Closure(Box::new(f))).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            debug!("work serializer is gone; dropping work item");
        }
    }

    /// Waits until the queue is empty, including any work queued by work
    /// that ran while waiting.
    pub async fn drain(&self) {
        while self.pending.load(Ordering::Acquire) > 0 {
            let (tx, rx) = oneshot::channel();
            if self.tx.send(WorkItem::Flush(tx)).is_err() {
                return;
            }
            let _ = rx.await;
        }
    }
}
