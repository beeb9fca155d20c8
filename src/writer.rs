// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The single writer.
//!
//! Each open environment owns one thread that drains a FIFO queue of write
//! jobs. Every job runs in its own write transaction: a job that returns
//! `Ok` is committed, a job that returns `Err` (or panics) is aborted, and
//! the outcome is delivered through the `WriteFuture` returned at
//! submission. No other code path begins a write transaction.

use std::{
    future::Future,
    panic::{
        self,
        AssertUnwindSafe,
    },
    pin::Pin,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
    task::{
        Context,
        Poll,
    },
    thread::{
        self,
        JoinHandle,
    },
};

use crossbeam_channel::{
    unbounded,
    Sender,
};
use log::{
    debug,
    trace,
    warn,
};
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::oneshot;

use crate::env::Core;
use crate::error::StoreError;
use crate::readwrite::Writer;

type Job = Box<dyn FnOnce(&Core) + Send + 'static>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub committed: usize,
    pub aborted: usize,
    /// Jobs skipped because their future was dropped while still queued.
    pub withdrawn: usize,
    /// The most write transactions ever open at once. Anything above 1
    /// would be a broken invariant.
    pub max_concurrent_writers: usize,
}

#[derive(Debug, Default)]
pub(crate) struct WriterMetrics {
    committed: AtomicUsize,
    aborted: AtomicUsize,
    withdrawn: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl WriterMetrics {
    pub(crate) fn writer_started(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
    }

    pub(crate) fn writer_finished(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn stats(&self) -> WriterStats {
        WriterStats {
            committed: self.committed.load(Ordering::SeqCst),
            aborted: self.aborted.load(Ordering::SeqCst),
            withdrawn: self.withdrawn.load(Ordering::SeqCst),
            max_concurrent_writers: self.max_active.load(Ordering::SeqCst),
        }
    }
}

pub(crate) struct WriteSerializer {
    sender: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl WriteSerializer {
    pub(crate) fn start(core: Arc<Core>) -> Result<WriteSerializer, StoreError> {
        let (sender, receiver) = unbounded::<Job>();
        let thread = thread::Builder::new().name("rkv-writer".into()).spawn(move || {
            debug!("writer thread started for environment {}", core.id);
            // The loop ends once every sender is gone and the queue is empty.
            for job in receiver.iter() {
                job(&core);
            }
            debug!("writer thread stopped for environment {}", core.id);
        })?;

        Ok(WriteSerializer {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    pub(crate) fn submit<T, E, F>(&self, f: F) -> WriteFuture<T, E>
    where
        F: FnOnce(&mut Writer) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return WriteFuture::ready(Err(E::from(StoreError::Cancelled))),
        };

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |core: &Core| {
            if tx.is_closed() {
                core.metrics.withdrawn.fetch_add(1, Ordering::SeqCst);
                trace!("skipping withdrawn write job");
                return;
            }
            // The caller may stop waiting at any point; the result is then
            // simply discarded.
            let _ = tx.send(run_job(core, f));
        });

        match sender.send(job) {
            Ok(()) => WriteFuture::pending(rx),
            Err(_) => WriteFuture::ready(Err(E::from(StoreError::Cancelled))),
        }
    }

    /// Close the queue, let the thread finish what was already submitted,
    /// and wait for it to exit.
    pub(crate) fn shutdown(&mut self) {
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            // A job that owned the last reference to its environment ends up
            // here on the writer thread itself; the loop exits on its own.
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("writer thread exited with a panic");
            }
        }
    }
}

impl Drop for WriteSerializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_job<T, E, F>(core: &Core, f: F) -> Result<T, E>
where
    F: FnOnce(&mut Writer) -> Result<T, E>,
    E: From<StoreError>,
{
    let mut writer = match Writer::begin(core) {
        Ok(writer) => writer,
        Err(e) => {
            core.metrics.aborted.fetch_add(1, Ordering::SeqCst);
            return Err(E::from(e));
        },
    };

    match panic::catch_unwind(AssertUnwindSafe(|| f(&mut writer))) {
        Ok(Ok(value)) => match writer.commit() {
            Ok(()) => {
                core.metrics.committed.fetch_add(1, Ordering::SeqCst);
                trace!("write job committed");
                Ok(value)
            },
            Err(e) => {
                core.metrics.aborted.fetch_add(1, Ordering::SeqCst);
                Err(E::from(e))
            },
        },
        Ok(Err(e)) => {
            writer.abort();
            core.metrics.aborted.fetch_add(1, Ordering::SeqCst);
            trace!("write job failed; aborted");
            Err(e)
        },
        Err(_) => {
            writer.abort();
            core.metrics.aborted.fetch_add(1, Ordering::SeqCst);
            warn!("write job panicked; its transaction was aborted");
            Err(E::from(StoreError::JobPanicked))
        },
    }
}

enum Outcome<T, E> {
    Ready(Option<Result<T, E>>),
    Pending(oneshot::Receiver<Result<T, E>>),
}

/// The result of a submitted write job.
///
/// Await it from async code, or call [`WriteFuture::wait`] from a plain
/// thread. Dropping it before the job is dequeued withdraws the job; once
/// the job is running it always runs to completion.
#[must_use = "dropping a WriteFuture withdraws its job if it has not started yet"]
pub struct WriteFuture<T, E = StoreError> {
    outcome: Outcome<T, E>,
}

impl<T, E> WriteFuture<T, E>
where
    E: From<StoreError>,
{
    pub(crate) fn ready(result: Result<T, E>) -> WriteFuture<T, E> {
        WriteFuture {
            outcome: Outcome::Ready(Some(result)),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<T, E>>) -> WriteFuture<T, E> {
        WriteFuture {
            outcome: Outcome::Pending(rx),
        }
    }

    /// Block the current thread until the job finishes.
    ///
    /// This must not be called from inside an async runtime; `.await` the
    /// future there instead.
    pub fn wait(self) -> Result<T, E> {
        match self.outcome {
            Outcome::Ready(Some(result)) => result,
            Outcome::Ready(None) => Err(E::from(completed_twice())),
            Outcome::Pending(rx) => rx.blocking_recv().unwrap_or_else(|_| Err(E::from(StoreError::Cancelled))),
        }
    }
}

fn completed_twice() -> StoreError {
    StoreError::invalid_state("write future polled after completion")
}

impl<T, E> Unpin for WriteFuture<T, E> {}

impl<T, E> Future for WriteFuture<T, E>
where
    E: From<StoreError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match &mut this.outcome {
            Outcome::Ready(slot) => return Poll::Ready(slot.take().unwrap_or_else(|| Err(E::from(completed_twice())))),
            Outcome::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(result)) => result,
                // The writer dropped the job without running it.
                Poll::Ready(Err(_)) => Err(E::from(StoreError::Cancelled)),
            },
        };
        this.outcome = Outcome::Ready(None);
        Poll::Ready(result)
    }
}
