//! Non-blocking operations completed on the client's completion thread.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::thread;
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;

use super::CoordClient;
use crate::CreateMode;
use crate::Error;
use crate::Record;
use crate::Result;
use crate::Stat;
use crate::COMPLETION_THREAD_NAME;

pub(crate) type Job = Box<dyn FnOnce() + Send>;
pub(crate) type JobSender = mpsc::UnboundedSender<Job>;

/// Runs submitted jobs in order until every sender is gone.
pub(crate) fn spawn_completion_thread(
    mut jobs: mpsc::UnboundedReceiver<Job>
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(COMPLETION_THREAD_NAME.to_string())
        .spawn(move || {
            while let Some(job) = jobs.blocking_recv() {
                job();
            }
            debug!("completion thread exiting");
        })
}

/// Pending result of an asynchronous client operation.
///
/// Resolves exactly once. Await it from async code or call
/// [`wait`](AsyncOp::wait) from a plain thread. Operations still queued when
/// the client closes resolve to `InvalidSession`.
#[must_use = "an AsyncOp does nothing observable unless awaited or waited on"]
pub struct AsyncOp<T> {
    rx: oneshot::Receiver<Result<T>>,
}

fn closed() -> Error {
    Error::InvalidSession("client closed before the operation completed".to_string())
}

impl<T> AsyncOp<T> {
    /// Blocks the current thread until the operation completes.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(closed()))
    }
}

impl<T> Future for AsyncOp<T> {
    type Output = Result<T>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(closed())))
    }
}

impl CoordClient {
    fn submit<T, F>(
        &self,
        op: F,
    ) -> AsyncOp<T>
    where
        T: Send + 'static,
        F: FnOnce(&CoordClient) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let client = self.clone();
        let job: Job = Box::new(move || {
            let _ = tx.send(op(&client));
        });

        if let Some(jobs) = self.inner.jobs.lock().as_ref() {
            if jobs.send(job).is_err() {
                debug!("completion thread gone, dropping async operation");
            }
        }
        AsyncOp { rx }
    }

    pub fn async_create(
        &self,
        path: &str,
        record: Option<&Record>,
        mode: CreateMode,
    ) -> AsyncOp<String> {
        let started = Instant::now();
        let path = path.to_string();
        let data = self.inner.serialize(record, &path);
        self.submit(move |client| client.inner.create_at(&path, &data?, mode, started))
    }

    pub fn async_delete(
        &self,
        path: &str,
    ) -> AsyncOp<bool> {
        let started = Instant::now();
        let path = path.to_string();
        self.submit(move |client| client.inner.delete_at(&path, started))
    }

    pub fn async_exists(
        &self,
        path: &str,
    ) -> AsyncOp<Option<Stat>> {
        let started = Instant::now();
        let path = path.to_string();
        self.submit(move |client| client.inner.exists_at(&path, started))
    }

    pub fn async_get_data(
        &self,
        path: &str,
    ) -> AsyncOp<(Vec<u8>, Stat)> {
        let started = Instant::now();
        let path = path.to_string();
        self.submit(move |client| {
            client
                .inner
                .get_data_at(&path, false, started)?
                .ok_or_else(|| Error::NoSuchNode(path.clone()))
        })
    }

    pub fn async_set_data(
        &self,
        path: &str,
        record: &Record,
        expected_version: i32,
    ) -> AsyncOp<Stat> {
        let started = Instant::now();
        let path = path.to_string();
        let data = self.inner.serialize(Some(record), &path);
        self.submit(move |client| client.inner.set_data_at(&path, &data?, expected_version, started))
    }
}
