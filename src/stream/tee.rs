//! Splitting one item stream into two independently consumed branches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::AbortHandle;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;

use crate::error::QianfanError;

type Item<T> = Result<T, QianfanError>;

struct Source<T> {
    stream: Option<BoxStream<'static, Item<T>>>,
    finished: bool,
    abort: AbortHandle,
}

impl<T> Drop for Source<T> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("all tee branches dropped before the stream finished, aborting");
            self.abort.abort();
        }
    }
}

/// State shared by both branches.
///
/// Whichever branch finds its own queue empty advances the source and pushes
/// a copy of the item onto the other branch's queue.
pub(super) struct Shared<T> {
    queues: Mutex<[VecDeque<Item<T>>; 2]>,
    alive: [AtomicBool; 2],
    source: tokio::sync::Mutex<Source<T>>,
}

impl<T: Clone> Shared<T> {
    pub(super) fn new(stream: BoxStream<'static, Item<T>>, abort: AbortHandle) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new([VecDeque::new(), VecDeque::new()]),
            alive: [AtomicBool::new(true), AtomicBool::new(true)],
            source: tokio::sync::Mutex::new(Source {
                stream: Some(stream),
                finished: false,
                abort,
            }),
        })
    }

    fn pop(&self, side: usize) -> Option<Item<T>> {
        self.queues.lock()[side].pop_front()
    }

    async fn pull(&self, side: usize) -> Option<Item<T>> {
        if let Some(item) = self.pop(side) {
            return Some(item);
        }

        let mut source = self.source.lock().await;
        // The other branch may have advanced the source while we waited.
        if let Some(item) = self.pop(side) {
            return Some(item);
        }
        if source.finished {
            return None;
        }

        let next = match source.stream.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        };
        match &next {
            None => {
                source.finished = true;
                source.stream = None;
            }
            Some(Err(_)) => source.finished = true,
            Some(Ok(_)) => {}
        }

        let other = 1 - side;
        if let Some(item) = &next {
            if self.alive[other].load(Ordering::Acquire) {
                self.queues.lock()[other].push_back(item.clone());
            }
        }
        next
    }
}

struct Branch<T> {
    shared: Arc<Shared<T>>,
    side: usize,
}

impl<T> Drop for Branch<T> {
    fn drop(&mut self) {
        self.shared.alive[self.side].store(false, Ordering::Release);
        self.shared.queues.lock()[self.side].clear();
    }
}

/// One side of a tee, as an item stream.
pub(super) fn branch<T>(
    shared: Arc<Shared<T>>,
    side: usize,
) -> impl futures_util::Stream<Item = Item<T>> + Send + 'static
where
    T: Clone + Send + 'static,
{
    futures_util::stream::unfold(Branch { shared, side }, |branch| async move {
        let item = branch.shared.pull(branch.side).await?;
        Some((item, branch))
    })
}
