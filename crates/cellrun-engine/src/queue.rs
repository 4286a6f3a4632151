//! FIFO of pending requests between connection tasks and the worker.

use std::{
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    time::Duration,
};

use cellrun_core::ExecutionRequest;

/// A request stamped with its submission sequence number.
pub(crate) struct QueuedRequest {
    pub seq: u64,
    pub request: ExecutionRequest,
}

/// The worker is gone; the request is handed back.
pub(crate) struct QueueClosed(pub ExecutionRequest);

pub(crate) enum Next {
    Ready(QueuedRequest),
    /// Nothing arrived within the poll interval.
    Idle,
    Closed,
}

pub(crate) struct QueueSender {
    tx: mpsc::Sender<QueuedRequest>,
    next_seq: AtomicU64,
    pending: Arc<AtomicUsize>,
    /// Set once by the worker; pushes hold the read side while sending.
    closed: Arc<RwLock<bool>>,
}

pub(crate) struct QueueReceiver {
    rx: mpsc::Receiver<QueuedRequest>,
    pending: Arc<AtomicUsize>,
    closed: Arc<RwLock<bool>>,
}

pub(crate) fn channel() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(RwLock::new(false));
    (
        QueueSender {
            tx,
            next_seq: AtomicU64::new(1),
            pending: Arc::clone(&pending),
            closed: Arc::clone(&closed),
        },
        QueueReceiver { rx, pending, closed },
    )
}

impl QueueSender {
    /// Append a request without blocking.
    pub fn push(&self, request: ExecutionRequest) -> Result<u64, QueueClosed> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(QueueClosed(request));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(QueuedRequest { seq, request })
            .map(|()| seq)
            .map_err(|mpsc::SendError(item)| {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                QueueClosed(item.request)
            })
    }

    /// Requests enqueued but not yet taken by the worker.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl QueueReceiver {
    pub fn next(&self, timeout: Duration) -> Next {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Next::Ready(item)
            }
            Err(RecvTimeoutError::Timeout) => Next::Idle,
            Err(RecvTimeoutError::Disconnected) => Next::Closed,
        }
    }

    /// Refuse further pushes and take everything still queued.
    ///
    /// Every push either lands before the close, and is returned here, or
    /// fails with [`QueueClosed`].
    pub fn close(&self) -> Vec<QueuedRequest> {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = true;
        let items: Vec<_> = self.rx.try_iter().collect();
        self.pending.fetch_sub(items.len(), Ordering::SeqCst);
        items
    }
}

#[cfg(test)]
mod tests {
    use cellrun_core::sink::NullSink;

    use super::*;

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest::new(None, code, Arc::new(NullSink))
    }

    #[test]
    fn test_fifo_with_sequence_numbers() {
        let (tx, rx) = channel();
        assert_eq!(tx.push(request("a")).ok(), Some(1));
        assert_eq!(tx.push(request("b")).ok(), Some(2));
        assert_eq!(tx.len(), 2);

        let Next::Ready(first) = rx.next(Duration::from_millis(10)) else {
            panic!("expected a request");
        };
        assert_eq!((first.seq, first.request.code()), (1, "a"));
        assert_eq!(tx.len(), 1);
        let Next::Ready(second) = rx.next(Duration::from_millis(10)) else {
            panic!("expected a request");
        };
        assert_eq!(second.request.code(), "b");
        assert!(matches!(rx.next(Duration::from_millis(10)), Next::Idle));
    }

    #[test]
    fn test_close_drains_and_refuses_later_pushes() {
        let (tx, rx) = channel();
        tx.push(request("a")).ok();
        tx.push(request("b")).ok();
        let seqs: Vec<u64> = rx.close().iter().map(|item| item.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(tx.len(), 0);

        let Err(QueueClosed(returned)) = tx.push(request("late")) else {
            panic!("push after close should fail");
        };
        assert_eq!(returned.code(), "late");
        assert!(rx.close().is_empty());
        assert_eq!(tx.len(), 0);
    }

    #[test]
    fn test_closed_queue_returns_request() {
        let (tx, rx) = channel();
        drop(rx);
        let Err(QueueClosed(returned)) = tx.push(request("lost")) else {
            panic!("push should fail");
        };
        assert_eq!(returned.code(), "lost");
        assert_eq!(tx.len(), 0);
    }
}
