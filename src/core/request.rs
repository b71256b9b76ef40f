//! Purpose: Bridge fire-once engine completions into awaitable futures.
//! Exports: `Request`, `Responder`.
//! Role: The only completion primitive between engine implementations and operations.
//! Invariants: A request resolves exactly once; resolving consumes the responder.
//! Invariants: A responder dropped without resolving fails its request with `Aborted`.
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::core::engine::{EngineError, EngineErrorKind};

type Completion<T> = Result<T, EngineError>;

/// Pending engine request. Await it to get the engine's single result.
#[must_use = "engine requests do nothing observable unless awaited"]
pub struct Request<T> {
    rx: oneshot::Receiver<Completion<T>>,
}

/// Completion side of a [`Request`], held by the engine until the work finishes.
pub struct Responder<T> {
    tx: oneshot::Sender<Completion<T>>,
}

impl<T> Request<T> {
    pub fn pending() -> (Request<T>, Responder<T>) {
        let (tx, rx) = oneshot::channel();
        (Request { rx }, Responder { tx })
    }

    pub fn ready(result: Completion<T>) -> Self {
        let (request, responder) = Self::pending();
        responder.complete(result);
        request
    }

    pub fn failed(err: EngineError) -> Self {
        Self::ready(Err(err))
    }
}

impl<T> Future for Request<T> {
    type Output = Completion<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_closed)) => Poll::Ready(Err(EngineError::new(
                EngineErrorKind::Aborted,
            )
            .with_message("request dropped before completion"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Responder<T> {
    pub fn complete(self, result: Completion<T>) {
        // The caller may have stopped waiting; nothing to report then.
        let _ = self.tx.send(result);
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, err: EngineError) {
        self.complete(Err(err));
    }
}
