//! Turns IndexedDB's event-driven request objects into futures.
//!
//! A request (`IDBRequest`, `IDBOpenDBRequest`) or a whole transaction
//! eventually fires exactly one terminal event. [`bridge`] listens for all four
//! terminal event names, since requests and transactions report completion
//! through different ones, and settles a single-resolution slot with the first
//! one that fires.
//!
//! There is no timeout: if the host never fires a terminal event the future
//! stays pending forever.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_channel::oneshot;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Event, EventTarget, IdbOpenDbRequest, IdbRequest, IdbTransaction};

use crate::{Result, StoreError};

/// Terminal notifications a native request object may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Complete,
    Success,
    Abort,
    Error,
}

impl Notification {
    pub const ALL: [Notification; 4] = [
        Notification::Complete,
        Notification::Success,
        Notification::Abort,
        Notification::Error,
    ];

    pub fn event_name(self) -> &'static str {
        match self {
            Notification::Complete => "complete",
            Notification::Success => "success",
            Notification::Abort => "abort",
            Notification::Error => "error",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Notification::Abort | Notification::Error)
    }
}

/// Sending half of a single-resolution slot. Clones share the slot; the first
/// [`Settle::settle`] wins and every later call is ignored.
pub struct Settle<T> {
    tx: Rc<RefCell<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Settle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Rc::clone(&self.tx),
        }
    }
}

impl<T> Settle<T> {
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Rc::new(RefCell::new(Some(tx))),
            },
            rx,
        )
    }

    /// Returns `true` if this call settled the slot.
    pub fn settle(&self, value: T) -> bool {
        match self.tx.borrow_mut().take() {
            Some(tx) => {
                // The receiver may already be gone; the slot is spent either way.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_none()
    }
}

/// A host object that fires one terminal event and exposes its outcome.
pub trait Notifier: AsRef<EventTarget> + Clone + Unpin + 'static {
    /// Success payload, read when `success` or `complete` fires.
    fn payload(&self) -> Result<JsValue>;

    /// Failure payload, read when `error` or `abort` fires.
    fn failure(&self, event: &Event) -> StoreError;
}

fn request_failure(request: &IdbRequest) -> StoreError {
    match request.error() {
        Ok(ex) => StoreError::from_dom_exception(ex),
        Err(err) => StoreError::Js(err),
    }
}

impl Notifier for IdbRequest {
    fn payload(&self) -> Result<JsValue> {
        Ok(self.result()?)
    }

    fn failure(&self, _event: &Event) -> StoreError {
        request_failure(self)
    }
}

impl Notifier for IdbOpenDbRequest {
    fn payload(&self) -> Result<JsValue> {
        Ok(self.result()?)
    }

    fn failure(&self, _event: &Event) -> StoreError {
        request_failure(self)
    }
}

impl Notifier for IdbTransaction {
    fn payload(&self) -> Result<JsValue> {
        Ok(JsValue::UNDEFINED)
    }

    fn failure(&self, event: &Event) -> StoreError {
        if let Some(ex) = self.error() {
            return StoreError::Js(ex.into());
        }
        // A failed request's `error` event bubbles here before the transaction
        // records its own error.
        match event.target().and_then(|t| t.dyn_into::<IdbRequest>().ok()) {
            Some(request) => request_failure(&request),
            None => StoreError::Aborted,
        }
    }
}

type Listener = Closure<dyn FnMut(Event)>;

/// Future resolving with a request's result, or rejecting with its error.
///
/// Dropping it detaches the listeners it registered.
#[must_use = "futures do nothing unless polled"]
pub struct RequestFuture<N: Notifier> {
    target: N,
    rx: oneshot::Receiver<Result<JsValue>>,
    listeners: Vec<(Notification, Listener)>,
}

pub fn bridge<N: Notifier>(target: &N) -> Result<RequestFuture<N>> {
    let (settle, rx) = Settle::channel();
    let event_target: &EventTarget = target.as_ref();

    // Listeners live in the future from the start so an early return detaches
    // the ones already registered.
    let mut future = RequestFuture {
        target: target.clone(),
        rx,
        listeners: Vec::with_capacity(Notification::ALL.len()),
    };
    for kind in Notification::ALL {
        let settle = settle.clone();
        let source = target.clone();
        let listener = Listener::new(move |event: Event| {
            if settle.is_settled() {
                return;
            }
            let outcome = if kind.is_failure() {
                Err(source.failure(&event))
            } else {
                source.payload()
            };
            settle.settle(outcome);
        });
        event_target.add_event_listener_with_callback(
            kind.event_name(),
            listener.as_ref().unchecked_ref(),
        )?;
        future.listeners.push((kind, listener));
    }

    Ok(future)
}

impl<N: Notifier> Future for RequestFuture<N> {
    type Output = Result<JsValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(StoreError::Canceled)))
    }
}

impl<N: Notifier> Drop for RequestFuture<N> {
    fn drop(&mut self) {
        let event_target: &EventTarget = self.target.as_ref();
        for (kind, listener) in self.listeners.drain(..) {
            let _ = event_target.remove_event_listener_with_callback(
                kind.event_name(),
                listener.as_ref().unchecked_ref(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds() {
        let failures: Vec<_> = Notification::ALL
            .into_iter()
            .filter(|kind| kind.is_failure())
            .collect();
        assert_eq!(failures, [Notification::Abort, Notification::Error]);
    }

    #[test]
    fn event_names_are_distinct() {
        let mut names: Vec<_> = Notification::ALL.iter().map(|k| k.event_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn first_settlement_wins() {
        let (settle, rx) = Settle::<u32>::channel();
        let other = settle.clone();

        assert!(!settle.is_settled());
        assert!(settle.settle(1));
        assert!(other.is_settled());
        assert!(!other.settle(2));

        assert_eq!(pollster::block_on(rx), Ok(1));
    }

    #[test]
    fn settling_after_receiver_drop_still_spends_slot() {
        let (settle, rx) = Settle::<u32>::channel();
        drop(rx);
        assert!(settle.settle(7));
        assert!(!settle.settle(8));
    }

    #[test]
    fn dropped_slot_cancels_receiver() {
        let (settle, rx) = Settle::<u32>::channel();
        drop(settle);
        assert!(pollster::block_on(rx).is_err());
    }
}
