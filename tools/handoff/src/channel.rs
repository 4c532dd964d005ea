//! The rendezvous channel: an ordered handoff queue of exchanges.
//!
//! Producers `submit` calls and get a [`PendingResponse`] back without
//! blocking. Consumers take the oldest unclaimed [`Exchange`] with `next`,
//! suspending until one exists. Either side may arrive first.

use crate::call::{Call, Response};
use crate::cancel::{block_on, with_deadline, CancelToken};
use crate::errors::HandoffError;
use crate::exchange::{exchange_pair, Delivery, Exchange, PendingResponse};
use crate::logging::append_run_log;
use crate::transport::Transport;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

struct SubmitState {
    next_id: u64,
    sender: Option<mpsc::UnboundedSender<Exchange>>,
}

pub struct RendezvousChannel {
    submit: Mutex<SubmitState>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Exchange>>,
    pending: AtomicUsize,
}

impl RendezvousChannel {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            submit: Mutex::new(SubmitState {
                next_id: 1,
                sender: Some(sender),
            }),
            receiver: tokio::sync::Mutex::new(receiver),
            pending: AtomicUsize::new(0),
        }
    }

    /// Enqueue `call` for the consumer side. Never blocks.
    ///
    /// The exchange stays visible to consumers only while the returned
    /// [`PendingResponse`] is alive; dropping it abandons the exchange.
    #[must_use = "dropping the pending response abandons the exchange"]
    pub fn submit(&self, call: Call) -> Result<PendingResponse, HandoffError> {
        let mut state = self.submit.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = state.sender.as_ref() else {
            return Err(HandoffError::ChannelClosed);
        };
        let id = state.next_id;
        let summary = call.to_string();
        let (exchange, pending) = exchange_pair(id, call);
        // Id assignment and enqueue share the lock so ids follow queue order.
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(exchange).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(HandoffError::ChannelClosed);
        }
        state.next_id += 1;
        drop(state);
        append_run_log(
            "debug",
            "exchange.submitted",
            json!({ "id": id, "call": summary }),
        );
        Ok(pending)
    }

    /// Oldest unclaimed exchange, suspending until one is submitted.
    ///
    /// Exchanges whose producer already gave up are dropped here instead of
    /// being handed out.
    pub async fn next(&self) -> Result<Exchange, HandoffError> {
        let mut receiver = self.receiver.lock().await;
        loop {
            let Some(exchange) = receiver.recv().await else {
                return Err(HandoffError::ChannelClosed);
            };
            if let Some(exchange) = self.claim(exchange) {
                return Ok(exchange);
            }
        }
    }

    /// Like [`next`](Self::next), failing with `Cancelled` once `cancel` fires.
    /// A cancelled call claims nothing.
    pub async fn next_cancellable(&self, cancel: &CancelToken) -> Result<Exchange, HandoffError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                append_run_log("warn", "exchange.next.cancelled", json!({}));
                Err(HandoffError::Cancelled("next exchange".to_string()))
            }
            result = self.next() => result,
        }
    }

    pub async fn next_timeout(&self, limit: Duration) -> Result<Exchange, HandoffError> {
        with_deadline(limit, "next exchange", self.next()).await
    }

    /// Thread-backed variant of [`next`](Self::next). Must not be called
    /// from inside an async runtime.
    pub fn blocking_next(&self) -> Result<Exchange, HandoffError> {
        let mut receiver = self.receiver.blocking_lock();
        loop {
            let Some(exchange) = receiver.blocking_recv() else {
                return Err(HandoffError::ChannelClosed);
            };
            if let Some(exchange) = self.claim(exchange) {
                return Ok(exchange);
            }
        }
    }

    pub fn blocking_next_timeout(&self, limit: Duration) -> Result<Exchange, HandoffError> {
        block_on(self.next_timeout(limit))?
    }

    /// Take the oldest pending exchange if one is already queued.
    ///
    /// Fails with `ConsumerBusy` while another consumer is inside `next`,
    /// since the queue cannot be inspected then.
    pub fn try_next(&self) -> Result<Option<Exchange>, HandoffError> {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            return Err(HandoffError::ConsumerBusy {
                pending: self.pending_len(),
            });
        };
        loop {
            match receiver.try_recv() {
                Ok(exchange) => {
                    if let Some(exchange) = self.claim(exchange) {
                        return Ok(Some(exchange));
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(HandoffError::ChannelClosed)
                }
            }
        }
    }

    /// Settle `exchange` with `response`; see [`Exchange::settle`].
    pub fn settle(
        &self,
        exchange: &Exchange,
        response: Response,
    ) -> Result<Delivery, HandoffError> {
        exchange.settle(response)
    }

    /// Number of submitted exchanges not yet taken by a consumer, including
    /// abandoned ones that have not been discarded yet.
    pub fn pending_len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Refuse further submits. Already queued exchanges can still be taken;
    /// once drained, `next` fails with `ChannelClosed`.
    pub fn close(&self) {
        let mut state = self.submit.lock().unwrap_or_else(PoisonError::into_inner);
        if state.sender.take().is_some() {
            append_run_log("info", "channel.closed", json!({ "next_id": state.next_id }));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.submit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
            .is_none()
    }

    fn claim(&self, exchange: Exchange) -> Option<Exchange> {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        if exchange.is_abandoned() {
            append_run_log(
                "warn",
                "exchange.discarded",
                json!({ "id": exchange.id(), "call": exchange.call().to_string() }),
            );
            return None;
        }
        append_run_log(
            "debug",
            "exchange.claimed",
            json!({ "id": exchange.id(), "call": exchange.call().to_string() }),
        );
        Some(exchange)
    }
}

impl Default for RendezvousChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for RendezvousChannel {
    async fn send(&self, call: Call, cancel: &CancelToken) -> Result<Response, HandoffError> {
        let pending = self.submit(call)?;
        pending.wait_cancellable(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::RendezvousChannel;
    use crate::call::{Call, Response};
    use crate::cancel::CancelToken;
    use crate::errors::HandoffError;
    use crate::exchange::Delivery;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn producer_first_hands_over_without_suspending() {
        let channel = RendezvousChannel::new();
        let pending = channel.submit(Call::get("/api/items")).expect("submit");
        assert_eq!(channel.pending_len(), 1);
        let exchange = channel.next().await.expect("next");
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(exchange.id(), pending.id());
        exchange.settle(Response::ok()).expect("settle");
        assert_eq!(pending.wait().await.expect("response").status, 200);
    }

    #[tokio::test]
    async fn consumer_first_is_woken_by_a_later_submit() {
        let channel = Arc::new(RendezvousChannel::new());
        let consumer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.next().await })
        };
        tokio::task::yield_now().await;
        let pending = channel.submit(Call::post("/api/session")).expect("submit");
        let exchange = consumer.await.expect("join").expect("next");
        assert_eq!(exchange.call().target, "/api/session");
        exchange.settle(Response::ok()).expect("settle");
        pending.wait().await.expect("response");
    }

    #[tokio::test]
    async fn ids_and_delivery_follow_submission_order() {
        let channel = RendezvousChannel::new();
        let targets = ["/a", "/b", "/c"];
        let pendings = targets
            .iter()
            .map(|target| channel.submit(Call::get(*target)).expect("submit"))
            .collect::<Vec<_>>();
        for (pending, target) in pendings.iter().zip(targets) {
            let exchange = channel.next().await.expect("next");
            assert_eq!(exchange.id(), pending.id());
            assert_eq!(exchange.call().target, target);
        }
        assert!(channel.try_next().expect("try_next").is_none());
    }

    #[tokio::test]
    async fn cancelled_next_claims_nothing() {
        let channel = RendezvousChannel::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = channel
            .next_cancellable(&cancel)
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());

        let pending = channel.submit(Call::get("/api/items")).expect("submit");
        let err = channel
            .next_cancellable(&cancel)
            .await
            .expect_err("still cancelled");
        assert!(err.is_cancelled());
        assert_eq!(channel.pending_len(), 1);
        let exchange = channel
            .next_timeout(Duration::from_secs(5))
            .await
            .expect("exchange survives cancellation");
        assert_eq!(exchange.call().target, "/api/items");
        assert_eq!(exchange.id(), pending.id());
    }

    #[tokio::test]
    async fn exchanges_abandoned_by_their_producer_are_skipped() {
        let channel = RendezvousChannel::new();
        let abandoned = channel.submit(Call::get("/first")).expect("submit");
        let kept = channel.submit(Call::get("/second")).expect("submit");
        drop(abandoned);
        let exchange = channel.next().await.expect("next");
        assert_eq!(exchange.call().target, "/second");
        assert_eq!(exchange.id(), kept.id());
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_pending_response_is_never_delivered() {
        let channel = RendezvousChannel::new();
        drop(channel.submit(Call::get("/api/items")).expect("submit"));
        assert_eq!(channel.pending_len(), 1);
        let err = channel
            .next_timeout(Duration::from_millis(200))
            .await
            .expect_err("abandoned exchange is skipped");
        assert!(err.is_cancelled());
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn try_next_reports_busy_while_another_consumer_waits() {
        let channel = Arc::new(RendezvousChannel::new());
        let parked = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.next().await })
        };
        tokio::task::yield_now().await;

        let pending = channel.submit(Call::get("/api/items")).expect("submit");
        assert!(matches!(
            channel.try_next(),
            Err(HandoffError::ConsumerBusy { pending: 1 })
        ));

        let exchange = parked.await.expect("join").expect("next");
        exchange.settle(Response::ok()).expect("settle");
        pending.wait().await.expect("response");
        assert!(channel.try_next().expect("lock released").is_none());
    }

    #[tokio::test]
    async fn channel_settle_delivers_to_the_waiting_producer() {
        let channel = RendezvousChannel::new();
        let pending = channel.submit(Call::post("/api/session")).expect("submit");
        let exchange = channel.next().await.expect("next");
        assert_eq!(
            channel
                .settle(&exchange, Response::with_status(204))
                .expect("settle"),
            Delivery::Delivered
        );
        assert!(matches!(
            channel.settle(&exchange, Response::ok()),
            Err(HandoffError::AlreadySettled { .. })
        ));
        assert_eq!(pending.wait().await.expect("response").status, 204);
    }

    #[tokio::test(start_paused = true)]
    async fn next_timeout_reports_cancelled_when_nothing_arrives() {
        let channel = RendezvousChannel::new();
        let err = channel
            .next_timeout(Duration::from_millis(100))
            .await
            .expect_err("timeout");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn close_refuses_submits_and_drains_queue() {
        let channel = RendezvousChannel::new();
        let queued = channel.submit(Call::get("/queued")).expect("submit");
        channel.close();
        assert!(channel.is_closed());
        assert!(matches!(
            channel.submit(Call::get("/late")),
            Err(HandoffError::ChannelClosed)
        ));
        let exchange = channel.next().await.expect("queued");
        assert_eq!(exchange.id(), queued.id());
        assert!(matches!(channel.next().await, Err(HandoffError::ChannelClosed)));
        exchange.settle(Response::ok()).expect("settle after close");
        assert_eq!(queued.wait().await.expect("response").status, 200);
    }

    #[tokio::test]
    async fn dropping_the_channel_fails_queued_producers() {
        let channel = RendezvousChannel::new();
        let pending = channel.submit(Call::get("/api/items")).expect("submit");
        drop(channel);
        assert!(matches!(
            pending.wait().await,
            Err(HandoffError::ExchangeDropped { .. })
        ));
    }

    #[test]
    fn blocking_sides_rendezvous_across_threads() {
        let channel = Arc::new(RendezvousChannel::new());
        let driver = {
            let channel = Arc::clone(&channel);
            std::thread::spawn(move || {
                let exchange = channel.blocking_next().expect("next");
                let target = exchange.call().target.clone();
                exchange.settle(Response::with_status(201)).expect("settle");
                target
            })
        };
        let pending = channel.submit(Call::post("/api/items?name=a")).expect("submit");
        assert_eq!(pending.blocking_wait().expect("response").status, 201);
        assert_eq!(driver.join().expect("join"), "/api/items?name=a");
    }
}
