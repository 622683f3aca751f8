//! Poller - due になった envelope を拾い直すバックグラウンドループ
//!
//! # フロー（1 sweep）
//! 1. `release_expired_claims(now)` でクラッシュしたノードの claim を回収
//! 2. `claim_due(node_id, batch_size, now)` で自ノード分を claim
//! 3. 各 envelope を `MessageContext::process` へ（最大 `max_parallelism` 並列）
//!
//! sweep は再入しない（前の sweep が終わるまで次は始まらない）。
//! sweep 間の待機は polling interval・loopback からの wake・shutdown の 3 つを select する。
//! shutdown は `shutdown_grace` だけ実行中の sweep を待ち、それを過ぎたら諦める。
//! 諦めた envelope は claim されたまま残り、timeout 後に次の sweep が拾う。

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::context::MessageContext;
use crate::domain::{CourierError, ErrorKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired claims released at the start of the sweep.
    pub released: usize,
    /// Envelopes claimed and processed.
    pub processed: usize,
}

/// Poller handle.
/// - `shutdown_tx` を drop してもループは止まる
/// - `shutdown_and_join()` で終了を待てる
pub struct Poller {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Poller {
    pub fn spawn(messaging: MessageContext) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(poll_loop(messaging, shutdown_rx));
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "poller task failed");
        }
    }
}

/// Resolves once shutdown is requested or the handle is dropped.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[tracing::instrument(skip_all, fields(node_id = %messaging.node_id()))]
async fn poll_loop(messaging: MessageContext, mut shutdown_rx: watch::Receiver<bool>) {
    let settings = messaging.settings().clone();

    tokio::select! {
        _ = tokio::time::sleep(settings.first_execution_delay()) => {}
        _ = shutdown_requested(&mut shutdown_rx) => return,
    }
    tracing::info!(
        polling_interval_ms = settings.polling_interval_ms,
        batch_size = settings.batch_size,
        "poller started"
    );

    loop {
        let sweep_fut = sweep(&messaging);
        tokio::pin!(sweep_fut);

        let finished = tokio::select! {
            result = &mut sweep_fut => Some(result),
            _ = shutdown_requested(&mut shutdown_rx) => None,
        };

        match finished {
            Some(result) => log_sweep(result),
            None => {
                match tokio::time::timeout(settings.shutdown_grace(), &mut sweep_fut).await {
                    Ok(result) => log_sweep(result),
                    Err(_) => tracing::warn!(
                        grace_ms = settings.shutdown_grace_ms,
                        "abandoning in-progress sweep; its claims will expire"
                    ),
                }
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.polling_interval()) => {}
            _ = messaging.wake().notified() => {
                tracing::trace!("poller woken early");
            }
            _ = shutdown_requested(&mut shutdown_rx) => break,
        }
    }
    tracing::info!("poller stopped");
}

fn log_sweep(result: Result<SweepReport, CourierError>) {
    match result {
        Ok(report) if report.released > 0 || report.processed > 0 => {
            tracing::debug!(
                released = report.released,
                processed = report.processed,
                "sweep finished"
            );
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::Infrastructure => {
            tracing::warn!(error = %e, "store unavailable; sweep aborted until next tick");
        }
        Err(e) => tracing::error!(error = %e, "sweep failed"),
    }
}

/// One sweep. Public so hosts and tests can drive the poller by hand.
pub async fn sweep(messaging: &MessageContext) -> Result<SweepReport, CourierError> {
    let settings = messaging.settings();
    let store = messaging.store();
    let now = messaging.clock().now();

    let released = store.release_expired_claims(now).await?;
    if released > 0 {
        tracing::info!(released, "released expired claims");
    }

    let claimed = store
        .claim_due(messaging.node_id(), settings.batch_size, now)
        .await?;
    let processed = claimed.len();

    futures::stream::iter(claimed)
        .for_each_concurrent(settings.max_parallelism.max(1), |envelope| {
            let messaging = messaging.clone();
            async move {
                let id = envelope.id;
                if let Err(e) = messaging.process(envelope).await {
                    // the claim stays; it is retried after the claim timeout
                    tracing::warn!(envelope_id = %id, error = %e, "could not record outcome");
                }
            }
        })
        .await;

    Ok(SweepReport {
        released,
        processed,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{Envelope, EnvelopeStatus};
    use crate::ports::{Clock, EnvelopeStore};
    use crate::testing::{FlakyHandler, Ping, harness};
    use serde_json::json;

    /// Sweep (advancing the clock past any backoff) until something is terminal.
    async fn drive_until_terminal(h: &crate::testing::Harness) -> Envelope {
        for _ in 0..20 {
            sweep(&h.messaging()).await.unwrap();
            if let Some(done) = h.store.all().await.into_iter().find(|e| e.status.is_terminal()) {
                return done;
            }
            h.clock.advance(Duration::from_secs(60));
        }
        panic!("envelope never reached a terminal state");
    }

    #[tokio::test]
    async fn handler_fails_twice_then_succeeds() {
        let h = harness()
            .handler::<Ping, _>(FlakyHandler::new(2))
            .settings(|s| s.max_attempts = 3)
            .build();
        h.messaging()
            .accept_incoming(&h.incoming::<Ping>(&json!({"seq": 1})))
            .await
            .unwrap();
        // the inbox copy is held by this node; let the claim lapse
        h.clock.advance(Duration::from_secs(31));

        let done = drive_until_terminal(&h).await;
        assert_eq!(done.status, EnvelopeStatus::Handled);
        assert_eq!(done.attempts, 2);
    }

    #[tokio::test]
    async fn handler_always_fails_ends_in_dead_letter() {
        let h = harness()
            .handler::<Ping, _>(FlakyHandler::new(u32::MAX))
            .settings(|s| s.max_attempts = 2)
            .build();
        h.messaging()
            .accept_incoming(&h.incoming::<Ping>(&json!({"seq": 1})))
            .await
            .unwrap();
        h.clock.advance(Duration::from_secs(31));

        let done = drive_until_terminal(&h).await;
        assert_eq!(done.status, EnvelopeStatus::DeadLetter);
        assert_eq!(done.attempts, 2);
    }

    #[tokio::test]
    async fn sweep_releases_claims_of_vanished_nodes() {
        let h = harness().route::<Ping>("memory://a").build();
        let mut stale = h.outgoing::<Ping>("memory://a", &json!({"seq": 1}));
        stale.claim(crate::domain::NodeId::new("crashed"), h.clock.now());
        h.store.persist(stale.clone()).await.unwrap();

        let report = sweep(&h.messaging()).await.unwrap();
        assert_eq!(report, SweepReport { released: 0, processed: 0 });

        h.clock.advance(Duration::from_secs(30));
        let report = sweep(&h.messaging()).await.unwrap();
        assert_eq!(report, SweepReport { released: 1, processed: 1 });
        assert_eq!(h.status(stale.id).await, EnvelopeStatus::Handled);
    }

    #[tokio::test]
    async fn store_outage_aborts_the_sweep() {
        let h = harness().build();
        h.store.fail_next(1);
        let err = sweep(&h.messaging()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(sweep(&h.messaging()).await.is_ok());
    }

    #[tokio::test]
    async fn running_poller_delivers_scheduled_send_once_due() {
        let h = harness()
            .route::<Ping>("memory://a")
            .settings(|s| s.polling_interval_ms = 10)
            .build();
        let poller = h.bus.start_poller();

        let at = h.clock.now() + chrono::Duration::seconds(5);
        let ids = h.messaging().schedule_send(&Ping { seq: 1 }, at).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.memory.sent().await.is_empty());

        h.clock.advance(Duration::from_secs(6));
        let mut status = h.status(ids[0]).await;
        for _ in 0..200 {
            if status == EnvelopeStatus::Handled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = h.status(ids[0]).await;
        }
        assert_eq!(status, EnvelopeStatus::Handled);
        assert_eq!(h.memory.sent().await.len(), 1);

        poller.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn loopback_send_is_handled_without_waiting_for_the_interval() {
        let recorder = crate::testing::RecordingHandler::default();
        let h = harness()
            .route::<Ping>("loopback://local")
            .handler::<Ping, _>(recorder.clone())
            .settings(|s| s.polling_interval_ms = 60_000)
            .build();
        let poller = h.bus.start_poller();
        // let the first (empty) sweep run so the loop is parked on the interval
        tokio::time::sleep(Duration::from_millis(20)).await;

        for d in h.messaging().send(&Ping { seq: 8 }).await.unwrap() {
            d.wait().await.unwrap();
        }
        for _ in 0..200 {
            if !recorder.seen().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.seen().await, vec![8]);

        poller.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let h = harness().settings(|s| s.polling_interval_ms = 60_000).build();
        let poller = h.bus.start_poller();
        tokio::time::timeout(Duration::from_secs(1), poller.shutdown_and_join())
            .await
            .unwrap();
    }
}
