//! Periodic expiry sweeper.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actor::RelayHandle;

/// Spawn the sweeper. It runs one sweep per `interval`, independent of
/// traffic, until `cancel` fires or the relay actor stops.
pub fn spawn_sweeper(relay: RelayHandle, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run_sweeper(relay, interval, cancel))
}

/// Sweep loop.
///
/// Each pass waits for the actor's report before the next tick is taken,
/// so at most one sweep is ever in flight. Ticks missed while a pass runs
/// are skipped rather than replayed.
pub async fn run_sweeper(relay: RelayHandle, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    info!(interval_secs = interval.as_secs_f64(), "sweeper started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match relay.sweep().await {
                    Some(report) => debug!(evicted = report.evicted.len(), "sweep pass done"),
                    None => {
                        debug!("relay actor gone, sweeper exiting");
                        break;
                    }
                }
            }
        }
    }
    info!("sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::spawn_relay;
    use relay_core::{ConnectionHandle, ConnectionId, Relay, SweepPolicy};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let (relay, _task) = spawn_relay(Relay::new(SweepPolicy::default()), 8, cancel.clone());
        let sweeper = spawn_sweeper(relay, Duration::from_secs(3600), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn sweeper_exits_when_actor_stops() {
        let actor_cancel = CancellationToken::new();
        let (relay, task) = spawn_relay(Relay::new(SweepPolicy::default()), 8, actor_cancel.clone());
        actor_cancel.cancel();
        task.await.unwrap();

        let sweeper = spawn_sweeper(relay, Duration::from_millis(10), CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn sweeper_expires_sessions_on_its_own() {
        let cancel = CancellationToken::new();
        let policy = SweepPolicy {
            max_age: Duration::ZERO,
            completed_grace: Duration::ZERO,
        };
        let (relay, _task) = spawn_relay(Relay::new(policy), 8, cancel.clone());

        let (tx, mut rx) = mpsc::channel(16);
        let ctl = ConnectionId::from_raw("ctl");
        assert!(relay.open(Arc::new(ConnectionHandle::new(ctl.clone(), tx))).await);
        let _ = relay.frame(ctl.clone(), json!({"type": "register_controller"}).to_string()).await;
        let _ = relay
            .frame(
                ctl,
                json!({"type": "create_session", "sessionId": "S1", "ownerId": "U1", "groupId": "G1", "displayName": "alice"})
                    .to_string(),
            )
            .await;

        let _sweeper = spawn_sweeper(relay, Duration::from_millis(20), cancel.clone());

        let expired = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(frame) = rx.recv().await {
                let value: Value = serde_json::from_str(&frame).unwrap();
                if value["type"] == "session_expired" {
                    return value;
                }
            }
            panic!("connection queue closed");
        })
        .await
        .unwrap();
        assert_eq!(expired["sessionId"], "S1");
        assert_eq!(expired["reason"], "max_age");
        cancel.cancel();
    }
}
