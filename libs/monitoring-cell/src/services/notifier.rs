// =====================================================================================
// CHANGE NOTIFIER
// =====================================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::MonitoringSnapshot;

pub type SnapshotSender = broadcast::Sender<Arc<MonitoringSnapshot>>;
pub type SnapshotReceiver = broadcast::Receiver<Arc<MonitoringSnapshot>>;

const CHANNEL_CAPACITY: usize = 256;

/// Fans full-state snapshots out to every subscriber after each mutation.
pub struct ChangeNotifier {
    sender: SnapshotSender,
    version: AtomicU64,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            version: AtomicU64::new(0),
        }
    }

    pub fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, snapshot: MonitoringSnapshot) {
        let version = snapshot.version;
        // No receivers is not an error: nobody is watching yet.
        if let Ok(delivered) = self.sender.send(Arc::new(snapshot)) {
            debug!(version, delivered, "monitoring snapshot published");
        }
    }
}

/// Callback registration. Dropping it or calling `unsubscribe` stops delivery.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F>(mut receiver: SnapshotReceiver, callback: F) -> Self
    where
        F: Fn(Arc<MonitoringSnapshot>) + Send + Sync + 'static,
    {
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(snapshot) => callback(snapshot),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Snapshots are full state: only the newest retained one matters.
                        let latest = drain_to_latest(&mut receiver);
                        warn!(skipped, "subscriber lagged behind, delivering latest snapshot");
                        if let Some(snapshot) = latest {
                            callback(snapshot);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

fn drain_to_latest(receiver: &mut SnapshotReceiver) -> Option<Arc<MonitoringSnapshot>> {
    let mut latest = None;
    loop {
        match receiver.try_recv() {
            Ok(snapshot) => latest = Some(snapshot),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return latest,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AlertCounts, ConnectorCounts, JobCounts, OverallStatus, PerformanceSummary, SystemSummary,
    };
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn snapshot(version: u64) -> MonitoringSnapshot {
        MonitoringSnapshot {
            version,
            summary: SystemSummary {
                overall_status: OverallStatus::Healthy,
                connectors: ConnectorCounts::default(),
                alerts: AlertCounts::default(),
                performance: PerformanceSummary {
                    success_rate: 1.0,
                    avg_response_time_ms: 0.0,
                    total_requests_24h: 0,
                },
                remediation: JobCounts::default(),
                generated_at: shared_utils::test_utils::test_epoch(),
            },
            health: Vec::new(),
            active_alerts: Vec::new(),
            jobs: Vec::new(),
        }
    }

    #[test]
    fn test_versions_increase() {
        let notifier = ChangeNotifier::new();
        assert_eq!(notifier.next_version(), 1);
        assert_eq!(notifier.next_version(), 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_quiet() {
        let notifier = ChangeNotifier::new();
        assert_eq!(notifier.subscriber_count(), 0);
        notifier.publish(snapshot(1));

        let mut receiver = notifier.subscribe();
        notifier.publish(snapshot(2));
        assert_eq!(receiver.recv().await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_gets_newest_snapshot() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = Subscription::spawn(notifier.subscribe(), move |snapshot| {
            sink.lock().unwrap().push(snapshot.version);
        });

        // The subscriber task has not run yet, so it falls behind the channel capacity.
        let total = CHANNEL_CAPACITY as u64 + 44;
        for version in 1..=total {
            notifier.publish(snapshot(version));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock().unwrap(), vec![total]);
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_delivery() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let subscription = Subscription::spawn(notifier.subscribe(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(subscription.is_active());

        notifier.publish(snapshot(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        drop(subscription);
        tokio::time::sleep(Duration::from_millis(10)).await;
        notifier.publish(snapshot(2));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
