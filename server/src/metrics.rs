use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 12;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] =
    [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        match LATENCY_BUCKETS_MS.iter().position(|bucket| ms <= *bucket) {
            Some(idx) => self.buckets[idx].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };
        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HttpMetricsSnapshot {
    pub requests: LatencySnapshot,
    pub webhook: LatencySnapshot,
    pub reject_origin: u64,
    pub reject_body_limit: u64,
    pub reject_rate_limit: u64,
    pub server_errors: u64,
}

/// Request latency and rejection counters fed by the request-id middleware.
#[derive(Default)]
pub struct HttpMetrics {
    requests: LatencyMetrics,
    webhook: LatencyMetrics,
    reject_origin: AtomicU64,
    reject_body_limit: AtomicU64,
    reject_rate_limit: AtomicU64,
    server_errors: AtomicU64,
}

impl HttpMetrics {
    pub fn record_request(&self, duration: Duration) {
        self.requests.record(duration);
    }

    pub fn record_webhook(&self, duration: Duration) {
        self.webhook.record(duration);
    }

    pub fn inc_reject_origin(&self) {
        self.reject_origin.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_body_limit(&self) {
        self.reject_body_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_rate_limit(&self) {
        self.reject_rate_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_server_error(&self) {
        self.server_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            requests: self.requests.snapshot(),
            webhook: self.webhook.snapshot(),
            reject_origin: self.reject_origin.load(Ordering::Relaxed),
            reject_body_limit: self.reject_body_limit.load(Ordering::Relaxed),
            reject_rate_limit: self.reject_rate_limit.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct WalletMetricsSnapshot {
    pub tournament_joins: u64,
    pub team_joins: u64,
    pub deposit_orders: u64,
    pub deposits_paid: u64,
    pub deposits_failed: u64,
    pub webhook_replays: u64,
    pub webhook_rejected: u64,
    pub withdrawals_requested: u64,
    pub withdrawals_settled: u64,
}

/// Counters for the money-moving flows.
#[derive(Default)]
pub struct WalletMetrics {
    tournament_joins: AtomicU64,
    team_joins: AtomicU64,
    deposit_orders: AtomicU64,
    deposits_paid: AtomicU64,
    deposits_failed: AtomicU64,
    webhook_replays: AtomicU64,
    webhook_rejected: AtomicU64,
    withdrawals_requested: AtomicU64,
    withdrawals_settled: AtomicU64,
}

impl WalletMetrics {
    pub fn inc_tournament_join(&self) {
        self.tournament_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_team_join(&self) {
        self.team_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deposit_order(&self) {
        self.deposit_orders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deposit_paid(&self) {
        self.deposits_paid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deposit_failed(&self) {
        self.deposits_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_webhook_replay(&self) {
        self.webhook_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_webhook_rejected(&self) {
        self.webhook_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_withdrawal_requested(&self) {
        self.withdrawals_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_withdrawal_settled(&self) {
        self.withdrawals_settled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WalletMetricsSnapshot {
        WalletMetricsSnapshot {
            tournament_joins: self.tournament_joins.load(Ordering::Relaxed),
            team_joins: self.team_joins.load(Ordering::Relaxed),
            deposit_orders: self.deposit_orders.load(Ordering::Relaxed),
            deposits_paid: self.deposits_paid.load(Ordering::Relaxed),
            deposits_failed: self.deposits_failed.load(Ordering::Relaxed),
            webhook_replays: self.webhook_replays.load(Ordering::Relaxed),
            webhook_rejected: self.webhook_rejected.load(Ordering::Relaxed),
            withdrawals_requested: self.withdrawals_requested.load(Ordering::Relaxed),
            withdrawals_settled: self.withdrawals_settled.load(Ordering::Relaxed),
        }
    }
}
