use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::debug;

use gsecret_core::Metrics;

/// The quota the buffer controller learned for one bucket, derived from a
/// secret's `RateLimit.remaining`/`reset`.
#[derive(Debug, Clone)]
pub struct BufferRateLimits {
    pub remaining: i64,
    pub resets: DateTime<Utc>,
}

/// A single queued request's wait handle. `wait()` returns on release or on
/// `timeout`, whichever comes first — a timeout is not an error (spec
/// §4.4 "the rate-limiter proceeds regardless of the cause").
pub struct BufferDelay {
    notify: Arc<Notify>,
    timeout: Duration,
}

impl BufferDelay {
    pub fn new(timeout: Duration) -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            timeout,
        }
    }

    fn handle(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    pub async fn wait(&self) {
        let _ = tokio::time::timeout(self.timeout, self.notify.notified()).await;
    }
}

#[derive(Default)]
struct BufferQueue {
    pending: Mutex<HashMap<String, VecDeque<Arc<Notify>>>>,
    has_items: Notify,
}

impl BufferQueue {
    fn add(&self, bucket: &str, handle: Arc<Notify>) {
        let mut pending = self.pending.lock().expect("buffer queue lock poisoned");
        pending.entry(bucket.to_string()).or_default().push_back(handle);
        self.has_items.notify_one();
    }

    fn has_any(&self) -> bool {
        self.pending
            .lock()
            .expect("buffer queue lock poisoned")
            .values()
            .any(|q| !q.is_empty())
    }

    /// Pops at most one queued head per bucket not in `ignore`.
    fn take_heads(&self, ignore: &HashSet<String>) -> HashMap<String, Arc<Notify>> {
        let mut pending = self.pending.lock().expect("buffer queue lock poisoned");
        let mut taken = HashMap::new();
        for (bucket, queue) in pending.iter_mut() {
            if ignore.contains(bucket) {
                continue;
            }
            if let Some(handle) = queue.pop_front() {
                taken.insert(bucket.clone(), handle);
            }
        }
        taken
    }

    async fn wait_for_items(&self) {
        if self.has_any() {
            return;
        }
        self.has_items.notified().await;
    }
}

/// Process-wide fair scheduler: one background task releases buffered
/// requests bucket-by-bucket according to each bucket's observed quota.
pub struct BufferController {
    queue: BufferQueue,
    rate_limits: Mutex<HashMap<String, BufferRateLimits>>,
    metrics: Arc<Metrics>,
}

impl BufferController {
    pub fn spawn(metrics: Arc<Metrics>) -> Arc<Self> {
        let controller = Arc::new(Self {
            queue: BufferQueue::default(),
            rate_limits: Mutex::new(HashMap::new()),
            metrics,
        });
        tokio::spawn(Self::run(Arc::clone(&controller)));
        controller
    }

    pub fn has_rate_limit(&self, bucket: &str) -> bool {
        self.rate_limits
            .lock()
            .expect("rate limit table lock poisoned")
            .contains_key(bucket)
    }

    pub fn log_rate_limit(&self, bucket: &str, rate_limit: BufferRateLimits) {
        self.rate_limits
            .lock()
            .expect("rate limit table lock poisoned")
            .insert(bucket.to_string(), rate_limit);
    }

    pub fn enqueue(&self, bucket: &str, delay: &BufferDelay) {
        self.metrics.inc_rate_limiter_queue_depth(bucket);
        self.queue.add(bucket, delay.handle());
    }

    fn delay_seconds(rate_limit: &BufferRateLimits) -> f64 {
        let reset_delta = (rate_limit.resets - Utc::now()).num_milliseconds() as f64 / 1000.0;
        if reset_delta < 0.0 {
            return 0.0;
        }
        reset_delta / (rate_limit.remaining as f64 * 0.95).max(1.0)
    }

    /// One pass: pop at most one head per bucket not already held from the
    /// previous pass, release every zero-delay head immediately, then
    /// sleep for and release the single smallest positive delay. A bucket
    /// held from a previous pass that loses the race is simply dropped —
    /// its own `wait().timeout` is the backstop.
    async fn run(controller: Arc<Self>) {
        let mut held: HashMap<String, Arc<Notify>> = HashMap::new();
        loop {
            if held.is_empty() {
                controller.queue.wait_for_items().await;
            }
            let ignore: HashSet<String> = held.keys().cloned().collect();
            held = controller.queue.take_heads(&ignore);

            let mut min_bucket: Option<String> = None;
            let mut min_delay = 0.0_f64;
            let mut zero_delay_buckets = Vec::new();
            {
                let limits = controller.rate_limits.lock().expect("rate limit table lock poisoned");
                for (bucket, _) in held.iter() {
                    let Some(rate_limit) = limits.get(bucket) else {
                        continue;
                    };
                    let delay = Self::delay_seconds(rate_limit);
                    if delay <= 0.0 {
                        zero_delay_buckets.push(bucket.clone());
                        continue;
                    }
                    if min_bucket.is_none() || delay < min_delay {
                        min_delay = delay;
                        min_bucket = Some(bucket.clone());
                    }
                }
            }

            for bucket in zero_delay_buckets {
                if let Some(handle) = held.remove(&bucket) {
                    handle.notify_one();
                    controller.metrics.dec_rate_limiter_queue_depth(&bucket);
                }
            }

            if let Some(bucket) = min_bucket {
                debug!(bucket = %bucket, delay_seconds = min_delay, "buffer controller sleeping for minimum delay bucket");
                tokio::time::sleep(Duration::from_secs_f64(min_delay)).await;
                if let Some(handle) = held.remove(&bucket) {
                    handle.notify_one();
                    controller.metrics.dec_rate_limiter_queue_depth(&bucket);
                }
            }
        }
    }
}

/// Per-stage-instance learned bucket membership: which bucket a given
/// secret id/key belongs to, discovered from observed responses.
pub struct BufferedStageClient {
    controller: Arc<BufferController>,
    default_delay: Duration,
    secret_id_bucket: Mutex<HashMap<String, String>>,
    secret_key_bucket: Mutex<HashMap<String, String>>,
}

impl BufferedStageClient {
    pub fn new(controller: Arc<BufferController>, default_delay: Duration) -> Self {
        Self {
            controller,
            default_delay,
            secret_id_bucket: Mutex::new(HashMap::new()),
            secret_key_bucket: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_id_bucket(&self, secret_id: &str, bucket: &str) {
        self.secret_id_bucket
            .lock()
            .expect("id bucket map lock poisoned")
            .insert(secret_id.to_string(), bucket.to_string());
    }

    pub fn register_key_bucket(&self, secret_key: &str, bucket: &str) {
        self.secret_key_bucket
            .lock()
            .expect("key bucket map lock poisoned")
            .insert(secret_key.to_string(), bucket.to_string());
    }

    pub async fn id_delay(&self, secret_id: &str, delay: &BufferDelay) {
        let bucket = self
            .secret_id_bucket
            .lock()
            .expect("id bucket map lock poisoned")
            .get(secret_id)
            .cloned();
        self.wait_on_bucket(bucket, delay).await;
    }

    pub async fn key_delay(&self, secret_key: &str, delay: &BufferDelay) {
        let bucket = self
            .secret_key_bucket
            .lock()
            .expect("key bucket map lock poisoned")
            .get(secret_key)
            .cloned();
        self.wait_on_bucket(bucket, delay).await;
    }

    async fn wait_on_bucket(&self, bucket: Option<String>, delay: &BufferDelay) {
        match bucket {
            Some(bucket) if self.controller.has_rate_limit(&bucket) => {
                self.controller.enqueue(&bucket, delay);
                delay.wait().await;
            }
            _ => tokio::time::sleep(self.default_delay).await,
        }
    }

    pub fn log_id_rate_limit(&self, secret_id: &str, bucket: &str, rate_limit: BufferRateLimits) {
        self.register_id_bucket(secret_id, bucket);
        self.controller.log_rate_limit(bucket, rate_limit);
    }

    pub fn log_key_rate_limit(&self, secret_key: &str, bucket: &str, rate_limit: BufferRateLimits) {
        self.register_key_bucket(secret_key, bucket);
        self.controller.log_rate_limit(bucket, rate_limit);
    }

    #[cfg(test)]
    pub fn id_delay_bucket_registered(&self, secret_id: &str) -> bool {
        self.secret_id_bucket
            .lock()
            .expect("id bucket map lock poisoned")
            .contains_key(secret_id)
    }
}
