use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Serializing rate gate for outbound catalog calls.
///
/// Every caller awaits [`RateGate::wait`] before issuing a request. The lock
/// is held across the spacing sleep, so however many matching jobs run
/// concurrently, no two outbound calls can leave less than `min_interval`
/// apart. Single-process, in-memory: a restart forgets the last-call time.
pub struct RateGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Block until at least `min_interval` has passed since the previous
    /// caller's gate release, then claim the current slot.
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let due = prev + self.min_interval;
            let now = Instant::now();
            if now < due {
                tokio::time::sleep(due - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}
