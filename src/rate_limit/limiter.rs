use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::debug;

/// Two-level limiter on concurrent engine processes: session-wide and per host.
#[derive(Clone)]
pub struct RateLimiter {
    global_sem: Arc<Semaphore>,
    per_host_limit: usize,
    host_semaphores: Arc<RwLock<HashMap<IpAddr, Arc<Semaphore>>>>,
}

impl RateLimiter {
    pub fn new(max_parallel: usize, max_per_host: usize) -> Self {
        Self {
            global_sem: Arc::new(Semaphore::new(max_parallel.max(1))),
            per_host_limit: max_per_host.max(1),
            host_semaphores: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Wait for a global and a per-host permit for `ip`.
    /// Returns None once the limiter has been closed.
    pub async fn acquire(&self, ip: IpAddr) -> Option<RateLimitGuard> {
        let global_permit = self.global_sem.clone().acquire_owned().await.ok()?;

        let host_sem = {
            let mut sems = self.host_semaphores.write().await;
            sems.entry(ip)
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
                .clone()
        };
        let host_permit = host_sem.acquire_owned().await.ok()?;

        debug!("Acquired rate limit permits for {}", ip);

        Some(RateLimitGuard {
            _global: global_permit,
            _host: host_permit,
        })
    }

    /// Wake every waiter with None. Permits already held stay valid.
    pub async fn close(&self) {
        self.global_sem.close();
        for sem in self.host_semaphores.read().await.values() {
            sem.close();
        }
    }

    #[cfg(test)]
    fn available_global(&self) -> usize {
        self.global_sem.available_permits()
    }
}

/// Permits are released when dropped.
pub struct RateLimitGuard {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_global_permits_are_consumed_and_returned() {
        let limiter = RateLimiter::new(4, 1);

        let a = limiter.acquire("10.0.0.1".parse().unwrap()).await.unwrap();
        let b = limiter.acquire("10.0.0.2".parse().unwrap()).await.unwrap();
        assert_eq!(limiter.available_global(), 2);

        drop(a);
        drop(b);
        assert_eq!(limiter.available_global(), 4);
    }

    #[tokio::test]
    async fn test_per_host_limit_serializes_one_address() {
        let limiter = RateLimiter::new(4, 1);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let _held = limiter.acquire(ip).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), limiter.acquire(ip)).await;

        assert!(second.is_err(), "second permit for the same host must wait");
    }

    #[tokio::test]
    async fn test_closed_limiter_refuses_new_work() {
        let limiter = RateLimiter::new(1, 1);
        limiter.close().await;

        assert!(limiter.acquire("10.0.0.1".parse().unwrap()).await.is_none());
    }
}
