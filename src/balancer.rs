// src/balancer.rs
use crate::error::EngineError;
use crate::models::cdr::Cdr;
use crate::rater::{CallCost, CallDescriptor, Rater};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Round-robin pool over rater back-ends. The list changes rarely and
/// is copied out of the lock before any call, so the hot path is one
/// atomic increment.
pub struct RaterPool {
    clients: RwLock<Vec<(String, Arc<dyn Rater>)>>,
    cursor: AtomicUsize,
}

impl RaterPool {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn add_client(&self, name: &str, client: Arc<dyn Rater>) {
        let mut clients = self.clients.write().unwrap();
        clients.push((name.to_string(), client));
        info!("<Balancer> added rater client: {}", name);
    }

    /// Deletes in place, preserving the relative order of survivors;
    /// the cursor is clamped to the new length.
    pub fn remove_client(&self, name: &str) {
        let mut clients = self.clients.write().unwrap();
        clients.retain(|(n, _)| n != name);
        let len = clients.len();
        if len == 0 {
            self.cursor.store(0, Ordering::SeqCst);
        } else if self.cursor.load(Ordering::SeqCst) > len {
            self.cursor.store(len, Ordering::SeqCst);
        }
        info!("<Balancer> removed rater client: {}", name);
    }

    pub fn get_client(&self, name: &str) -> Option<Arc<dyn Rater>> {
        self.clients
            .read()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
    }

    /// Next back-end in rotation, None when the pool is empty.
    pub fn next(&self) -> Option<Arc<dyn Rater>> {
        let clients = self.clients.read().unwrap();
        if clients.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % clients.len();
        Some(clients[idx].1.clone())
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pick(&self) -> Result<Arc<dyn Rater>, EngineError> {
        self.next()
            .ok_or_else(|| EngineError::RaterUnavailable("no raters in pool".to_string()))
    }
}

impl Default for RaterPool {
    fn default() -> Self {
        Self::new()
    }
}

// The pool fans the Rater capability out over its members, so session
// code takes one `Arc<dyn Rater>` regardless of back-end count.
#[async_trait]
impl Rater for RaterPool {
    async fn debit(&self, cd: &CallDescriptor) -> Result<CallCost, EngineError> {
        self.pick()?.debit(cd).await
    }

    async fn get_cost(&self, cd: &CallDescriptor) -> Result<CallCost, EngineError> {
        self.pick()?.get_cost(cd).await
    }

    async fn refund_increments(&self, cd: &CallDescriptor) -> Result<(), EngineError> {
        self.pick()?.refund_increments(cd).await
    }

    async fn max_session_time(&self, cd: &CallDescriptor) -> Result<f64, EngineError> {
        self.pick()?.max_session_time(cd).await
    }

    async fn derived_max_session_time(&self, cdr: &Cdr) -> Result<f64, EngineError> {
        self.pick()?.derived_max_session_time(cdr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubRater;

    #[async_trait]
    impl Rater for StubRater {
        async fn debit(&self, cd: &CallDescriptor) -> Result<CallCost, EngineError> {
            Ok(CallCost::for_descriptor(cd, 0.0))
        }
        async fn get_cost(&self, cd: &CallDescriptor) -> Result<CallCost, EngineError> {
            Ok(CallCost::for_descriptor(cd, 0.0))
        }
        async fn refund_increments(&self, _cd: &CallDescriptor) -> Result<(), EngineError> {
            Ok(())
        }
        async fn max_session_time(&self, _cd: &CallDescriptor) -> Result<f64, EngineError> {
            Ok(0.0)
        }
        async fn derived_max_session_time(&self, _cdr: &Cdr) -> Result<f64, EngineError> {
            Ok(0.0)
        }
    }

    fn stub() -> Arc<dyn Rater> {
        Arc::new(StubRater)
    }

    #[test]
    fn test_get_client() {
        let pool = RaterPool::new();
        let c1 = stub();
        pool.add_client("client 1", c1.clone());
        let found = pool.get_client("client 1").unwrap();
        assert!(Arc::ptr_eq(&found, &c1));
        assert!(pool.get_client("client 2").is_none());
    }

    #[test]
    fn test_single_client_rotation() {
        let pool = RaterPool::new();
        pool.add_client("client 1", stub());
        let a = pool.next().unwrap();
        let b = pool.next().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_hundred_client_rotation() {
        let pool = RaterPool::new();
        let mut clients = Vec::new();
        for i in 0..100 {
            let c = stub();
            clients.push(c.clone());
            pool.add_client(&format!("client {}", i), c);
        }
        for expected in &clients {
            let got = pool.next().unwrap();
            assert!(Arc::ptr_eq(&got, expected));
        }
        // 101st selection wraps to the first client.
        let wrapped = pool.next().unwrap();
        assert!(Arc::ptr_eq(&wrapped, &clients[0]));
    }

    #[test]
    fn test_remove_preserves_order() {
        let pool = RaterPool::new();
        let c1 = stub();
        let c2 = stub();
        let c3 = stub();
        pool.add_client("client 1", c1.clone());
        pool.add_client("client 2", c2);
        pool.add_client("client 3", c3.clone());
        pool.remove_client("client 2");
        assert_eq!(pool.len(), 2);
        assert!(Arc::ptr_eq(&pool.get_client("client 1").unwrap(), &c1));
        assert!(Arc::ptr_eq(&pool.get_client("client 3").unwrap(), &c3));
        // Survivors keep their relative order in the rotation.
        let first = pool.next().unwrap();
        let second = pool.next().unwrap();
        assert!(Arc::ptr_eq(&first, &c1));
        assert!(Arc::ptr_eq(&second, &c3));
    }

    #[test]
    fn test_empty_then_refilled_wraps_to_zero() {
        let pool = RaterPool::new();
        pool.add_client("client 1", stub());
        pool.next();
        pool.next();
        pool.remove_client("client 1");
        assert!(pool.next().is_none());
        let c = stub();
        pool.add_client("client 2", c.clone());
        assert!(Arc::ptr_eq(&pool.next().unwrap(), &c));
    }

    #[tokio::test]
    async fn test_pool_delegates_rater_calls() {
        let pool = RaterPool::new();
        assert!(pool
            .max_session_time(&CallDescriptor {
                tor: "*voice".into(),
                req_type: "*prepaid".into(),
                direction: "*out".into(),
                tenant: "t".into(),
                category: "call".into(),
                account: "1001".into(),
                subject: "1001".into(),
                destination: "1002".into(),
                time_start: chrono::Utc::now(),
                time_end: chrono::Utc::now(),
                duration_index: std::time::Duration::ZERO,
            })
            .await
            .is_err());
        pool.add_client("client 1", stub());
        assert!(pool.next().is_some());
    }
}
