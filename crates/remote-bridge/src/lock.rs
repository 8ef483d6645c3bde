use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes stage+rsync per username so concurrent submits for the
/// same user cannot race on the staging directory wipe-and-rebuild
/// (spec.md §5 Shared-resource policy).
#[derive(Default)]
pub struct StagingLocks {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl StagingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, username: &str) -> OwnedMutexGuard<()> {
        let handle = self
            .inner
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        handle.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_same_user() {
        let locks = Arc::new(StagingLocks::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let l1 = locks.clone();
        let o1 = order.clone();
        let h1 = tokio::spawn(async move {
            let _g = l1.lock("alice").await;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            o1.lock().await.push(1);
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let l2 = locks.clone();
        let o2 = order.clone();
        let h2 = tokio::spawn(async move {
            let _g = l2.lock("alice").await;
            o2.lock().await.push(2);
        });
        h1.await.unwrap();
        h2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }
}
