//! Per-address mutual exclusion
//!
//! An owned registry mapping wallet address -> lock, lazily populated and
//! never shrunk (bounded by the distinct addresses seen in one process).
//! Single-address acquisition is a plain async mutex wait; the multi-address
//! variant takes a whole set all-or-nothing so two overlapping sets can never
//! both be held, while disjoint sets proceed concurrently.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// How long a multi-address acquisition backs off between attempts
const MULTI_LOCK_RETRY: Duration = Duration::from_secs(1);

/// Registry of per-address locks
#[derive(Default)]
pub struct AddressLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, address: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap();
        map.entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock one address, waiting as long as it takes. The guard keeps the
    /// address locked until dropped.
    pub async fn acquire(&self, address: &str) -> OwnedMutexGuard<()> {
        self.entry(address).lock_owned().await
    }

    /// Lock a set of addresses as a unit. Attempts take the locks in sorted
    /// order and give everything back on the first conflict, so concurrent
    /// multi-acquisitions cannot deadlock and overlapping sets never both
    /// succeed. Released in reverse order on drop.
    pub async fn acquire_many(&self, addresses: &[String]) -> MultiGuard {
        let mut sorted: Vec<String> = addresses.to_vec();
        sorted.sort();
        sorted.dedup();

        loop {
            let mut acquired = Vec::with_capacity(sorted.len());
            let mut conflicted = false;

            for address in &sorted {
                match self.entry(address).try_lock_owned() {
                    Ok(guard) => acquired.push(guard),
                    Err(_) => {
                        conflicted = true;
                        break;
                    }
                }
            }

            if !conflicted {
                return MultiGuard { guards: acquired };
            }
            drop(acquired);
            tokio::time::sleep(MULTI_LOCK_RETRY).await;
        }
    }

    /// Number of distinct addresses ever locked
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guard over a multi-address acquisition
pub struct MultiGuard {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for MultiGuard {
    fn drop(&mut self) {
        // Release in reverse acquisition order
        while self.guards.pop().is_some() {}
    }
}
