//! Bounded task scheduler
//!
//! One task per eligible job, all joined before returning. Two gates order
//! each task: the account's address lock first (one in-flight task per wallet,
//! held through the post-action cooldown), then a global semaphore bounding
//! how many task bodies are active at once. Domain failures are absorbed into
//! report lines and job statuses; a store failure is the only error that
//! crosses this boundary, and it ends the run.

use crate::db::{Database, StoreError};
use crate::locks::AddressLocks;
use crate::notifier::Notifier;
use crate::types::{EligibleJob, RunMode, RunOutcome};
use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// The domain-action collaborator: everything between "locks held" and
/// "status recorded" for one account entry. Implementations own their network
/// sessions and release them before returning.
pub trait AccountAction: Send + Sync + 'static {
    fn run(
        &self,
        entry: &EligibleJob,
        mode: RunMode,
    ) -> impl Future<Output = Result<RunOutcome>> + Send;
}

/// Scheduler over one store, one lock registry, and one action implementation
pub struct Scheduler<A: AccountAction> {
    db: Arc<Database>,
    locks: Arc<AddressLocks>,
    notifier: Arc<Notifier>,
    action: Arc<A>,
    /// Maximum concurrently active task bodies
    threads: usize,
    /// Post-action cooldown range in seconds, slept while the address lock
    /// is still held
    cooldown_secs: (u64, u64),
}

impl<A: AccountAction> Scheduler<A> {
    pub fn new(
        db: Arc<Database>,
        locks: Arc<AddressLocks>,
        notifier: Arc<Notifier>,
        action: Arc<A>,
        threads: usize,
        cooldown_secs: (u64, u64),
    ) -> Self {
        Self {
            db,
            locks,
            notifier,
            action,
            threads: threads.max(1),
            cooldown_secs,
        }
    }

    /// Run one full pass over every eligible job. Returns after every spawned
    /// task finished; in-flight tasks are never cancelled, even when one of
    /// them hits a fatal store error.
    pub async fn run(&self, mode: RunMode) -> Result<(), StoreError> {
        let entries = self.db.list_eligible(mode.unique_wallets()).await?;
        if entries.is_empty() {
            info!("No more accounts left");
            return Ok(());
        }
        info!(
            "Running {} {} task(s) across {} thread(s)",
            entries.len(),
            mode,
            self.threads
        );

        let semaphore = Arc::new(Semaphore::new(self.threads));
        let mut tasks = JoinSet::new();
        for entry in entries {
            let db = self.db.clone();
            let locks = self.locks.clone();
            let notifier = self.notifier.clone();
            let action = self.action.clone();
            let semaphore = semaphore.clone();
            let cooldown = self.cooldown_secs;
            tasks.spawn(async move {
                process_entry(db, locks, notifier, action, semaphore, cooldown, entry, mode).await
            });
        }

        let mut fatal: Option<StoreError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(store_err)) => {
                    error!("Store failure: {}", store_err);
                    fatal.get_or_insert(store_err);
                }
                Err(join_err) => error!("Account task panicked: {}", join_err),
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => {
                info!("All accounts done.");
                Ok(())
            }
        }
    }
}

/// One account-task: address lock, concurrency slot, domain action, status
/// recording, drain-time report flush, cooldown.
async fn process_entry<A: AccountAction>(
    db: Arc<Database>,
    locks: Arc<AddressLocks>,
    notifier: Arc<Notifier>,
    action: Arc<A>,
    semaphore: Arc<Semaphore>,
    cooldown_secs: (u64, u64),
    entry: EligibleJob,
    mode: RunMode,
) -> Result<(), StoreError> {
    let _address_guard = locks.acquire(&entry.address).await;
    let Ok(_permit) = semaphore.acquire_owned().await else {
        // Semaphore is never closed while tasks run
        return Ok(());
    };
    debug!("{} | Starting {} job", entry.address, entry.module_name);

    let outcome = match action.run(&entry, mode).await {
        Ok(outcome) => outcome,
        Err(err) => match err.downcast::<StoreError>() {
            // Store integrity failures terminate the run
            Ok(store_err) => return Err(store_err),
            Err(err) => {
                error!("{} | Global error: {}", entry.address, err);
                db.append_report_line(&entry.encrypted_key, &err.to_string(), Some(false))
                    .await?;
                RunOutcome::Failed
            }
        },
    };

    let drained = if mode.unique_wallets() {
        db.complete_account(&entry, outcome).await?;
        true
    } else {
        db.complete_job(&entry, outcome).await?
    };

    if drained {
        let report = db.flush_report(&entry.encrypted_key, &entry.address).await?;
        notifier.send(&report).await;
    }

    // Cooldown before the address unlocks, throttling per-account rate
    let (lo, hi) = cooldown_secs;
    let secs = rand::thread_rng().gen_range(lo.min(hi)..=hi.max(lo));
    tokio::time::sleep(Duration::from_secs(secs)).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    static TEST_DIR: AtomicU32 = AtomicU32::new(0);

    fn test_db() -> Arc<Database> {
        let dir: PathBuf = std::env::temp_dir().join(format!(
            "opinion-bot-sched-test-{}-{}",
            std::process::id(),
            TEST_DIR.fetch_add(1, Ordering::SeqCst)
        ));
        let db =
            Database::new(dir.join("modules.json"), dir.join("report.json"), false).unwrap();
        db.set_master_key("test").unwrap();
        Arc::new(db)
    }

    fn test_keys(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("0x{:064x}", i)).collect()
    }

    fn scheduler<A: AccountAction>(
        db: Arc<Database>,
        action: A,
        threads: usize,
    ) -> Scheduler<A> {
        Scheduler::new(
            db,
            Arc::new(AddressLocks::new()),
            Arc::new(Notifier::disabled()),
            Arc::new(action),
            threads,
            (0, 0),
        )
    }

    /// Instrumented action: tracks per-address overlap and global concurrency,
    /// with optional per-address scripted results.
    #[derive(Default)]
    struct InstrumentedAction {
        active_addresses: Mutex<HashSet<String>>,
        address_overlap: AtomicUsize,
        active_now: AtomicUsize,
        peak_active: AtomicUsize,
        calls: AtomicUsize,
        fail_addresses: Mutex<HashSet<String>>,
        cloudflare_addresses: Mutex<HashSet<String>>,
        store_error_addresses: Mutex<HashSet<String>>,
    }

    impl AccountAction for InstrumentedAction {
        fn run(
            &self,
            entry: &EligibleJob,
            _mode: RunMode,
        ) -> impl Future<Output = Result<RunOutcome>> + Send {
            let address = entry.address.clone();
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.active_addresses.lock().unwrap().insert(address.clone()) {
                    self.address_overlap.fetch_add(1, Ordering::SeqCst);
                }
                let now = self.active_now.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_active.fetch_max(now, Ordering::SeqCst);

                tokio::time::sleep(Duration::from_millis(5)).await;

                self.active_now.fetch_sub(1, Ordering::SeqCst);
                self.active_addresses.lock().unwrap().remove(&address);

                if self.store_error_addresses.lock().unwrap().contains(&address) {
                    return Err(anyhow::Error::new(StoreError::KeyNotSet));
                }
                if self.fail_addresses.lock().unwrap().contains(&address) {
                    anyhow::bail!("scripted domain failure");
                }
                if self.cloudflare_addresses.lock().unwrap().contains(&address) {
                    return Ok(RunOutcome::Cloudflare);
                }
                Ok(RunOutcome::Completed)
            }
        }
    }

    #[tokio::test]
    async fn test_full_pass_drains_every_job() {
        let db = test_db();
        db.bulk_create(&test_keys(3), &[], (2, 2)).await.unwrap();

        let sched = scheduler(db.clone(), InstrumentedAction::default(), 4);
        sched.run(RunMode::BuySell).await.unwrap();

        // No job is ever left to_run after a pass
        assert_eq!(db.summary().await.unwrap().to_run, 0);
        assert!(db.list_eligible(false).await.unwrap().is_empty());
        assert_eq!(sched.action.calls.load(Ordering::SeqCst), 6);
        assert_eq!(sched.action.address_overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let db = test_db();
        db.bulk_create(&test_keys(6), &[], (1, 1)).await.unwrap();

        let sched = scheduler(db.clone(), InstrumentedAction::default(), 2);
        sched.run(RunMode::BuySell).await.unwrap();

        assert!(sched.action.peak_active.load(Ordering::SeqCst) <= 2);
        assert_eq!(sched.action.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_per_address_jobs_never_overlap() {
        let db = test_db();
        // One account with a deep queue maximizes same-address contention
        db.bulk_create(&test_keys(2), &[], (4, 4)).await.unwrap();

        let sched = scheduler(db.clone(), InstrumentedAction::default(), 8);
        sched.run(RunMode::BuySell).await.unwrap();

        assert_eq!(sched.action.address_overlap.load(Ordering::SeqCst), 0);
        assert_eq!(sched.action.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_domain_failure_is_absorbed() {
        let db = test_db();
        db.bulk_create(&test_keys(2), &[], (1, 1)).await.unwrap();
        let failing_address = db.list_eligible(false).await.unwrap()[0].address.clone();

        let action = InstrumentedAction::default();
        action
            .fail_addresses
            .lock()
            .unwrap()
            .insert(failing_address);
        let sched = scheduler(db.clone(), action, 4);

        // A domain error does not abort the pass
        sched.run(RunMode::BuySell).await.unwrap();

        let summary = db.summary().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.to_run, 0);
        // The sibling account completed and was removed
        assert_eq!(summary.accounts, 1);
    }

    #[tokio::test]
    async fn test_cloudflare_outcome_keeps_slot() {
        let db = test_db();
        db.bulk_create(&test_keys(1), &[], (1, 1)).await.unwrap();
        let address = db.list_eligible(false).await.unwrap()[0].address.clone();

        let action = InstrumentedAction::default();
        action.cloudflare_addresses.lock().unwrap().insert(address);
        let sched = scheduler(db.clone(), action, 2);
        sched.run(RunMode::BuySell).await.unwrap();

        assert_eq!(db.summary().await.unwrap().cloudflare, 1);
    }

    #[tokio::test]
    async fn test_store_error_is_fatal_but_siblings_finish() {
        let db = test_db();
        db.bulk_create(&test_keys(3), &[], (1, 1)).await.unwrap();
        let poisoned = db.list_eligible(false).await.unwrap()[0].address.clone();

        let action = InstrumentedAction::default();
        action.store_error_addresses.lock().unwrap().insert(poisoned);
        let sched = scheduler(db.clone(), action, 4);

        let result = sched.run(RunMode::BuySell).await;
        assert!(matches!(result, Err(StoreError::KeyNotSet)));

        // Siblings were not cancelled: both other accounts completed
        assert_eq!(sched.action.calls.load(Ordering::SeqCst), 3);
        assert_eq!(db.summary().await.unwrap().accounts, 1);
    }

    #[tokio::test]
    async fn test_per_account_mode_touches_each_wallet_once() {
        let db = test_db();
        db.bulk_create(&test_keys(3), &[], (3, 3)).await.unwrap();

        let sched = scheduler(db.clone(), InstrumentedAction::default(), 4);
        sched.run(RunMode::SellAll).await.unwrap();

        // One action per wallet, and successful whole-account completion
        // removes the account outright
        assert_eq!(sched.action.calls.load(Ordering::SeqCst), 3);
        assert_eq!(db.summary().await.unwrap().accounts, 0);
    }
}
