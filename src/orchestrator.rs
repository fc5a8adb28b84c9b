use chrono::NaiveDateTime;
use log::{info, warn};

use crate::categorizer::CategoryResolver;
use crate::driver::{Credentials, LedgerEntryDriver};
use crate::error::Result;
use crate::fetcher::{IncrementalFetcher, MessageSource};
use crate::models::TransactionRecord;
use crate::reconciler::{LedgerStore, ReconciliationStore};
use crate::session::InteractiveSession;

#[derive(Debug)]
pub struct CommittedEntry {
    pub record: TransactionRecord,
    pub memo: String,
    pub categorized: bool,
}

#[derive(Debug)]
pub struct RunSummary {
    pub fetched: usize,
    pub appended: usize,
    pub skipped: usize,
    pub known: usize,
    pub watermark: Option<NaiveDateTime>,
    pub committed: Vec<CommittedEntry>,
}

/// Resolves the ledger login. Only called when there is something to enter.
pub type CredentialSource = Box<dyn Fn() -> Result<Credentials>>;

/// One pass of the pipeline: fetch, reconcile, enter every pending record.
pub struct Orchestrator {
    fetcher: IncrementalFetcher,
    credentials: CredentialSource,
}

impl Orchestrator {
    pub fn new(fetcher: IncrementalFetcher, credentials: impl Fn() -> Result<Credentials> + 'static) -> Self {
        Self {
            fetcher,
            credentials: Box::new(credentials),
        }
    }

    pub fn run<M, L, S>(
        &self,
        source: &M,
        store: &mut ReconciliationStore<L>,
        categories: &CategoryResolver,
        driver: &mut LedgerEntryDriver<S>,
    ) -> Result<RunSummary>
    where
        M: MessageSource,
        L: LedgerStore,
        S: InteractiveSession,
    {
        let records = self.fetcher.fetch(store, source)?;
        let fetched = records.len();
        let reconciled = store.reconcile(records)?;
        info!(
            "{} new, {} already in ledger",
            reconciled.appended, reconciled.skipped
        );

        let mut committed = Vec::new();
        let pending = store.pending();
        if pending.is_empty() {
            info!("nothing to enter");
        } else {
            info!("{} transactions to enter", pending.len());
            let entered = self.enter_all(&pending, store, categories, driver, &mut committed);
            // Close even after a failure; the entry error is the one worth reporting.
            let closed = driver.close();
            entered?;
            closed?;
        }

        Ok(RunSummary {
            fetched,
            appended: reconciled.appended,
            skipped: reconciled.skipped,
            known: store.known_timestamps().len(),
            watermark: store.watermark(),
            committed,
        })
    }

    fn enter_all<L, S>(
        &self,
        pending: &[TransactionRecord],
        store: &mut ReconciliationStore<L>,
        categories: &CategoryResolver,
        driver: &mut LedgerEntryDriver<S>,
        committed: &mut Vec<CommittedEntry>,
    ) -> Result<()>
    where
        L: LedgerStore,
        S: InteractiveSession,
    {
        let credentials = (self.credentials)()?;
        driver.login(&credentials)?;
        for record in pending {
            let outcome = driver.enter(record, categories).inspect_err(|e| {
                warn!("stopping at {record}: {e}");
            })?;
            store.mark_committed(record)?;
            committed.push(CommittedEntry {
                record: record.clone(),
                memo: outcome.memo,
                categorized: outcome.categorized,
            });
        }
        Ok(())
    }
}
