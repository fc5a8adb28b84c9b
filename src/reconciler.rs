use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::models::{LedgerColumn, LedgerRow, LedgerStatus, TransactionRecord, TIMESTAMP_FORMAT};

const ROW_TIMESTAMP_FORMATS: &[&str] = &[TIMESTAMP_FORMAT, "%Y/%m/%d %H:%M:%S"];

/// Row-oriented persistence behind the reconciliation store.
///
/// Rows are addressed by their zero-based position in `read_rows` order. There is no
/// conditional insert, so callers must check for duplicates before appending.
pub trait LedgerStore {
    fn read_rows(&self) -> Result<Vec<LedgerRow>>;

    fn append_row(&mut self, row: &LedgerRow) -> Result<()>;

    fn update_cell(&mut self, row: usize, column: LedgerColumn, value: &str) -> Result<()>;
}

struct Entry {
    row: usize,
    record: TransactionRecord,
}

pub struct ReconcileResult {
    pub appended: usize,
    pub skipped: usize,
}

/// In-memory view of the ledger, keyed by notification time.
pub struct ReconciliationStore<L> {
    ledger: L,
    entries: Vec<Entry>,
    index: HashMap<NaiveDateTime, usize>,
    row_count: usize,
}

fn parse_row_timestamp(raw: &str) -> Option<NaiveDateTime> {
    ROW_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
}

fn record_from_row(row_index: usize, row: &LedgerRow) -> Result<TransactionRecord> {
    let corrupt = |reason: String| SyncError::CorruptRow {
        row: row_index,
        reason,
    };
    let source_timestamp = parse_row_timestamp(&row.email_date)
        .ok_or_else(|| corrupt(format!("email_date `{}`", row.email_date)))?;
    let usage_timestamp = parse_row_timestamp(&row.date_of_use)
        .ok_or_else(|| corrupt(format!("date_of_use `{}`", row.date_of_use)))?;
    let amount = u64::try_from(row.amount).map_err(|_| corrupt(format!("amount {}", row.amount)))?;
    let status = LedgerStatus::from_cell(&row.mf_status)
        .ok_or_else(|| corrupt(format!("mf_status `{}`", row.mf_status)))?;
    Ok(TransactionRecord {
        source_timestamp,
        usage_timestamp,
        amount,
        merchant: row.store.clone(),
        status,
    })
}

impl<L: LedgerStore> ReconciliationStore<L> {
    pub fn load(ledger: L) -> Result<Self> {
        let rows = ledger.read_rows()?;
        let mut store = Self {
            ledger,
            entries: Vec::with_capacity(rows.len()),
            index: HashMap::with_capacity(rows.len()),
            row_count: rows.len(),
        };
        for (i, row) in rows.iter().enumerate() {
            let record = record_from_row(i, row)?;
            if store.index.contains_key(&record.source_timestamp) {
                warn!("ledger row {i} repeats {}, ignoring it", record.key());
                continue;
            }
            store.index.insert(record.source_timestamp, store.entries.len());
            store.entries.push(Entry { row: i, record });
        }
        debug!("loaded {} ledger rows", store.row_count);
        Ok(store)
    }

    pub fn known_timestamps(&self) -> HashSet<NaiveDateTime> {
        self.index.keys().copied().collect()
    }

    pub fn contains(&self, source_timestamp: &NaiveDateTime) -> bool {
        self.index.contains_key(source_timestamp)
    }

    /// Persist a new pending row. The record must not be known yet.
    pub fn append(&mut self, record: TransactionRecord) -> Result<()> {
        if self.contains(&record.source_timestamp) {
            return Err(SyncError::DuplicateKey(record.key()));
        }
        let record = TransactionRecord {
            status: LedgerStatus::Pending,
            ..record
        };
        let row = record.to_row()?;
        self.ledger.append_row(&row)?;
        self.index.insert(record.source_timestamp, self.entries.len());
        self.entries.push(Entry {
            row: self.row_count,
            record,
        });
        self.row_count += 1;
        Ok(())
    }

    /// Append the records not seen before, in the order given.
    pub fn reconcile(&mut self, records: Vec<TransactionRecord>) -> Result<ReconcileResult> {
        let mut appended = 0usize;
        let mut skipped = 0usize;
        for record in records {
            if self.contains(&record.source_timestamp) {
                debug!("already in ledger: {record}");
                skipped += 1;
                continue;
            }
            info!("new transaction: {record}");
            self.append(record)?;
            appended += 1;
        }
        Ok(ReconcileResult { appended, skipped })
    }

    pub fn mark_committed(&mut self, record: &TransactionRecord) -> Result<()> {
        let pos = *self
            .index
            .get(&record.source_timestamp)
            .ok_or_else(|| SyncError::UnknownRecord(record.key()))?;
        let entry = &mut self.entries[pos];
        if entry.record.status == LedgerStatus::Committed {
            return Ok(());
        }
        self.ledger
            .update_cell(entry.row, LedgerColumn::MfStatus, LedgerStatus::Committed.as_cell())?;
        entry.record.status = LedgerStatus::Committed;
        Ok(())
    }

    /// Records still waiting for the external ledger, in append order.
    pub fn pending(&self) -> Vec<TransactionRecord> {
        self.entries
            .iter()
            .filter(|e| e.record.status == LedgerStatus::Pending)
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn watermark(&self) -> Option<NaiveDateTime> {
        self.index.keys().max().copied()
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}
