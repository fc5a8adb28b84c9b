use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};

use crate::error::Result;
use crate::extractor::RecordExtractor;
use crate::models::{RawMessage, TransactionRecord};
use crate::reconciler::{LedgerStore, ReconciliationStore};
use crate::settings::MailSettings;

/// Mailbox search. The after-bound only has day granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub sender: String,
    pub subject: String,
    pub after: NaiveDate,
}

impl MessageQuery {
    /// Gmail search syntax, e.g. `from:a@b subject:ご利用のお知らせ after:2023/06/28`.
    pub fn to_search(&self) -> String {
        format!(
            "from:{} subject:{} after:{}",
            self.sender,
            self.subject,
            self.after.format("%Y/%m/%d")
        )
    }
}

pub trait MessageSource {
    /// Ids of matching messages, newest first.
    fn list_ids(&self, query: &MessageQuery) -> Result<Vec<String>>;

    fn fetch(&self, id: &str) -> Result<RawMessage>;
}

pub struct IncrementalFetcher {
    sender: String,
    subject: String,
    epoch: NaiveDate,
    extractor: RecordExtractor,
}

impl IncrementalFetcher {
    pub fn new(mail: &MailSettings, extractor: RecordExtractor) -> Result<Self> {
        Ok(Self {
            sender: mail.sender.clone(),
            subject: mail.subject.clone(),
            epoch: mail.epoch_date()?,
            extractor,
        })
    }

    /// Latest known notification time, or midnight of the epoch for an empty ledger.
    pub fn watermark<L: LedgerStore>(&self, store: &ReconciliationStore<L>) -> NaiveDateTime {
        store
            .watermark()
            .unwrap_or_else(|| self.epoch.and_time(chrono::NaiveTime::MIN))
    }

    /// Gmail reads `after:` as midnight Pacific time, which is later in the day than the
    /// ledger's offset, so a known watermark is queried from the day before. The extra
    /// messages are already in the ledger and reconciliation drops them.
    pub fn query<L: LedgerStore>(&self, store: &ReconciliationStore<L>) -> MessageQuery {
        let after = match store.watermark() {
            Some(latest) => latest.date().pred_opt().unwrap_or(latest.date()),
            None => self.epoch,
        };
        MessageQuery {
            sender: self.sender.clone(),
            subject: self.subject.clone(),
            after,
        }
    }

    /// Extracted records for every candidate message, oldest first.
    ///
    /// Candidates already in `store` are returned too when they fall on the watermark's day;
    /// reconciliation drops them.
    pub fn fetch<L: LedgerStore, M: MessageSource>(
        &self,
        store: &ReconciliationStore<L>,
        source: &M,
    ) -> Result<Vec<TransactionRecord>> {
        let query = self.query(store);
        info!("searching mailbox: {}", query.to_search());
        let ids = source.list_ids(&query)?;
        debug!("{} candidate messages", ids.len());

        let mut records = Vec::with_capacity(ids.len());
        for id in ids.iter().rev() {
            let message = source.fetch(id)?;
            if let Some(record) = self.extractor.extract_record(&message) {
                records.push(record);
            }
        }
        info!("extracted {} of {} messages", records.len(), ids.len());
        Ok(records)
    }
}
