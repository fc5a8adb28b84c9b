use chrono::FixedOffset;
use colored::Colorize;
use comfy_table::{Cell, Table};
use log::info;

use crate::categorizer::{CategoryResolver, CsvCategoryTable};
use crate::db::SqliteLedger;
use crate::driver::LedgerEntryDriver;
use crate::error::{Result, SyncError};
use crate::extractor::{ExtractionPolicy, RecordExtractor};
use crate::fetcher::IncrementalFetcher;
use crate::fmt::yen;
use crate::gmail::GmailSource;
use crate::models::TIMESTAMP_FORMAT;
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::reconciler::ReconciliationStore;
use crate::settings::{
    check_ledger_email, load_credentials, load_settings, save_settings, settings_file, settings_file_exists,
    shellexpand_path,
};
use crate::webdriver::WebDriverSession;

pub fn run() -> Result<()> {
    let settings = load_settings()?;
    if !settings_file_exists() {
        save_settings(&settings)?;
        info!("wrote default settings to {}", settings_file().display());
    }

    check_ledger_email(&settings.ledger)?;
    let offset = FixedOffset::east_opt(settings.mail.utc_offset_minutes * 60).ok_or_else(|| {
        SyncError::Settings(format!(
            "mail.utc_offset_minutes {} is out of range",
            settings.mail.utc_offset_minutes
        ))
    })?;

    let db_path = settings.db_path();
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let ledger = SqliteLedger::open(&db_path)?;
    let categories = match &settings.categories_csv {
        Some(path) => CategoryResolver::load(&CsvCategoryTable::new(shellexpand_path(path)))?,
        None => CategoryResolver::load(&ledger)?,
    };
    let mut store = ReconciliationStore::load(ledger)?;

    let source = GmailSource::from_token_file(&settings.mail.api_base, &settings.mail.token_path())?;
    let extractor = RecordExtractor::new(
        ExtractionPolicy::from_strict_flag(settings.mail.strict_extraction),
        offset,
    );
    let fetcher = IncrementalFetcher::new(&settings.mail, extractor)?;

    let session = WebDriverSession::new(&settings.ledger.webdriver_url, settings.ledger.poll_interval())?;
    let mut driver = LedgerEntryDriver::new(session, &settings.ledger);

    let ledger_settings = settings.ledger.clone();
    let orchestrator = Orchestrator::new(fetcher, move || load_credentials(&ledger_settings));
    let summary = orchestrator.run(&source, &mut store, &categories, &mut driver)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if !summary.committed.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Used", "Amount", "Store", "Memo", "Category"]);
        for entry in &summary.committed {
            let category = if entry.categorized {
                Cell::new("yes".green())
            } else {
                Cell::new("no".yellow())
            };
            table.add_row(vec![
                Cell::new(entry.record.usage_timestamp.format(TIMESTAMP_FORMAT)),
                Cell::new(yen(entry.record.amount)),
                Cell::new(&entry.record.merchant),
                Cell::new(&entry.memo),
                category,
            ]);
        }
        println!("{}\n{table}", "Entered".bold());
    }

    let watermark = summary
        .watermark
        .map(|w| w.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "none".to_string());
    println!(
        "Fetched {}, appended {}, skipped {}, entered {}. Ledger holds {} (latest {watermark}).",
        summary.fetched,
        summary.appended,
        summary.skipped,
        summary.committed.len(),
        summary.known
    );
}
