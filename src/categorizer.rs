use std::collections::HashMap;
use std::path::PathBuf;

use log::{debug, warn};

use crate::error::Result;
use crate::models::CategoryRule;

/// Where category rules are read from. Loaded once per run.
pub trait CategoryTable {
    fn category_rules(&self) -> Result<Vec<CategoryRule>>;
}

/// `store,major_category,minor_category,display_label` with a header row.
pub struct CsvCategoryTable {
    path: PathBuf,
}

impl CsvCategoryTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CategoryTable for CsvCategoryTable {
    fn category_rules(&self) -> Result<Vec<CategoryRule>> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::None)
            .from_path(&self.path)?;
        let rules = rdr
            .deserialize::<CategoryRule>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}

/// Exact merchant-name lookup. No case folding, no whitespace trimming.
#[derive(Debug, Default)]
pub struct CategoryResolver {
    rules: HashMap<String, CategoryRule>,
}

impl CategoryResolver {
    pub fn load(table: &impl CategoryTable) -> Result<Self> {
        let resolver = Self::from_rules(table.category_rules()?);
        debug!("loaded {} category rules", resolver.rules.len());
        Ok(resolver)
    }

    pub fn from_rules(rules: Vec<CategoryRule>) -> Self {
        let mut map = HashMap::with_capacity(rules.len());
        for rule in rules {
            if map.contains_key(&rule.merchant) {
                warn!("duplicate category rule for `{}`, keeping the first", rule.merchant);
                continue;
            }
            map.insert(rule.merchant.clone(), rule);
        }
        Self { rules: map }
    }

    pub fn resolve(&self, merchant: &str) -> Option<&CategoryRule> {
        self.rules.get(merchant)
    }
}
