use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::model::{DatasetProvider, QcDataset, Row, COL_CATEGORY, COL_ID};
use crate::config::FiltersConfig;
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Category pools: declarative alias / suppressor rules
// ---------------------------------------------------------------------------

/// What selecting a category code means beyond the code itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRule {
    /// Underlying categories this code stands for.
    #[serde(default)]
    pub expands_to: Vec<String>,
    /// Categories that become ineligible while this code is selected.
    #[serde(default)]
    pub suppresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPools {
    rules: BTreeMap<String, PoolRule>,
}

impl CategoryPools {
    pub fn new(rules: BTreeMap<String, PoolRule>) -> Self {
        Self { rules }
    }

    /// Flatten a selection into the set of categories rows may carry.
    ///
    /// Each selected code contributes itself plus its expansion; the union of
    /// all suppressed groups is removed afterwards.
    pub fn resolve(&self, selected: &BTreeSet<String>) -> BTreeSet<String> {
        let mut eligible = BTreeSet::new();
        let mut suppressed = BTreeSet::new();
        for code in selected {
            eligible.insert(code.clone());
            if let Some(rule) = self.rules.get(code) {
                eligible.extend(rule.expands_to.iter().cloned());
                suppressed.extend(rule.suppresses.iter().cloned());
            }
        }
        eligible.retain(|c| !suppressed.contains(c));
        eligible
    }
}

// ---------------------------------------------------------------------------
// FilterState
// ---------------------------------------------------------------------------

/// Category / instrument selection plus the hidden rows.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    selected_categories: BTreeSet<String>,
    /// Every known instrument, first-seen order.
    instrument_order: Vec<String>,
    selected_instruments: BTreeSet<String>,
    hidden_row_ids: BTreeSet<i64>,
    pools: CategoryPools,
    /// `selected_categories` after pool resolution.
    eligible_categories: BTreeSet<String>,
}

impl FilterState {
    pub fn new(pools: CategoryPools) -> Self {
        Self {
            pools,
            ..Default::default()
        }
    }

    /// Initial selection for a freshly loaded dataset.
    pub fn for_dataset(dataset: &QcDataset, pools: CategoryPools, defaults: &FiltersConfig) -> Self {
        let mut state = Self::new(pools);
        state.instrument_order = dataset.instruments().to_vec();

        let category = defaults
            .default_category
            .clone()
            .filter(|c| dataset.category_counts().contains_key(c))
            .or_else(|| dataset.category_counts().keys().next().cloned());
        if let Some(c) = category {
            state.select_category(&c);
        }

        state.selected_instruments = dataset
            .instruments()
            .iter()
            .filter(|i| {
                defaults
                    .default_instrument_prefixes
                    .iter()
                    .any(|p| i.starts_with(p.as_str()))
            })
            .cloned()
            .collect();
        if state.selected_instruments.is_empty() {
            state.selected_instruments = dataset.instruments().iter().cloned().collect();
        }
        state
    }

    /// Single-select: the new category replaces the previous one.
    pub fn select_category(&mut self, category: &str) {
        self.selected_categories = BTreeSet::from([category.to_string()]);
        self.eligible_categories = self.pools.resolve(&self.selected_categories);
    }

    pub fn knows_instrument(&self, instrument: &str) -> bool {
        self.instrument_order.iter().any(|i| i == instrument)
    }

    /// Add or remove one instrument. Returns whether it is now active.
    /// Instruments absent from the dataset are ignored.
    pub fn toggle_instrument(&mut self, instrument: &str) -> bool {
        if !self.knows_instrument(instrument) {
            return false;
        }
        if self.selected_instruments.remove(instrument) {
            false
        } else {
            self.selected_instruments.insert(instrument.to_string());
            true
        }
    }

    pub(crate) fn mark_hidden(&mut self, id: i64) {
        self.hidden_row_ids.insert(id);
    }

    pub fn selected_category(&self) -> Option<&str> {
        self.selected_categories.iter().next().map(String::as_str)
    }

    pub fn selected_categories(&self) -> &BTreeSet<String> {
        &self.selected_categories
    }

    pub fn eligible_categories(&self) -> &BTreeSet<String> {
        &self.eligible_categories
    }

    /// Active instruments in first-seen dataset order.
    pub fn active_instruments(&self) -> Vec<String> {
        self.instrument_order
            .iter()
            .filter(|i| self.selected_instruments.contains(*i))
            .cloned()
            .collect()
    }

    pub fn is_instrument_active(&self, instrument: &str) -> bool {
        self.selected_instruments.contains(instrument)
    }

    pub fn hidden_row_ids(&self) -> &BTreeSet<i64> {
        &self.hidden_row_ids
    }

    pub fn is_row_eligible(&self, row: &Row) -> bool {
        self.admits(&row.category, row.id)
    }

    fn admits(&self, category: &str, id: i64) -> bool {
        self.eligible_categories.contains(category) && !self.hidden_row_ids.contains(&id)
    }

    /// Indices of eligible rows, in dataset order.
    pub fn eligible_rows<D: DatasetProvider + ?Sized>(&self, dataset: &D) -> Result<Vec<usize>, EngineError> {
        let category_col = dataset.column_index(COL_CATEGORY)?;
        let id_col = dataset.column_index(COL_ID)?;
        Ok((0..dataset.row_count())
            .filter(|&r| {
                let category = dataset.value(r, category_col);
                let id = dataset.value(r, id_col);
                match (category.as_str(), id.as_i64()) {
                    (Some(c), Some(id)) => self.admits(c, id),
                    _ => false,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::fixtures::row;

    fn pools() -> CategoryPools {
        CategoryPools::new(BTreeMap::from([
            (
                "all".to_string(),
                PoolRule {
                    expands_to: vec!["yeast".into(), "bsa".into(), "contaminants".into()],
                    suppresses: vec![],
                },
            ),
            (
                "clean".to_string(),
                PoolRule {
                    expands_to: vec!["yeast".into(), "contaminants".into()],
                    suppresses: vec!["contaminants".into()],
                },
            ),
        ]))
    }

    fn dataset() -> QcDataset {
        QcDataset::from_rows(
            vec!["p_1".into()],
            vec![
                row(1, 10, "Orbi", "yeast", &[Some(1.0)]),
                row(2, 20, "QE1", "bsa", &[Some(2.0)]),
                row(3, 30, "Orbi", "contaminants", &[Some(3.0)]),
                row(4, 40, "QE1", "yeast", &[Some(4.0)]),
            ],
        )
    }

    #[test]
    fn selecting_a_category_replaces_the_previous_one() {
        let mut f = FilterState::new(CategoryPools::default());
        f.select_category("yeast");
        f.select_category("bsa");
        assert_eq!(f.selected_categories().len(), 1);
        assert_eq!(f.selected_category(), Some("bsa"));
    }

    #[test]
    fn pools_expand_and_suppress() {
        let mut f = FilterState::new(pools());
        f.select_category("all");
        let ds = dataset();
        assert_eq!(f.eligible_rows(&ds).unwrap(), vec![0, 1, 2, 3]);

        f.select_category("clean");
        assert_eq!(f.eligible_rows(&ds).unwrap(), vec![0, 3]);
        assert!(!f.eligible_categories().contains("contaminants"));
    }

    #[test]
    fn hidden_rows_are_never_eligible() {
        let ds = dataset();
        let mut f = FilterState::new(pools());
        f.select_category("yeast");
        f.mark_hidden(4);
        assert!(f.is_row_eligible(&ds.rows()[0]));
        assert!(!f.is_row_eligible(&ds.rows()[3]));
        assert_eq!(f.eligible_rows(&ds).unwrap(), vec![0]);
    }

    #[test]
    fn eligibility_is_repeatable() {
        let ds = dataset();
        let mut f = FilterState::new(pools());
        f.select_category("all");
        let first: Vec<bool> = ds.rows().iter().map(|r| f.is_row_eligible(r)).collect();
        let second: Vec<bool> = ds.rows().iter().map(|r| f.is_row_eligible(r)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn instrument_toggle_keeps_dataset_order() {
        let ds = dataset();
        let mut f = FilterState::for_dataset(&ds, CategoryPools::default(), &FiltersConfig::default());
        assert_eq!(f.active_instruments(), vec!["Orbi", "QE1"]);
        assert!(!f.toggle_instrument("Orbi"));
        assert_eq!(f.active_instruments(), vec!["QE1"]);
        assert!(f.toggle_instrument("Orbi"));
        assert_eq!(f.active_instruments(), vec!["Orbi", "QE1"]);
    }

    #[test]
    fn unknown_instrument_toggle_changes_nothing() {
        let ds = dataset();
        let mut f = FilterState::for_dataset(&ds, CategoryPools::default(), &FiltersConfig::default());
        assert!(!f.toggle_instrument("Exploris"));
        assert!(!f.knows_instrument("Exploris"));
        assert!(!f.is_instrument_active("Exploris"));
        assert_eq!(f.active_instruments(), vec!["Orbi", "QE1"]);
    }

    #[test]
    fn defaults_pick_prefixed_instruments_and_first_category() {
        let ds = dataset();
        let defaults = FiltersConfig {
            default_instrument_prefixes: vec!["Orb".into()],
            ..Default::default()
        };
        let f = FilterState::for_dataset(&ds, CategoryPools::default(), &defaults);
        assert_eq!(f.active_instruments(), vec!["Orbi"]);
        assert_eq!(f.selected_category(), Some("bsa"));
    }
}
