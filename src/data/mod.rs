//! Data layer: core types, loading, filtering and export.
//!
//! Architecture:
//! ```text
//!  .parquet / .json / .csv
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  parse file → QcDataset
//!   └──────────┘
//!        │
//!        ▼
//!   ┌───────────┐
//!   │ QcDataset  │  Vec<Row>, facet counts, id index
//!   └───────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  filter   │  category pools + instruments + hidden ids → eligible rows
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  export   │  eligible rows → CSV
//!   └──────────┘
//! ```

pub mod export;
pub mod filter;
pub mod loader;
pub mod model;
