//! Persisted output files.
//!
//! A crawl writes two delimited files next to each other:
//!
//! ```text
//! data/
//! ├── stock_history_all.csv          # final result, written once at the end
//! └── stock_history_all.partial.csv  # recovery snapshot, rewritten at checkpoints
//! ```
//!
//! Both share the format produced by [`csv::write_table`].

pub mod csv;
