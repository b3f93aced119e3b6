//! Core abstractions shared by the engine and the drivers.
//!
//! - [`identifier`]: identifier validation and quoting
//! - [`value`]: cell values and their kinds
//! - [`schema`]: table references and column metadata
//! - [`traits`]: connection, transaction, catalog, dataset and source seams
//! - [`dataset`]: the in-memory [`RecordBatch`] dataset

pub mod dataset;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use dataset::RecordBatch;
pub use identifier::{qualify, quote_ident, quote_list, validate_identifier, QuoteStyle};
pub use schema::{find_column, primary_key_of, ColumnProfile, TableRef};
pub use traits::{
    ConnectionProvider, Dataset, DatasetSource, Row, SchemaCatalog, Transaction,
};
pub use value::{SqlNullType, SqlValue};
