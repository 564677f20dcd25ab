//! Card record persistence.
//!
//! Single-table layout keyed on `(USER#{owner_id}, CARD#{card_id})` with a
//! secondary index on `card_id`. The gateway is the only writer of card
//! records; every mutation is conditional on the owner.

mod gateway;
mod record;
mod schema;

pub use gateway::{RecordPage, SqliteCardStore};
pub use record::{CardRecord, RecordError};
pub use schema::{initialize_schema, is_initialized, partition_key, sort_key};
