//! SQLite schema for the card store.

use rusqlite::Connection;

/// Schema DDL. Single table keyed on `(pk, sk)` with a secondary index on
/// `card_id` for direct lookup without the partition key.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cards (
    pk           TEXT NOT NULL,
    sk           TEXT NOT NULL,
    owner_id     TEXT NOT NULL,
    card_id      TEXT NOT NULL,
    front_key    TEXT NOT NULL,
    back_key     TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    deleted_at   TEXT,
    ocr_metadata TEXT,
    pricing      TEXT,
    authenticity TEXT,
    last_error   TEXT,
    PRIMARY KEY (pk, sk)
);

CREATE INDEX IF NOT EXISTS idx_cards_card_id ON cards (card_id);
CREATE INDEX IF NOT EXISTS idx_cards_owner_created ON cards (owner_id, created_at DESC);
"#;

/// Partition key for an owner.
pub fn partition_key(owner_id: &str) -> String {
    format!("USER#{}", owner_id)
}

/// Sort key for a card.
pub fn sort_key(card_id: &str) -> String {
    format!("CARD#{}", card_id)
}

/// Create tables and indexes if missing.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// Whether the schema has been applied.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='cards'",
        [],
        |_| Ok(()),
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(partition_key("owner-1"), "USER#owner-1");
        assert_eq!(sort_key("card-1"), "CARD#card-1");
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!is_initialized(&conn));
        initialize_schema(&conn).unwrap();
        assert!(is_initialized(&conn));
        initialize_schema(&conn).unwrap();
    }
}
