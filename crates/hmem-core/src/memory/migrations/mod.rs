//! Active tier database migrations
//!
//! SQL migrations are embedded as strings and executed when the store opens.

use rusqlite::Connection;

use crate::HmemResult;

/// Active tier tables SQL (001)
pub const ACTIVE_TABLES_SQL: &str = include_str!("001_active_tables.sql");

/// Run all active tier migrations
pub fn run_migrations(conn: &Connection) -> HmemResult<()> {
    conn.execute_batch(ACTIVE_TABLES_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'active_memories'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
