//! Database schema migrations.
//!
//! Applies the initial schema: users, medical_profiles, conversations,
//! sessions and the schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use medai_core::error::MedaiError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), MedaiError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| MedaiError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version = schema_version(conn)?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Highest applied migration version (0 for a fresh database).
pub fn schema_version(conn: &Connection) -> Result<i64, MedaiError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| MedaiError::Storage(format!("Failed to query migration version: {}", e)))
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), MedaiError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY NOT NULL,
            username        TEXT NOT NULL UNIQUE,
            email           TEXT UNIQUE,
            password_hash   TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        -- Exactly one profile per user.
        CREATE TABLE IF NOT EXISTS medical_profiles (
            user_id             TEXT PRIMARY KEY NOT NULL,
            age                 INTEGER,
            blood_group         TEXT
                                CHECK (blood_group IN ('A+', 'A-', 'B+', 'B-', 'AB+', 'AB-', 'O+', 'O-')),
            height              REAL,
            weight              REAL,
            allergies           TEXT,
            chronic_conditions  TEXT,
            current_medications TEXT,
            previous_surgeries  TEXT,
            updated_at          INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        -- Append-only conversation log. Timestamps are epoch milliseconds.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            user_message    TEXT NOT NULL,
            ai_response     TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            query_type      TEXT NOT NULL
                            CHECK (query_type IN ('medical', 'non_medical')),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations (user_id, timestamp DESC);

        -- Login sessions, keyed by the SHA-256 of the bearer token.
        CREATE TABLE IF NOT EXISTS sessions (
            token_hash      TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            expires_at      INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions (user_id);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| MedaiError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn insert_user(conn: &Connection, id: &str, username: &str, email: Option<&str>) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, 'hash', 0)",
            rusqlite::params![id, username, email],
        )
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_username_unique() {
        let conn = open_test_conn();
        insert_user(&conn, "u1", "alice", None).unwrap();
        assert!(insert_user(&conn, "u2", "alice", None).is_err());
    }

    #[test]
    fn test_email_unique_only_when_present() {
        let conn = open_test_conn();
        insert_user(&conn, "u1", "alice", None).unwrap();
        insert_user(&conn, "u2", "bob", None).unwrap();
        insert_user(&conn, "u3", "carol", Some("c@example.com")).unwrap();
        assert!(insert_user(&conn, "u4", "dave", Some("c@example.com")).is_err());
    }

    #[test]
    fn test_one_profile_per_user() {
        let conn = open_test_conn();
        insert_user(&conn, "u1", "alice", None).unwrap();
        conn.execute(
            "INSERT INTO medical_profiles (user_id, updated_at) VALUES ('u1', 0)",
            [],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO medical_profiles (user_id, updated_at) VALUES ('u1', 1)",
            [],
        );
        assert!(second.is_err());
    }

    #[test]
    fn test_blood_group_check() {
        let conn = open_test_conn();
        insert_user(&conn, "u1", "alice", None).unwrap();
        let result = conn.execute(
            "INSERT INTO medical_profiles (user_id, blood_group, updated_at) VALUES ('u1', 'Z', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_conversation_requires_user() {
        let conn = open_test_conn();
        let result = conn.execute(
            "INSERT INTO conversations (id, user_id, user_message, ai_response, timestamp, query_type)
             VALUES ('c1', 'ghost', 'hi', 'hello', 0, 'medical')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_conversation_query_type_check() {
        let conn = open_test_conn();
        insert_user(&conn, "u1", "alice", None).unwrap();
        let result = conn.execute(
            "INSERT INTO conversations (id, user_id, user_message, ai_response, timestamp, query_type)
             VALUES ('c1', 'u1', 'hi', 'hello', 0, 'chit_chat')",
            [],
        );
        assert!(result.is_err());
    }
}
