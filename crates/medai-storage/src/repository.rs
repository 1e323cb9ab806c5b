//! Repository implementations for SQLite-backed persistence.
//!
//! Provides UserRepository, ProfileRepository (the Profile Store),
//! ConversationRepository (the Conversation Log) and SessionRepository,
//! all operating on a shared Database handle.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use medai_core::error::MedaiError;
use medai_core::types::{
    BloodGroup, ConversationTurn, Identity, MedicalProfile, ProfileUpdate, QueryType, UserAccount,
};

use crate::db::Database;

fn storage_err(e: rusqlite::Error) -> MedaiError {
    MedaiError::Storage(e.to_string())
}

// =============================================================================
// Users
// =============================================================================

/// Repository for user accounts.
#[derive(Clone)]
pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a user together with its empty medical profile.
    ///
    /// Both rows are written in one transaction. Username conflicts are
    /// reported before email conflicts.
    pub fn register(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<UserAccount, MedaiError> {
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        let user = UserAccount {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.map(str::to_string),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };

        self.db.with_tx(|tx| {
            let taken: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
                    rusqlite::params![user.username],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            if taken {
                return Err(MedaiError::DuplicateUsername);
            }

            if let Some(ref email) = user.email {
                let taken: bool = tx
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                        rusqlite::params![email],
                        |row| row.get(0),
                    )
                    .map_err(storage_err)?;
                if taken {
                    return Err(MedaiError::DuplicateEmail);
                }
            }

            tx.execute(
                "INSERT INTO users (id, username, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    user.id.to_string(),
                    user.username,
                    user.email,
                    user.password_hash,
                    user.created_at.timestamp_millis(),
                ],
            )
            .map_err(map_user_conflict)?;

            tx.execute(
                "INSERT INTO medical_profiles (user_id, updated_at) VALUES (?1, ?2)",
                rusqlite::params![user.id.to_string(), user.created_at.timestamp_millis()],
            )
            .map_err(|e| MedaiError::Storage(format!("Failed to create profile: {}", e)))?;

            Ok(())
        })?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Find a user by username.
    pub fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>, MedaiError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, email, password_hash, created_at
                 FROM users WHERE username = ?1",
                rusqlite::params![username],
                |row| Ok(row_to_user(row)),
            )
            .optional()
            .map_err(storage_err)?
            .transpose()
        })
    }
}

/// Translate a UNIQUE violation on insert into the matching domain error.
fn map_user_conflict(e: rusqlite::Error) -> MedaiError {
    let msg = e.to_string();
    if msg.contains("users.username") {
        MedaiError::DuplicateUsername
    } else if msg.contains("users.email") {
        MedaiError::DuplicateEmail
    } else {
        MedaiError::Storage(format!("Failed to create user: {}", msg))
    }
}

// =============================================================================
// Medical profiles
// =============================================================================

/// Repository for per-user medical profiles.
#[derive(Clone)]
pub struct ProfileRepository {
    db: Arc<Database>,
}

const PROFILE_COLUMNS: &str = "user_id, age, blood_group, height, weight, allergies,
     chronic_conditions, current_medications, previous_surgeries, updated_at";

impl ProfileRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load the profile for a user, if one exists.
    pub fn find(&self, user_id: Uuid) -> Result<Option<MedicalProfile>, MedaiError> {
        self.db.with_conn(|conn| select_profile(conn, user_id))
    }

    /// Load the profile for a user, creating an empty one if it is missing.
    pub fn find_or_create(&self, user_id: Uuid) -> Result<MedicalProfile, MedaiError> {
        self.db.with_conn(|conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO medical_profiles (user_id, updated_at) VALUES (?1, ?2)",
                    rusqlite::params![user_id.to_string(), Utc::now().timestamp_millis()],
                )
                .map_err(|e| MedaiError::Storage(format!("Failed to create profile: {}", e)))?;
            if inserted > 0 {
                tracing::warn!(user_id = %user_id, "Profile was missing; created empty profile");
            }
            select_profile(conn, user_id)?
                .ok_or_else(|| MedaiError::NotFound(format!("profile for user {}", user_id)))
        })
    }

    /// Replace a user's profile attributes, creating the row if needed.
    ///
    /// `updated_at` is refreshed on every call.
    pub fn upsert(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<MedicalProfile, MedaiError> {
        let now = Utc::now();
        let mut profile = MedicalProfile::empty(user_id, now);
        profile.apply(update, now);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO medical_profiles (user_id, age, blood_group, height, weight, allergies,
                     chronic_conditions, current_medications, previous_surgeries, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(user_id) DO UPDATE SET
                     age = excluded.age,
                     blood_group = excluded.blood_group,
                     height = excluded.height,
                     weight = excluded.weight,
                     allergies = excluded.allergies,
                     chronic_conditions = excluded.chronic_conditions,
                     current_medications = excluded.current_medications,
                     previous_surgeries = excluded.previous_surgeries,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    user_id.to_string(),
                    profile.age,
                    profile.blood_group.map(|g| g.as_str()),
                    profile.height,
                    profile.weight,
                    profile.allergies,
                    profile.chronic_conditions,
                    profile.current_medications,
                    profile.previous_surgeries,
                    now.timestamp_millis(),
                ],
            )
            .map_err(|e| MedaiError::Storage(format!("Failed to update profile: {}", e)))?;
            Ok(())
        })?;

        tracing::info!(user_id = %user_id, "Medical profile updated");
        Ok(profile)
    }
}

fn select_profile(
    conn: &rusqlite::Connection,
    user_id: Uuid,
) -> Result<Option<MedicalProfile>, MedaiError> {
    let sql = format!(
        "SELECT {} FROM medical_profiles WHERE user_id = ?1",
        PROFILE_COLUMNS
    );
    conn.query_row(&sql, rusqlite::params![user_id.to_string()], |row| {
        Ok(row_to_profile(row))
    })
    .optional()
    .map_err(storage_err)?
    .transpose()
}

// =============================================================================
// Conversation log
// =============================================================================

/// Append-only repository for conversation turns.
#[derive(Clone)]
pub struct ConversationRepository {
    db: Arc<Database>,
}

impl ConversationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one turn.
    pub fn append(&self, turn: &ConversationTurn) -> Result<(), MedaiError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, user_message, ai_response, timestamp, query_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    turn.id.to_string(),
                    turn.user_id.to_string(),
                    turn.user_message,
                    turn.ai_response,
                    turn.timestamp.timestamp_millis(),
                    turn.query_type.as_str(),
                ],
            )
            .map_err(|e| MedaiError::Storage(format!("Failed to save conversation: {}", e)))?;
            Ok(())
        })
    }

    /// The most recent turns for a user, newest first.
    pub fn recent(&self, user_id: Uuid, limit: u32) -> Result<Vec<ConversationTurn>, MedaiError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, user_message, ai_response, timestamp, query_type
                     FROM conversations
                     WHERE user_id = ?1
                     ORDER BY timestamp DESC, rowid DESC
                     LIMIT ?2",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(rusqlite::params![user_id.to_string(), limit], |row| {
                    Ok(row_to_turn(row))
                })
                .map_err(storage_err)?;

            let mut turns = Vec::new();
            for row in rows {
                turns.push(row.map_err(storage_err)??);
            }
            Ok(turns)
        })
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Repository for login sessions. Stores token hashes only.
#[derive(Clone)]
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a new session.
    pub fn create(
        &self,
        token_hash: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), MedaiError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    token_hash,
                    user_id.to_string(),
                    Utc::now().timestamp_millis(),
                    expires_at.timestamp_millis(),
                ],
            )
            .map_err(|e| MedaiError::Storage(format!("Failed to create session: {}", e)))?;
            Ok(())
        })
    }

    /// Resolve a live session to the identity that owns it.
    pub fn resolve(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, MedaiError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT u.id, u.username
                     FROM sessions s JOIN users u ON u.id = s.user_id
                     WHERE s.token_hash = ?1 AND s.expires_at > ?2",
                    rusqlite::params![token_hash, now.timestamp_millis()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(storage_err)?;

            match row {
                Some((id, username)) => Ok(Some(Identity {
                    user_id: parse_uuid(&id)?,
                    username,
                })),
                None => Ok(None),
            }
        })
    }

    /// Revoke a session. Returns whether a session was removed.
    pub fn revoke(&self, token_hash: &str) -> Result<bool, MedaiError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM sessions WHERE token_hash = ?1",
                    rusqlite::params![token_hash],
                )
                .map_err(storage_err)?;
            Ok(removed > 0)
        })
    }

    /// Delete every session that expired before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, MedaiError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM sessions WHERE expires_at <= ?1",
                    rusqlite::params![now.timestamp_millis()],
                )
                .map_err(storage_err)?;
            Ok(removed as u64)
        })
    }
}

// ============================================================================
// Helper functions for row-to-entity conversion.
// ============================================================================

fn parse_uuid(s: &str) -> Result<Uuid, MedaiError> {
    Uuid::parse_str(s).map_err(|e| MedaiError::Storage(format!("Invalid UUID '{}': {}", s, e)))
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, MedaiError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| MedaiError::Storage(format!("Invalid timestamp: {}", ms)))
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserAccount, MedaiError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let created_at: i64 = row.get(4).map_err(storage_err)?;
    Ok(UserAccount {
        id: parse_uuid(&id)?,
        username: row.get(1).map_err(storage_err)?,
        email: row.get(2).map_err(storage_err)?,
        password_hash: row.get(3).map_err(storage_err)?,
        created_at: millis_to_datetime(created_at)?,
    })
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> Result<MedicalProfile, MedaiError> {
    let user_id: String = row.get(0).map_err(storage_err)?;
    let blood_group: Option<String> = row.get(2).map_err(storage_err)?;
    let updated_at: i64 = row.get(9).map_err(storage_err)?;
    Ok(MedicalProfile {
        user_id: parse_uuid(&user_id)?,
        age: row.get(1).map_err(storage_err)?,
        blood_group: blood_group
            .as_deref()
            .map(str::parse::<BloodGroup>)
            .transpose()?,
        height: row.get(3).map_err(storage_err)?,
        weight: row.get(4).map_err(storage_err)?,
        allergies: row.get(5).map_err(storage_err)?,
        chronic_conditions: row.get(6).map_err(storage_err)?,
        current_medications: row.get(7).map_err(storage_err)?,
        previous_surgeries: row.get(8).map_err(storage_err)?,
        updated_at: millis_to_datetime(updated_at)?,
    })
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> Result<ConversationTurn, MedaiError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let user_id: String = row.get(1).map_err(storage_err)?;
    let timestamp: i64 = row.get(4).map_err(storage_err)?;
    let query_type: String = row.get(5).map_err(storage_err)?;
    Ok(ConversationTurn {
        id: parse_uuid(&id)?,
        user_id: parse_uuid(&user_id)?,
        user_message: row.get(2).map_err(storage_err)?,
        ai_response: row.get(3).map_err(storage_err)?,
        timestamp: millis_to_datetime(timestamp)?,
        query_type: query_type.parse::<QueryType>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn register(db: &Arc<Database>, username: &str) -> UserAccount {
        UserRepository::new(Arc::clone(db))
            .register(username, None, "pbkdf2-sha256$1$00$00")
            .unwrap()
    }

    fn count_rows(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .map_err(storage_err)
        })
        .unwrap()
    }

    // ---- Users ----

    #[test]
    fn test_register_creates_user_and_empty_profile() {
        let db = setup();
        let user = register(&db, "alice");

        let users = UserRepository::new(Arc::clone(&db));
        let found = users.find_by_username("alice").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(found.email.is_none());

        let profile = ProfileRepository::new(db).find(user.id).unwrap().unwrap();
        assert_eq!(profile.user_id, user.id);
        assert!(profile.age.is_none());
        assert!(profile.blood_group.is_none());
        assert!(profile.allergies.is_none());
    }

    #[test]
    fn test_register_duplicate_username() {
        let db = setup();
        let users = UserRepository::new(Arc::clone(&db));
        users.register("alice", None, "h").unwrap();
        let err = users.register("alice", Some("other@example.com"), "h").unwrap_err();
        assert!(matches!(err, MedaiError::DuplicateUsername));
        assert_eq!(count_rows(&db, "users"), 1);
    }

    #[test]
    fn test_register_duplicate_email() {
        let db = setup();
        let users = UserRepository::new(Arc::clone(&db));
        users.register("alice", Some("a@example.com"), "h").unwrap();
        let err = users.register("bob", Some("a@example.com"), "h").unwrap_err();
        assert!(matches!(err, MedaiError::DuplicateEmail));
    }

    #[test]
    fn test_register_blank_email_is_absent() {
        let db = setup();
        let users = UserRepository::new(Arc::clone(&db));
        let a = users.register("alice", Some("  "), "h").unwrap();
        let b = users.register("bob", Some(""), "h").unwrap();
        assert!(a.email.is_none());
        assert!(b.email.is_none());
        assert_eq!(count_rows(&db, "users"), 2);
    }

    #[test]
    fn test_find_by_username_missing() {
        let db = setup();
        let users = UserRepository::new(db);
        assert!(users.find_by_username("nobody").unwrap().is_none());
    }

    // ---- Profiles ----

    #[test]
    fn test_profile_upsert_round_trip() {
        let db = setup();
        let user = register(&db, "alice");
        let profiles = ProfileRepository::new(db);

        let update = ProfileUpdate {
            age: Some(34),
            blood_group: Some(BloodGroup::OPositive),
            height: Some(172.5),
            weight: Some(68.0),
            allergies: Some("penicillin".to_string()),
            chronic_conditions: None,
            current_medications: Some("metformin".to_string()),
            previous_surgeries: None,
        };
        let written = profiles.upsert(user.id, &update).unwrap();
        let read = profiles.find(user.id).unwrap().unwrap();

        assert_eq!(read.age, Some(34));
        assert_eq!(read.blood_group, Some(BloodGroup::OPositive));
        assert_eq!(read.height, Some(172.5));
        assert_eq!(read.weight, Some(68.0));
        assert_eq!(read.allergies.as_deref(), Some("penicillin"));
        assert!(read.chronic_conditions.is_none());
        assert_eq!(read.current_medications.as_deref(), Some("metformin"));
        assert_eq!(
            read.updated_at.timestamp_millis(),
            written.updated_at.timestamp_millis()
        );
    }

    #[test]
    fn test_profile_upsert_is_idempotent_and_refreshes_timestamp() {
        let db = setup();
        let user = register(&db, "alice");
        let profiles = ProfileRepository::new(db);
        let before = profiles.find(user.id).unwrap().unwrap().updated_at;

        let update = ProfileUpdate {
            age: Some(50),
            ..ProfileUpdate::default()
        };
        std::thread::sleep(std::time::Duration::from_millis(5));
        profiles.upsert(user.id, &update).unwrap();
        let first = profiles.find(user.id).unwrap().unwrap();
        profiles.upsert(user.id, &update).unwrap();
        let second = profiles.find(user.id).unwrap().unwrap();

        assert!(first.updated_at > before);
        assert_eq!(first.age, second.age);
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn test_profile_upsert_clears_omitted_fields() {
        let db = setup();
        let user = register(&db, "alice");
        let profiles = ProfileRepository::new(db);

        profiles
            .upsert(
                user.id,
                &ProfileUpdate {
                    allergies: Some("latex".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();
        profiles.upsert(user.id, &ProfileUpdate::default()).unwrap();

        assert!(profiles.find(user.id).unwrap().unwrap().allergies.is_none());
    }

    #[test]
    fn test_find_or_create_restores_missing_profile() {
        let db = setup();
        let user = register(&db, "alice");
        db.with_conn(|conn| {
            conn.execute("DELETE FROM medical_profiles", [])
                .map_err(storage_err)?;
            Ok(())
        })
        .unwrap();

        let profiles = ProfileRepository::new(db);
        assert!(profiles.find(user.id).unwrap().is_none());
        let created = profiles.find_or_create(user.id).unwrap();
        assert_eq!(created.user_id, user.id);
        assert!(created.age.is_none());
    }

    // ---- Conversations ----

    #[test]
    fn test_conversation_recent_newest_first_and_capped() {
        let db = setup();
        let user = register(&db, "alice");
        let log = ConversationRepository::new(Arc::clone(&db));

        for i in 0..25 {
            log.append(&ConversationTurn::new(
                user.id,
                format!("question {}", i),
                format!("answer {}", i),
                QueryType::Medical,
            ))
            .unwrap();
        }

        assert_eq!(count_rows(&db, "conversations"), 25);
        let recent = log.recent(user.id, 20).unwrap();
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].user_message, "question 24");
        assert_eq!(recent[19].user_message, "question 5");
    }

    #[test]
    fn test_conversation_isolated_per_user() {
        let db = setup();
        let alice = register(&db, "alice");
        let bob = register(&db, "bob");
        let log = ConversationRepository::new(db);

        log.append(&ConversationTurn::new(
            alice.id,
            "what is the weather",
            "refused",
            QueryType::NonMedical,
        ))
        .unwrap();

        assert!(log.recent(bob.id, 20).unwrap().is_empty());
        let turns = log.recent(alice.id, 20).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].query_type, QueryType::NonMedical);
        assert_eq!(turns[0].ai_response, "refused");
    }

    // ---- Sessions ----

    #[test]
    fn test_session_resolve_and_revoke() {
        let db = setup();
        let user = register(&db, "alice");
        let sessions = SessionRepository::new(db);
        let now = Utc::now();

        sessions
            .create("hash-1", user.id, now + chrono::Duration::hours(1))
            .unwrap();
        let identity = sessions.resolve("hash-1", now).unwrap().unwrap();
        assert_eq!(identity.user_id, user.id);
        assert_eq!(identity.username, "alice");

        assert!(sessions.revoke("hash-1").unwrap());
        assert!(!sessions.revoke("hash-1").unwrap());
        assert!(sessions.resolve("hash-1", now).unwrap().is_none());
    }

    #[test]
    fn test_session_expired_is_not_resolved() {
        let db = setup();
        let user = register(&db, "alice");
        let sessions = SessionRepository::new(db);
        let now = Utc::now();

        sessions
            .create("old", user.id, now - chrono::Duration::minutes(1))
            .unwrap();
        sessions
            .create("fresh", user.id, now + chrono::Duration::minutes(1))
            .unwrap();

        assert!(sessions.resolve("old", now).unwrap().is_none());
        assert_eq!(sessions.purge_expired(now).unwrap(), 1);
        assert!(sessions.resolve("fresh", now).unwrap().is_some());
    }
}
