pub mod migrations;
pub mod models;

mod posts;
mod tokens;
mod users;
mod votes;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use models::*;

/// SQLite handle shared by every request.
///
/// A single connection guarded by a mutex: writes are serialized, which is what
/// keeps vote counters and token redemption consistent.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers from other processes
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Exclusive access, needed to open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::Duration;

    pub const HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA";

    /// Creates a verified user and returns its id.
    pub fn verified_user(db: &Database, email: &str) -> String {
        let now = Utc::now();
        let token = format!("verify-{email}");
        let registration = db
            .register_user(
                &NewUser {
                    email,
                    name: "Tester",
                    password_hash: HASH,
                    image: None,
                },
                &token,
                now + Duration::hours(24),
                now,
            )
            .unwrap();
        let Registration::Created { user_id } = registration else {
            panic!("expected a fresh user, got {registration:?}");
        };
        assert!(matches!(
            db.consume_email_verification(&token, now).unwrap(),
            TokenRedemption::Consumed { .. }
        ));
        user_id
    }

    pub fn post(db: &Database, author_id: &str, title: &str, is_public: bool) -> PostRow {
        db.create_post(
            &NewPost {
                author_id,
                title,
                content: "# hello",
                is_public,
            },
            Utc::now(),
        )
        .unwrap()
    }
}
