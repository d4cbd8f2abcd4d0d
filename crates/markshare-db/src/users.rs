use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use uuid::Uuid;

use crate::models::{NewUser, Registration, UserRow};
use crate::{Database, format_timestamp};

const USER_COLUMNS: &str = "id, email, name, password, image, email_verified, created_at";

impl Database {
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_email(conn, email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    [id],
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Creates a credentials account together with its verification token.
    ///
    /// An unverified account with the same email is taken over: its name,
    /// password and avatar are replaced and its pending token is swapped for
    /// `token`.
    pub fn register_user(
        &self,
        user: &NewUser<'_>,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Registration> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let (user_id, created) = match query_user_by_email(&tx, user.email)? {
                Some(existing) if existing.is_verified() => {
                    return Ok(Registration::AlreadyVerified);
                }
                Some(existing) => {
                    tx.execute(
                        "UPDATE users SET name = ?1, password = ?2, image = ?3 WHERE id = ?4",
                        params![user.name, user.password_hash, user.image, existing.id],
                    )?;
                    tx.execute(
                        "DELETE FROM email_verifications WHERE user_id = ?1",
                        [&existing.id],
                    )?;
                    (existing.id, false)
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO users (id, email, name, password, image, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            id,
                            user.email,
                            user.name,
                            user.password_hash,
                            user.image,
                            format_timestamp(now),
                        ],
                    )?;
                    (id, true)
                }
            };

            tx.execute(
                "INSERT INTO email_verifications (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token, user_id, format_timestamp(expires_at)],
            )?;
            tx.commit()?;

            Ok(if created {
                Registration::Created { user_id }
            } else {
                Registration::Refreshed { user_id }
            })
        })
    }
}

fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            [email],
            user_from_row,
        )
        .optional()?;

    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password: row.get(3)?,
        image: row.get(4)?,
        email_verified: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenRedemption;
    use crate::testing::HASH;
    use chrono::Duration;

    fn new_user<'a>(email: &'a str, hash: &'a str) -> NewUser<'a> {
        NewUser {
            email,
            name: "Ada",
            password_hash: hash,
            image: Some("https://avatars.example/ada.svg"),
        }
    }

    #[test]
    fn register_creates_unverified_user() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let outcome = db
            .register_user(&new_user("ada@example.com", HASH), "tok", now + Duration::hours(24), now)
            .unwrap();
        let Registration::Created { user_id } = outcome else {
            panic!("unexpected {outcome:?}");
        };

        let user = db.get_user_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.password.as_deref(), Some(HASH));
        assert!(!user.is_verified());
        assert_eq!(db.get_user_by_id(&user_id).unwrap().unwrap().email, "ada@example.com");
    }

    #[test]
    fn register_refreshes_pending_account() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let expiry = now + Duration::hours(24);

        db.register_user(&new_user("ada@example.com", HASH), "first", expiry, now)
            .unwrap();
        let outcome = db
            .register_user(&new_user("ada@example.com", "other-hash"), "second", expiry, now)
            .unwrap();
        assert!(matches!(outcome, Registration::Refreshed { .. }));

        // the old token is gone, the new one works
        assert_eq!(
            db.consume_email_verification("first", now).unwrap(),
            TokenRedemption::NotFound
        );
        assert!(matches!(
            db.consume_email_verification("second", now).unwrap(),
            TokenRedemption::Consumed { .. }
        ));
        let user = db.get_user_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(user.password.as_deref(), Some("other-hash"));
    }

    #[test]
    fn register_rejects_verified_email() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        crate::testing::verified_user(&db, "ada@example.com");

        let outcome = db
            .register_user(&new_user("ada@example.com", "x"), "again", now + Duration::hours(1), now)
            .unwrap();
        assert_eq!(outcome, Registration::AlreadyVerified);
        assert_eq!(
            db.get_user_by_email("ada@example.com").unwrap().unwrap().password.as_deref(),
            Some(HASH)
        );
    }
}
