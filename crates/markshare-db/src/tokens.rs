use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params};

use crate::models::TokenRedemption;
use crate::{Database, format_timestamp, parse_timestamp};

/// Tables holding one-shot tokens. Both share `(token, user_id, expires_at)`.
#[derive(Clone, Copy)]
enum TokenTable {
    EmailVerification,
    PasswordReset,
}

impl TokenTable {
    fn name(self) -> &'static str {
        match self {
            TokenTable::EmailVerification => "email_verifications",
            TokenTable::PasswordReset => "password_resets",
        }
    }
}

impl Database {
    /// Marks the owner's email as verified and deletes the token.
    pub fn consume_email_verification(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenRedemption> {
        self.redeem(TokenTable::EmailVerification, token, now, |tx, user_id| {
            tx.execute(
                "UPDATE users SET email_verified = ?1 WHERE id = ?2",
                params![format_timestamp(now), user_id],
            )?;
            Ok(())
        })
    }

    pub fn create_password_reset(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_resets (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token, user_id, format_timestamp(expires_at)],
            )?;
            Ok(())
        })
    }

    /// Replaces the owner's password hash. Every outstanding reset token of
    /// that user is dropped along with the presented one.
    pub fn consume_password_reset(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenRedemption> {
        self.redeem(TokenTable::PasswordReset, token, now, |tx, user_id| {
            tx.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                params![password_hash, user_id],
            )?;
            tx.execute("DELETE FROM password_resets WHERE user_id = ?1", [user_id])?;
            Ok(())
        })
    }

    /// Lookup, expiry check, effect and deletion in one immediate transaction,
    /// so a token can be redeemed at most once.
    fn redeem<F>(
        &self,
        table: TokenTable,
        token: &str,
        now: DateTime<Utc>,
        effect: F,
    ) -> Result<TokenRedemption>
    where
        F: FnOnce(&Transaction<'_>, &str) -> Result<()>,
    {
        let table = table.name();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let found: Option<(String, String)> = tx
                .query_row(
                    &format!("SELECT user_id, expires_at FROM {table} WHERE token = ?1"),
                    [token],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((user_id, expires_at)) = found else {
                return Ok(TokenRedemption::NotFound);
            };

            tx.execute(&format!("DELETE FROM {table} WHERE token = ?1"), [token])?;

            if parse_timestamp(&expires_at)? < now {
                tx.commit()?;
                tracing::debug!(table, "expired token discarded");
                return Ok(TokenRedemption::Expired);
            }

            effect(&tx, &user_id)?;
            tx.commit()?;

            Ok(TokenRedemption::Consumed { user_id })
        })
    }
}
