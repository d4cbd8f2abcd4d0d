use anyhow::Result;
use markshare_types::VoteType;
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use crate::Database;
use crate::models::{VoteOutcome, VoteTally};
use crate::posts::vote_from_row;

impl Database {
    /// Toggle or switch a user's vote on a public post.
    ///
    /// - no previous vote: insert it and bump the matching counter
    /// - same type again: remove it and decrement that counter
    /// - other type: switch it and move one count across
    ///
    /// The vote row and the post counters change in one immediate transaction.
    pub fn cast_vote(&self, post_id: &str, user_id: &str, vote: VoteType) -> Result<VoteOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let is_public: Option<bool> = tx
                .query_row("SELECT is_public FROM posts WHERE id = ?1", [post_id], |row| {
                    row.get(0)
                })
                .optional()?;
            match is_public {
                None => return Ok(VoteOutcome::PostNotFound),
                Some(false) => return Ok(VoteOutcome::PostPrivate),
                Some(true) => {}
            }

            let existing = tx
                .query_row(
                    "SELECT vote_type FROM votes WHERE post_id = ?1 AND user_id = ?2",
                    params![post_id, user_id],
                    vote_from_row,
                )
                .optional()?;

            let (up, down, user_vote) = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO votes (post_id, user_id, vote_type) VALUES (?1, ?2, ?3)",
                        params![post_id, user_id, vote.as_str()],
                    )?;
                    let (up, down) = vote.deltas();
                    (up, down, Some(vote))
                }
                Some(previous) if previous == vote => {
                    tx.execute(
                        "DELETE FROM votes WHERE post_id = ?1 AND user_id = ?2",
                        params![post_id, user_id],
                    )?;
                    let (up, down) = vote.deltas();
                    (-up, -down, None)
                }
                Some(previous) => {
                    tx.execute(
                        "UPDATE votes SET vote_type = ?1 WHERE post_id = ?2 AND user_id = ?3",
                        params![vote.as_str(), post_id, user_id],
                    )?;
                    let (new_up, new_down) = vote.deltas();
                    let (old_up, old_down) = previous.deltas();
                    (new_up - old_up, new_down - old_down, Some(vote))
                }
            };

            let (upvotes, downvotes) = tx.query_row(
                "UPDATE posts SET upvotes = upvotes + ?1, downvotes = downvotes + ?2
                 WHERE id = ?3
                 RETURNING upvotes, downvotes",
                params![up, down, post_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            tx.commit()?;

            Ok(VoteOutcome::Applied(VoteTally {
                upvotes,
                downvotes,
                user_vote,
            }))
        })
    }
}
