use anyhow::Result;
use chrono::{DateTime, Utc};
use markshare_types::VoteType;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::models::{NewPost, Page, PostChanges, PostRow, PublicPostRow};
use crate::{Database, format_timestamp};

/// Post columns joined with the author's profile (11 columns).
const POST_SELECT: &str = "SELECT p.id, p.title, p.content, p.is_public, p.author_id,
        p.upvotes, p.downvotes, p.created_at, p.updated_at, u.name, u.image
    FROM posts p
    JOIN users u ON u.id = p.author_id";

impl Database {
    pub fn create_post(&self, post: &NewPost<'_>, now: DateTime<Utc>) -> Result<PostRow> {
        let id = Uuid::new_v4().to_string();
        let at = format_timestamp(now);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, title, content, is_public, author_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![id, post.title, post.content, post.is_public, post.author_id, at],
            )?;
            query_post(conn, &id)?.ok_or_else(|| anyhow::anyhow!("post {id} vanished after insert"))
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    /// Applies the provided fields and bumps `updated_at`. `None` when the
    /// post does not exist.
    pub fn update_post(
        &self,
        id: &str,
        changes: &PostChanges<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE posts SET
                    title = COALESCE(?1, title),
                    content = COALESCE(?2, content),
                    is_public = COALESCE(?3, is_public),
                    updated_at = ?4
                 WHERE id = ?5",
                params![
                    changes.title,
                    changes.content,
                    changes.is_public,
                    format_timestamp(now),
                    id,
                ],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_post(conn, id)
        })
    }

    /// Deletes the post and, through the foreign key, its votes.
    pub fn delete_post(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM posts WHERE id = ?1", [id])? > 0))
    }

    /// The viewer's own posts plus every public post, newest first.
    /// Anonymous viewers only get public posts.
    pub fn list_visible_posts(
        &self,
        viewer: Option<&str>,
        limit: u32,
        offset: u64,
    ) -> Result<Page<PostRow>> {
        let offset = i64::try_from(offset)?;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{POST_SELECT}
                 WHERE p.is_public = 1 OR p.author_id = ?1
                 ORDER BY p.created_at DESC, p.id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![viewer, limit, offset], post_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE is_public = 1 OR author_id = ?1",
                params![viewer],
                |r| r.get(0),
            )?;

            Ok(Page {
                rows,
                total: u64::try_from(total)?,
            })
        })
    }

    /// Public posts ranked by upvotes, newest first among equals, each with
    /// the viewer's vote.
    pub fn list_public_posts(
        &self,
        viewer: Option<&str>,
        limit: u32,
        offset: u64,
    ) -> Result<Page<PublicPostRow>> {
        let offset = i64::try_from(offset)?;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{POST_SELECT}
                 WHERE p.is_public = 1
                 ORDER BY p.upvotes DESC, p.created_at DESC, p.id DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let posts = stmt
                .query_map(params![limit, offset], post_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut vote_stmt =
                conn.prepare("SELECT vote_type FROM votes WHERE post_id = ?1 AND user_id = ?2")?;
            let mut rows = Vec::with_capacity(posts.len());
            for post in posts {
                let user_vote = match viewer {
                    Some(user_id) => vote_stmt
                        .query_row(params![post.id, user_id], vote_from_row)
                        .optional()?,
                    None => None,
                };
                rows.push(PublicPostRow { post, user_vote });
            }

            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM posts WHERE is_public = 1", [], |r| {
                    r.get(0)
                })?;

            Ok(Page {
                rows,
                total: u64::try_from(total)?,
            })
        })
    }
}

fn query_post(conn: &Connection, id: &str) -> Result<Option<PostRow>> {
    let row = conn
        .query_row(&format!("{POST_SELECT} WHERE p.id = ?1"), [id], post_from_row)
        .optional()?;

    Ok(row)
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        is_public: row.get(3)?,
        author_id: row.get(4)?,
        upvotes: row.get(5)?,
        downvotes: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        author_name: row.get(9)?,
        author_image: row.get(10)?,
    })
}

/// Reads a `vote_type` column (first column of the row).
pub(crate) fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<VoteType> {
    let raw: String = row.get(0)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}
