//! Database row types and operation outcomes.
//!
//! Rows keep SQLite's text representation; conversion to wire types happens in
//! the API layer.

use markshare_types::VoteType;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Absent for accounts created through an external identity provider.
    pub password: Option<String>,
    pub image: Option<String>,
    pub email_verified: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn is_verified(&self) -> bool {
        self.email_verified.is_some()
    }
}

/// A post joined with its author's public profile.
#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub is_public: bool,
    pub author_id: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub created_at: String,
    pub updated_at: String,
    pub author_name: String,
    pub author_image: Option<String>,
}

impl PostRow {
    /// Public posts are readable by anyone, private ones by their author only.
    pub fn is_visible_to(&self, viewer: Option<&str>) -> bool {
        self.is_public || viewer == Some(self.author_id.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PublicPostRow {
    pub post: PostRow,
    pub user_vote: Option<VoteType>,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub image: Option<&'a str>,
}

pub struct NewPost<'a> {
    pub author_id: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub is_public: bool,
}

#[derive(Debug, Default)]
pub struct PostChanges<'a> {
    pub title: Option<&'a str>,
    pub content: Option<&'a str>,
    pub is_public: Option<bool>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Registration {
    Created { user_id: String },
    /// An unverified account with that email got a new password and token.
    Refreshed { user_id: String },
    AlreadyVerified,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TokenRedemption {
    Consumed { user_id: String },
    NotFound,
    /// The token was past its expiry and has been deleted.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub upvotes: i64,
    pub downvotes: i64,
    pub user_vote: Option<VoteType>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    Applied(VoteTally),
    PostNotFound,
    PostPrivate,
}

/// One page of rows and the total number of matching rows.
#[derive(Debug)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u64,
}
