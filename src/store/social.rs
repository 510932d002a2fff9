use rusqlite::{params, OptionalExtension, Row, Transaction};
use tracing::warn;

use super::{from_json_list, now_millis, to_json_list, SqliteStore};
use crate::app::Result;
use crate::domain::{Comment, CommentResponse, Reply, UserProfile};

const COMMENT_COLUMNS: &str = "id, story_id, user_id, text, date, liking_users, source_user_id,
     by_friend, is_pseudo, is_placeholder";

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        story_id: row.get(1)?,
        user_id: row.get(2)?,
        text: row.get(3)?,
        date: row.get(4)?,
        liking_users: from_json_list(&row.get::<_, String>(5)?),
        source_user_id: row.get(6)?,
        by_friend: row.get(7)?,
        is_pseudo: row.get(8)?,
        is_placeholder: row.get(9)?,
        replies: Vec::new(),
    })
}

fn insert_reply_tx(tx: &Transaction<'_>, reply: &Reply) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO replies (id, comment_id, user_id, text, date, is_placeholder)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            reply.id,
            reply.comment_id,
            reply.user_id,
            reply.text,
            reply.date,
            reply.is_placeholder
        ],
    )?;
    Ok(())
}

/// Store a server comment with its replies.
///
/// The server copy supersedes any local placeholder by the same author on
/// the same story, and the comment's reply list is replaced wholesale.
pub(crate) fn insert_comment_tx(tx: &Transaction<'_>, comment: &Comment) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM comments WHERE story_id = ?1 AND user_id = ?2 AND is_placeholder = 1",
        params![comment.story_id, comment.user_id],
    )?;
    tx.execute(
        "DELETE FROM replies WHERE comment_id = ?1",
        params![comment.id],
    )?;
    tx.execute(
        "INSERT OR REPLACE INTO comments (id, story_id, user_id, text, date, liking_users,
             source_user_id, by_friend, is_pseudo, is_placeholder)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            comment.id,
            comment.story_id,
            comment.user_id,
            comment.text,
            comment.date,
            to_json_list(&comment.liking_users),
            comment.source_user_id,
            comment.by_friend,
            comment.is_pseudo,
            comment.is_placeholder
        ],
    )?;
    for reply in &comment.replies {
        let mut reply = reply.clone();
        reply.comment_id = comment.id.clone();
        insert_reply_tx(tx, &reply)?;
    }
    Ok(())
}

const REPLIES_FOR_COMMENT: &str = "SELECT id, comment_id, user_id, text, date, is_placeholder
     FROM replies WHERE comment_id = ?1 ORDER BY date";

fn reply_from_row(row: &Row<'_>) -> rusqlite::Result<Reply> {
    Ok(Reply {
        id: row.get(0)?,
        comment_id: row.get(1)?,
        user_id: row.get(2)?,
        text: row.get(3)?,
        date: row.get(4)?,
        is_placeholder: row.get(5)?,
    })
}

impl SqliteStore {
    pub fn comments_for_story(&self, story_id: &str) -> Result<Vec<Comment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM comments WHERE story_id = ?1 ORDER BY date",
            COMMENT_COLUMNS
        ))?;
        let mut comments = stmt
            .query_map(params![story_id], comment_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut replies = conn.prepare(REPLIES_FOR_COMMENT)?;
        for comment in &mut comments {
            comment.replies = replies
                .query_map(params![comment.id], reply_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
        }
        Ok(comments)
    }

    pub fn replies(&self, comment_id: &str) -> Result<Vec<Reply>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(REPLIES_FOR_COMMENT)?;
        let replies = stmt
            .query_map(params![comment_id], reply_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(replies)
    }

    pub fn comment(&self, story_id: &str, user_id: &str) -> Result<Option<Comment>> {
        let conn = self.conn()?;
        let comment = conn
            .query_row(
                &format!(
                    "SELECT {} FROM comments WHERE story_id = ?1 AND user_id = ?2",
                    COMMENT_COLUMNS
                ),
                params![story_id, user_id],
                comment_from_row,
            )
            .optional()?;
        Ok(comment)
    }

    /// Replace a comment with the copy the server returned.
    pub fn update_comment(&self, response: &CommentResponse) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for user in &response.users {
            tx.execute(
                "INSERT OR REPLACE INTO users (user_id, username, photo_url, location)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user.user_id, user.username, user.photo_url, user.location],
            )?;
        }
        insert_comment_tx(&tx, &response.comment)?;
        tx.commit()?;
        Ok(())
    }

    /// Show the user's own share right away, unless they already commented.
    pub fn insert_comment_placeholder(
        &self,
        story_id: &str,
        user_id: &str,
        text: Option<&str>,
    ) -> Result<()> {
        if self.comment(story_id, user_id)?.is_some() {
            return Ok(());
        }
        let placeholder = Comment::placeholder(story_id, user_id, text, now_millis());
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_comment_tx(&tx, &placeholder)?;
        tx.commit()?;
        Ok(())
    }

    pub fn insert_reply_placeholder(
        &self,
        story_id: &str,
        user_id: &str,
        comment_user_id: &str,
        text: &str,
    ) -> Result<()> {
        let Some(comment) = self.comment(story_id, comment_user_id)? else {
            warn!(story_id, comment_user_id, "Cannot reply to unknown comment");
            return Ok(());
        };
        let reply = Reply::placeholder(story_id, &comment.id, user_id, text, now_millis());
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_reply_tx(&tx, &reply)?;
        tx.commit()?;
        Ok(())
    }

    pub fn edit_reply(&self, reply_id: &str, text: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE replies SET text = ?1 WHERE id = ?2",
            params![text, reply_id],
        )?;
        Ok(())
    }

    pub fn delete_reply(&self, reply_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM replies WHERE id = ?1", params![reply_id])?;
        Ok(())
    }

    /// Remove the user's own comment from a story after an unshare.
    pub fn clear_self_comments(&self, story_id: &str, user_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM comments WHERE story_id = ?1 AND user_id = ?2",
            params![story_id, user_id],
        )?;
        Ok(())
    }

    pub fn set_comment_liked(
        &self,
        story_id: &str,
        comment_user_id: &str,
        user_id: &str,
        liked: bool,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let current = tx
            .query_row(
                "SELECT id, liking_users FROM comments WHERE story_id = ?1 AND user_id = ?2",
                params![story_id, comment_user_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((comment_id, liking)) = current else {
            warn!(story_id, comment_user_id, "Cannot like unknown comment");
            return Ok(());
        };

        let mut users = from_json_list(&liking);
        users.retain(|u| u != user_id);
        if liked {
            users.push(user_id.to_string());
        }
        tx.execute(
            "UPDATE comments SET liking_users = ?1 WHERE id = ?2",
            params![to_json_list(&users), comment_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT user_id, username, photo_url, location FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserProfile {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        photo_url: row.get(2)?,
                        location: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_comment(story_id: &str, user_id: &str) -> Comment {
        Comment {
            id: format!("c-{}-{}", story_id, user_id),
            story_id: story_id.into(),
            user_id: user_id.into(),
            text: "server".into(),
            replies: vec![Reply {
                id: "r1".into(),
                user_id: "other".into(),
                text: "hi".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_placeholder_skipped_when_comment_exists() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .update_comment(&CommentResponse {
                comment: server_comment("s1", "me"),
                users: vec![],
            })
            .unwrap();
        store.insert_comment_placeholder("s1", "me", Some("x")).unwrap();
        let comments = store.comments_for_story("s1").unwrap();
        assert_eq!(comments.len(), 1);
        assert!(!comments[0].is_placeholder);
    }

    #[test]
    fn test_server_comment_replaces_placeholder() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_comment_placeholder("s1", "me", None).unwrap();
        store.insert_comment_placeholder("s2", "me", None).unwrap();
        assert!(store.comment("s1", "me").unwrap().unwrap().is_pseudo);

        store
            .update_comment(&CommentResponse {
                comment: server_comment("s1", "me"),
                users: vec![UserProfile {
                    user_id: "other".into(),
                    username: "o".into(),
                    ..Default::default()
                }],
            })
            .unwrap();

        let comments = store.comments_for_story("s1").unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].replies.len(), 1);
        assert_eq!(comments[0].replies[0].comment_id, comments[0].id);
        assert!(store.comment("s2", "me").unwrap().unwrap().is_placeholder);
        assert!(store.user_profile("other").unwrap().is_some());
    }

    #[test]
    fn test_reply_placeholder_edit_delete() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .update_comment(&CommentResponse {
                comment: server_comment("s1", "them"),
                users: vec![],
            })
            .unwrap();
        store.insert_reply_placeholder("s1", "me", "them", "thanks").unwrap();
        store.insert_reply_placeholder("s1", "me", "nobody", "lost").unwrap();

        let comment = &store.comments_for_story("s1").unwrap()[0];
        assert_eq!(comment.replies.len(), 2);
        let placeholder = comment.replies.iter().find(|r| r.is_placeholder).unwrap();

        store.edit_reply(&placeholder.id, "edited").unwrap();
        let comment = &store.comments_for_story("s1").unwrap()[0];
        assert!(comment.replies.iter().any(|r| r.text == "edited"));

        store.delete_reply(&placeholder.id).unwrap();
        assert_eq!(store.comments_for_story("s1").unwrap()[0].replies.len(), 1);
    }

    #[test]
    fn test_like_toggle_and_clear() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .update_comment(&CommentResponse {
                comment: server_comment("s1", "them"),
                users: vec![],
            })
            .unwrap();
        store.set_comment_liked("s1", "them", "me", true).unwrap();
        store.set_comment_liked("s1", "them", "me", true).unwrap();
        assert_eq!(store.comment("s1", "them").unwrap().unwrap().liking_users, vec!["me"]);
        store.set_comment_liked("s1", "them", "me", false).unwrap();
        assert!(store.comment("s1", "them").unwrap().unwrap().liking_users.is_empty());

        store.clear_self_comments("s1", "them").unwrap();
        assert!(store.comment("s1", "them").unwrap().is_none());
    }
}
