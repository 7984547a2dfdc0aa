use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parley_shared::protocol::MessageContent;
use parley_shared::{ConversationId, MessageId, UserId};

use crate::convert::{parse_ts, parse_uuid, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

const SELECT_COLUMNS: &str = "SELECT id, conversation_id, author_id, text, image_url, video_url, seen, created_at
     FROM messages";

impl Database {
    /// Persist a new message and append it to its conversation.
    ///
    /// The insert and the conversation's activity bump commit together;
    /// on error nothing is written. Runs under a savepoint, so it also
    /// nests inside a caller's transaction.
    pub fn append_message(
        &self,
        conversation_id: &ConversationId,
        author: &UserId,
        content: &MessageContent,
    ) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            conversation_id: *conversation_id,
            author: *author,
            content: content.clone(),
            seen: false,
            created_at: Utc::now(),
        };

        self.conn().execute_batch("SAVEPOINT append_message")?;
        match self.insert_and_bump(&message) {
            Ok(()) => {
                self.conn().execute_batch("RELEASE append_message")?;
                Ok(message)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conn()
                    .execute_batch("ROLLBACK TO append_message; RELEASE append_message")
                {
                    tracing::warn!(error = %rollback, "rolling back append_message failed");
                }
                Err(e)
            }
        }
    }

    fn insert_and_bump(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, author_id, text, image_url, video_url, seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                message.id.0.to_string(),
                message.conversation_id.to_string(),
                message.author.to_string(),
                message.content.text,
                message.content.image_url,
                message.content.video_url,
                ts(&message.created_at),
            ],
        )?;
        let seq = self.conn().last_insert_rowid();

        let affected = self.conn().execute(
            "UPDATE conversations SET last_seq = ?1, updated_at = ?2 WHERE id = ?3",
            params![seq, ts(&message.created_at), message.conversation_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// All messages of a conversation in append order.
    pub fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE conversation_id = ?1 ORDER BY seq ASC"
        ))?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn last_message(&self, conversation_id: &ConversationId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT 1"),
                params![conversation_id.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Mark every unseen message written by `author` in the conversation as
    /// seen. Returns how many messages changed.
    pub fn set_seen(&self, conversation_id: &ConversationId, author: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET seen = 1
             WHERE conversation_id = ?1 AND author_id = ?2 AND seen = 0",
            params![conversation_id.to_string(), author.to_string()],
        )?;
        Ok(affected)
    }

    /// Number of messages by `author` in the conversation not yet seen.
    pub fn count_unseen(&self, conversation_id: &ConversationId, author: &UserId) -> Result<u32> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1 AND author_id = ?2 AND seen = 0",
            params![conversation_id.to_string(), author.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let author_str: String = row.get(2)?;
    let seen: i64 = row.get(6)?;
    let created_str: String = row.get(7)?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        conversation_id: ConversationId(parse_uuid(1, &conversation_str)?),
        author: UserId(parse_uuid(2, &author_str)?),
        content: MessageContent {
            text: row.get(3)?,
            image_url: row.get(4)?,
            video_url: row.get(5)?,
        },
        seen: seen != 0,
        created_at: parse_ts(7, &created_str)?,
    })
}
