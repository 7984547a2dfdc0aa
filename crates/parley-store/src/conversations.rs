//! Find-or-create and enumeration of [`Conversation`] records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parley_shared::{ConversationId, PairKey, UserId};

use crate::convert::{parse_ts, parse_uuid, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Conversation;

const SELECT_COLUMNS: &str =
    "SELECT id, participant_low, participant_high, created_at, updated_at FROM conversations";

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Look up the conversation for an unordered pair of users.
    pub fn find_conversation(&self, pair: &PairKey) -> Result<Option<Conversation>> {
        let conversation = self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE participant_low = ?1 AND participant_high = ?2"),
                params![pair.low().to_string(), pair.high().to_string()],
                row_to_conversation,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Every conversation `user` takes part in, most recently active first.
    pub fn conversations_for_user(&self, user: &UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE participant_low = ?1 OR participant_high = ?1
             ORDER BY last_seq DESC, created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the conversation for `pair`, creating it if it does not exist.
    ///
    /// The insert relies on the `UNIQUE (participant_low, participant_high)`
    /// constraint: when another writer created the row first the insert is
    /// ignored and the winner's row is returned, so at most one conversation
    /// ever exists per pair.
    pub fn create_conversation(&self, pair: &PairKey) -> Result<Conversation> {
        let now = ts(&Utc::now());

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO conversations
                 (id, participant_low, participant_high, last_seq, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![
                ConversationId::new().to_string(),
                pair.low().to_string(),
                pair.high().to_string(),
                now,
            ],
        )?;

        if inserted == 0 {
            tracing::debug!(
                low = %pair.low(),
                high = %pair.high(),
                "conversation already existed, reusing it"
            );
        }

        self.find_conversation(pair)?.ok_or(StoreError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let low_str: String = row.get(1)?;
    let high_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let updated_str: String = row.get(4)?;

    let low = UserId(parse_uuid(1, &low_str)?);
    let high = UserId(parse_uuid(2, &high_str)?);

    Ok(Conversation {
        id: ConversationId(parse_uuid(0, &id_str)?),
        pair: PairKey::new(low, high),
        created_at: parse_ts(3, &created_str)?,
        updated_at: parse_ts(4, &updated_str)?,
    })
}
