//! Per-user sidebar: every conversation the user is in, with the
//! counterpart's profile, the latest message and the unseen count.

use tracing::warn;

use parley_shared::protocol::SidebarEntry;
use parley_shared::UserId;
use parley_store::{Conversation, Message, Profile};

use crate::error::EngineError;
use crate::presence::PresenceRegistry;
use crate::store::Store;

/// Sidebar row as read from the store, before presence is attached.
struct StoredRow {
    conversation: Conversation,
    counterpart: Profile,
    last_message: Option<Message>,
    unseen_count: u32,
}

#[derive(Clone)]
pub struct SidebarAggregator {
    store: Store,
    presence: PresenceRegistry,
}

impl SidebarAggregator {
    pub fn new(store: Store, presence: PresenceRegistry) -> Self {
        Self { store, presence }
    }

    /// Build the sidebar for `user`, most recently active conversation first.
    ///
    /// All rows come from one store call, so counts and previews are
    /// consistent with each other. Nothing is cached.
    pub async fn sidebar_for(&self, user: UserId) -> Result<Vec<SidebarEntry>, EngineError> {
        let rows = self
            .store
            .call(move |db| {
                let mut rows = Vec::new();
                for conversation in db.conversations_for_user(&user)? {
                    let Some(counterpart_id) = conversation.pair.counterpart(&user) else {
                        continue;
                    };
                    let Some(counterpart) = db.get_profile(&counterpart_id)? else {
                        warn!(
                            conversation = %conversation.id,
                            counterpart = %counterpart_id,
                            "Skipping conversation with unknown counterpart"
                        );
                        continue;
                    };
                    let last_message = db.last_message(&conversation.id)?;
                    let unseen_count = db.count_unseen(&conversation.id, &counterpart_id)?;

                    rows.push(StoredRow {
                        conversation,
                        counterpart,
                        last_message,
                        unseen_count,
                    });
                }
                Ok(rows)
            })
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let online = self.presence.is_online(&row.counterpart.id).await;
            entries.push(SidebarEntry {
                conversation_id: row.conversation.id,
                counterpart: row.counterpart.into(),
                last_message: row.last_message.map(Into::into),
                unseen_count: row.unseen_count,
                online,
                updated_at: row.conversation.updated_at,
            });
        }

        Ok(entries)
    }
}
