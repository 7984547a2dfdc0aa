//! Delivery router: applies conversation-changing events to the store and
//! fans the results out to every connection of the affected users.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use parley_shared::constants::{MAX_TEXT_LEN, MAX_URL_LEN};
use parley_shared::protocol::{
    ChatMessage, MessageContent, MessagesPayload, ServerEvent, ThreadPayload,
};
use parley_shared::{PairKey, UserId};

use crate::error::EngineError;
use crate::presence::PresenceRegistry;
use crate::sidebar::SidebarAggregator;
use crate::store::Store;

#[derive(Clone)]
pub struct DeliveryRouter {
    store: Store,
    presence: PresenceRegistry,
    sidebar: SidebarAggregator,
    pair_locks: Arc<StdMutex<HashMap<PairKey, Arc<Mutex<()>>>>>,
}

impl DeliveryRouter {
    pub fn new(store: Store, presence: PresenceRegistry, sidebar: SidebarAggregator) -> Self {
        Self {
            store,
            presence,
            sidebar,
            pair_locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Serialize writers of one pair. Unused locks of other pairs are
    /// pruned on the way in.
    async fn lock_pair(&self, pair: PairKey) -> Result<OwnedMutexGuard<()>, EngineError> {
        let lock = {
            let mut locks = self
                .pair_locks
                .lock()
                .map_err(|_| EngineError::Internal("pair lock table poisoned".into()))?;
            locks.retain(|key, lock| *key == pair || Arc::strong_count(lock) > 1);
            locks.entry(pair).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    /// Profile, presence and history of the thread between `requester` and
    /// `counterpart`. Never creates a conversation.
    pub async fn open_thread(
        &self,
        requester: UserId,
        counterpart: UserId,
    ) -> Result<ThreadPayload, EngineError> {
        let pair = PairKey::new(requester, counterpart);

        let (profile, messages) = self
            .store
            .call(move |db| {
                let Some(profile) = db.get_profile(&counterpart)? else {
                    return Ok(None);
                };
                let messages = match db.find_conversation(&pair)? {
                    Some(conversation) => db.list_messages(&conversation.id)?,
                    None => Vec::new(),
                };
                Ok(Some((profile, messages)))
            })
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {counterpart}")))?;

        let online = self.presence.is_online(&counterpart).await;

        Ok(ThreadPayload {
            user: profile.into(),
            online,
            messages: messages.into_iter().map(Into::into).collect(),
        })
    }

    /// Persist a message from `sender` to `receiver` and fan it out.
    ///
    /// Both users' connections first get the full message list, then each
    /// gets their own sidebar. If persisting fails nothing is pushed.
    pub async fn send_message(
        &self,
        sender: UserId,
        receiver: UserId,
        content: MessageContent,
    ) -> Result<ChatMessage, EngineError> {
        validate_content(&content)?;
        if sender == receiver {
            return Err(EngineError::Invalid("cannot message yourself".into()));
        }

        let pair = PairKey::new(sender, receiver);
        let guard = self.lock_pair(pair).await?;

        let (message, messages) = self
            .store
            .call(move |db| {
                if db.get_profile(&receiver)?.is_none() {
                    return Ok(None);
                }
                let conversation = db.create_conversation(&pair)?;
                let message = db.append_message(&conversation.id, &sender, &content)?;
                let messages = db.list_messages(&conversation.id)?;
                Ok(Some((message, messages)))
            })
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {receiver}")))?;

        debug!(
            sender = %sender,
            receiver = %receiver,
            conversation = %message.conversation_id,
            total = messages.len(),
            "Message persisted"
        );

        let update = ServerEvent::MessagesUpdated(MessagesPayload {
            conversation_id: message.conversation_id,
            messages: messages.into_iter().map(Into::into).collect(),
        });
        self.presence.push_to_user(&sender, &update).await;
        self.presence.push_to_user(&receiver, &update).await;

        // Sidebars are computed under the pair guard so a later send on the
        // same pair cannot be overtaken by this one's stale view. The message
        // is stored and delivered; a failed refresh is only logged so the
        // sender is not prompted to resend.
        for user in [sender, receiver] {
            if let Err(e) = self.push_sidebar(user).await {
                warn!(user = %user, error = %e, "Sidebar refresh after send failed");
            }
        }
        drop(guard);

        Ok(message.into())
    }

    /// Mark everything `counterpart_author` wrote to `viewer` as seen, then
    /// refresh both sidebars. Returns how many messages flipped.
    pub async fn mark_seen(
        &self,
        viewer: UserId,
        counterpart_author: UserId,
    ) -> Result<usize, EngineError> {
        let pair = PairKey::new(viewer, counterpart_author);
        let _guard = self.lock_pair(pair).await?;

        let flipped = self
            .store
            .call(move |db| match db.find_conversation(&pair)? {
                Some(conversation) => db.set_seen(&conversation.id, &counterpart_author),
                None => Ok(0),
            })
            .await?;

        debug!(
            viewer = %viewer,
            author = %counterpart_author,
            flipped,
            "Messages marked seen"
        );

        self.push_sidebar(viewer).await?;
        if counterpart_author != viewer {
            self.push_sidebar(counterpart_author).await?;
        }

        Ok(flipped)
    }

    /// Recompute `user`'s sidebar and push it to all of their connections.
    pub async fn push_sidebar(&self, user: UserId) -> Result<(), EngineError> {
        if !self.presence.is_online(&user).await {
            return Ok(());
        }
        let entries = self.sidebar.sidebar_for(user).await?;
        self.presence
            .push_to_user(&user, &ServerEvent::SidebarUpdated(entries))
            .await;
        Ok(())
    }
}

fn validate_content(content: &MessageContent) -> Result<(), EngineError> {
    if content.text.len() > MAX_TEXT_LEN {
        return Err(EngineError::Invalid(format!(
            "text longer than {MAX_TEXT_LEN} bytes"
        )));
    }
    if content.image_url.len() > MAX_URL_LEN || content.video_url.len() > MAX_URL_LEN {
        return Err(EngineError::Invalid(format!(
            "media reference longer than {MAX_URL_LEN} bytes"
        )));
    }
    Ok(())
}
