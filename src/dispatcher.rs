use std::sync::Arc;

use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::{ApiError, ApiResult};
use crate::hub::Hub;
use crate::models::{Chat, Message, MessageKind, Story};
use crate::protocol::Event;
use crate::store::Store;

/// The sole authority that mutates the store and emits real-time events.
/// Events are emitted strictly after commit, in the task that committed,
/// so per-chat delivery order follows commit order.
pub struct Dispatcher {
    store: Store,
    bus: Arc<dyn EventBus>,
    hub: Arc<Hub>,
}

impl Dispatcher {
    pub fn new(store: Store, bus: Arc<dyn EventBus>, hub: Arc<Hub>) -> Self {
        Self { store, bus, hub }
    }

    /// Send into a chat the sender already belongs to. A sender who blocked
    /// the chat themselves is refused until they unblock or reply through
    /// the direct path.
    pub async fn send_to_chat(
        &self,
        chat_id: Uuid,
        sender_id: Uuid,
        kind: MessageKind,
        content: &str,
        media_url: Option<&str>,
    ) -> ApiResult<Message> {
        let mut tx = self.store.begin().await?;

        let membership = Store::lock_membership(&mut tx, chat_id, sender_id)
            .await?
            .ok_or(ApiError::NotAMember)?;
        if membership.blocked {
            return Err(ApiError::Blocked);
        }

        Store::clear_block_tx(&mut tx, chat_id, sender_id).await?;
        let message =
            Store::insert_message_tx(&mut tx, chat_id, sender_id, kind.as_str(), content, media_url)
                .await?;
        tx.commit().await?;

        self.emit_message_sent(&message).await;
        Ok(message)
    }

    /// Send to a user directly, creating the personal chat on first contact.
    /// Replying through this path lifts the sender's own block on the chat.
    pub async fn send_to_user(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        kind: MessageKind,
        content: &str,
        media_url: Option<&str>,
    ) -> ApiResult<Message> {
        if sender_id == recipient_id {
            return Err(ApiError::SelfSend);
        }
        if self.store.user_by_id(recipient_id).await?.is_none() {
            return Err(ApiError::NotFound("user"));
        }

        let chat = self.ensure_personal_chat(sender_id, recipient_id).await?;

        let mut tx = self.store.begin().await?;

        // Lock both membership rows in stable order so crossed A→B / B→A
        // sends cannot deadlock.
        let (first, second) = lock_order(sender_id, recipient_id);
        let first_membership = Store::lock_membership(&mut tx, chat.id, first)
            .await?
            .ok_or(ApiError::NotAMember)?;
        let second_membership = Store::lock_membership(&mut tx, chat.id, second)
            .await?
            .ok_or(ApiError::NotAMember)?;

        let recipient_membership = if first_membership.user_id == recipient_id {
            &first_membership
        } else {
            &second_membership
        };
        if recipient_membership.blocked {
            return Err(ApiError::BlockedByRecipient);
        }

        Store::clear_block_tx(&mut tx, chat.id, sender_id).await?;
        let message =
            Store::insert_message_tx(&mut tx, chat.id, sender_id, kind.as_str(), content, media_url)
                .await?;
        tx.commit().await?;

        self.emit_message_sent(&message).await;
        Ok(message)
    }

    /// Idempotent: an existing personal chat with exactly these two members
    /// is reused regardless of argument order.
    pub async fn create_personal_chat(&self, current_id: Uuid, other_id: Uuid) -> ApiResult<Chat> {
        if current_id == other_id {
            return Err(ApiError::SelfSend);
        }
        if self.store.user_by_id(other_id).await?.is_none() {
            return Err(ApiError::NotFound("user"));
        }
        self.ensure_personal_chat(current_id, other_id).await
    }

    async fn ensure_personal_chat(&self, a: Uuid, b: Uuid) -> ApiResult<Chat> {
        if let Some(chat) = self.store.find_personal_chat(a, b).await? {
            return Ok(chat);
        }
        let chat = self.store.create_personal_chat(a, b).await?;
        tracing::info!(component = "dispatcher", chat_id = %chat.id, "personal chat created");
        Ok(chat)
    }

    pub async fn create_channel(&self, creator_id: Uuid, name: &str) -> ApiResult<Chat> {
        let chat = self.store.create_channel(creator_id, name).await?;
        tracing::info!(component = "dispatcher", chat_id = %chat.id, "channel created");
        Ok(chat)
    }

    /// Idempotent; only the caller's own membership is touched.
    pub async fn block(&self, chat_id: Uuid, user_id: Uuid) -> ApiResult<()> {
        if !self.store.set_blocked(chat_id, user_id, true).await? {
            return Err(ApiError::NotAMember);
        }
        Ok(())
    }

    pub async fn unblock(&self, chat_id: Uuid, user_id: Uuid) -> ApiResult<()> {
        if !self.store.set_blocked(chat_id, user_id, false).await? {
            return Err(ApiError::NotAMember);
        }
        Ok(())
    }

    /// Read receipts are ephemeral fan-out: bus publish only, no store
    /// write.
    pub async fn mark_read(&self, chat_id: Uuid, message_id: Uuid, user_id: Uuid) -> ApiResult<()> {
        if self.store.membership(chat_id, user_id).await?.is_none() {
            return Err(ApiError::NotAMember);
        }

        let event = Event::message_read(chat_id, message_id, user_id);
        self.bus
            .publish(event.kind.routing_key(), &event)
            .await
            .map_err(|e| {
                tracing::warn!(component = "dispatcher", error = %e, "read receipt publish failed");
                ApiError::BusUnavailable
            })
    }

    /// Typing indicators from the session read loop. Best-effort.
    pub async fn typing(&self, chat_id: Uuid, user_id: Uuid, is_typing: bool) {
        let event = Event::typing_indicator(chat_id, user_id, is_typing);
        if let Err(e) = self.bus.publish(event.kind.routing_key(), &event).await {
            tracing::warn!(component = "dispatcher", chat_id = %chat_id, error = %e, "typing publish failed");
        }
    }

    pub async fn create_story(&self, user_id: Uuid, media_url: &str) -> ApiResult<Story> {
        let story = self.store.create_story(user_id, media_url).await?;

        let event = Event::story_created(&story);
        if let Err(e) = self.bus.publish(event.kind.routing_key(), &event).await {
            tracing::warn!(component = "dispatcher", story_id = %story.id, error = %e, "story publish failed");
        }
        Ok(story)
    }

    // Post-commit emission: the message is durable whatever happens here.
    // The bus and the per-member channel publishes are independent delivery
    // paths; clients dedup by message id.
    async fn emit_message_sent(&self, message: &Message) {
        let event = Event::message_sent(message);

        if let Err(e) = self.bus.publish(event.kind.routing_key(), &event).await {
            tracing::warn!(
                component = "dispatcher",
                message_id = %message.id,
                error = %e,
                "bus publish failed after commit"
            );
        }

        match self.store.member_ids(message.chat_id).await {
            Ok(members) => {
                for member_id in members {
                    if member_id == message.sender_id {
                        continue;
                    }
                    self.hub.deliver_to_user(member_id, &event).await;
                }
            }
            Err(e) => {
                tracing::warn!(
                    component = "dispatcher",
                    chat_id = %message.chat_id,
                    error = %e,
                    "member fan-out skipped; bus path remains"
                );
            }
        }
    }
}

fn lock_order(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_order_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(lock_order(a, b), lock_order(b, a));
        assert_eq!(lock_order(a, a), (a, a));
    }
}
