use chrono::Utc;

use crate::common::models::{Message, MessageId, MessageStatus, UserId};
use crate::utils::ids::new_temp_id;

/// Outcome of merging an inbound message into a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// Replaced the optimistic entry with the same temp id.
    Reconciled,
    Appended,
    /// Already known, list untouched.
    Duplicate,
    /// Belongs to another conversation.
    Foreign,
}

/// How a front end should surface an inbound push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// New line in the open conversation.
    Show,
    /// The pending line already on screen now has its server id.
    Confirm,
    /// Badge notice for a conversation that is not open.
    Notify,
    Silent,
}

impl Merge {
    /// `merge` is `None` when no conversation is open.
    pub fn presentation(merge: Option<Merge>, addressed_to_me: bool) -> Presentation {
        match merge {
            Some(Merge::Appended) => Presentation::Show,
            Some(Merge::Reconciled) => Presentation::Confirm,
            Some(Merge::Duplicate) => Presentation::Silent,
            Some(Merge::Foreign) | None if addressed_to_me => Presentation::Notify,
            Some(Merge::Foreign) | None => Presentation::Silent,
        }
    }
}

/// Messages exchanged between the current user and one peer.
///
/// Entries are kept in arrival order; [`Conversation::ordered`] gives the
/// timestamp-sorted view to display. An optimistic entry keeps its storage
/// slot when the server copy replaces it, even if the server timestamp differs.
#[derive(Debug, Clone)]
pub struct Conversation {
    me: UserId,
    peer: UserId,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(me: UserId, peer: UserId) -> Self {
        Self { me, peer, messages: Vec::new() }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn peer(&self) -> UserId {
        self.peer
    }

    /// Replace the content with the server history.
    pub fn load_history(&mut self, history: Vec<Message>) {
        let (me, peer) = (self.me, self.peer);
        self.messages = history.into_iter().filter(|m| m.involves(me, peer)).collect();
    }

    /// Show a text message right away, before the server has seen it.
    pub fn push_optimistic(&mut self, content: &str) -> Message {
        let message = Message {
            id: None,
            temp_id: Some(new_temp_id()),
            sender_id: self.me,
            receiver_id: self.peer,
            content: content.to_string(),
            attachments: Vec::new(),
            timestamp: Utc::now(),
            is_read: false,
            message_status: MessageStatus::Sending,
        };
        self.messages.push(message.clone());
        message
    }

    /// Drop an optimistic entry that never made it out.
    pub fn discard_optimistic(&mut self, temp_id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| !(m.is_pending() && m.temp_id.as_deref() == Some(temp_id)));
        self.messages.len() != before
    }

    pub fn apply_inbound(&mut self, mut incoming: Message) -> Merge {
        if !incoming.involves(self.me, self.peer) {
            return Merge::Foreign;
        }

        if let Some(temp_id) = incoming.temp_id.clone() {
            if let Some(slot) = self
                .messages
                .iter_mut()
                .find(|m| m.is_pending() && m.temp_id.as_deref() == Some(temp_id.as_str()))
            {
                incoming.message_status = MessageStatus::Delivered;
                *slot = incoming;
                return Merge::Reconciled;
            }
            // echo of a send that was already reconciled through the other path
            if self.messages.iter().any(|m| m.temp_id.as_deref() == Some(temp_id.as_str())) {
                return Merge::Duplicate;
            }
        }

        if let Some(id) = incoming.id {
            if self.messages.iter().any(|m| m.id == Some(id)) {
                return Merge::Duplicate;
            }
        }

        self.messages.push(incoming);
        Merge::Appended
    }

    /// Messages sorted by timestamp; ties keep arrival order.
    pub fn ordered(&self) -> Vec<&Message> {
        let mut view: Vec<&Message> = self.messages.iter().collect();
        view.sort_by_key(|m| m.timestamp);
        view
    }

    /// Flag every unread message from the peer as read and return the ids to acknowledge.
    pub fn mark_all_read(&mut self) -> Vec<MessageId> {
        let peer = self.peer;
        self.messages
            .iter_mut()
            .filter(|m| m.sender_id == peer && !m.is_read)
            .filter_map(|m| {
                m.is_read = true;
                m.message_status = MessageStatus::Read;
                m.id
            })
            .collect()
    }

    pub fn mark_read(&mut self, id: MessageId) -> bool {
        match self.messages.iter_mut().find(|m| m.id == Some(id)) {
            Some(m) if !m.is_read => {
                m.is_read = true;
                m.message_status = MessageStatus::Read;
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_pending())
    }

    pub fn last(&self) -> Option<&Message> {
        self.ordered().last().copied()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
