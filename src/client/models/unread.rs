use std::collections::HashMap;

use crate::common::models::{Message, UserId};

/// Unread badge state: how many messages each sender has waiting for the current user.
#[derive(Debug, Clone, Default)]
pub struct UnreadTracker {
    per_sender: HashMap<UserId, usize>,
    /// Peer of the conversation on screen, if any
    active: Option<UserId>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the counts from the backend's full unread list.
    pub fn refresh(&mut self, me: UserId, unread: &[Message]) {
        self.per_sender.clear();
        for message in unread.iter().filter(|m| m.receiver_id == me && !m.is_read) {
            *self.per_sender.entry(message.sender_id).or_insert(0) += 1;
        }
    }

    /// Count a pushed message. Returns whether the badge changed.
    ///
    /// Messages from the peer of the open conversation are considered seen.
    pub fn on_inbound(&mut self, me: UserId, message: &Message) -> bool {
        if message.receiver_id != me
            || message.sender_id == me
            || message.is_read
            || self.active == Some(message.sender_id)
        {
            return false;
        }
        *self.per_sender.entry(message.sender_id).or_insert(0) += 1;
        true
    }

    /// Returns how many messages were cleared.
    pub fn mark_conversation_read(&mut self, sender: UserId) -> usize {
        self.per_sender.remove(&sender).unwrap_or(0)
    }

    pub fn mark_message_read(&mut self, sender: UserId) {
        if let Some(count) = self.per_sender.get_mut(&sender) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_sender.remove(&sender);
            }
        }
    }

    pub fn set_active(&mut self, peer: Option<UserId>) {
        self.active = peer;
    }

    pub fn active(&self) -> Option<UserId> {
        self.active
    }

    pub fn count_for(&self, sender: UserId) -> usize {
        self.per_sender.get(&sender).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.per_sender.values().sum()
    }

    pub fn per_sender(&self) -> &HashMap<UserId, usize> {
        &self.per_sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::MessageStatus;
    use chrono::Utc;

    const ME: UserId = 10;
    const ALICE: UserId = 1;
    const BOB: UserId = 2;

    fn unread_from(sender: UserId, id: i64) -> Message {
        Message {
            id: Some(id),
            temp_id: None,
            sender_id: sender,
            receiver_id: ME,
            content: String::new(),
            attachments: Vec::new(),
            timestamp: Utc::now(),
            is_read: false,
            message_status: MessageStatus::Delivered,
        }
    }

    fn three_from_alice_one_from_bob() -> Vec<Message> {
        vec![unread_from(ALICE, 1), unread_from(ALICE, 2), unread_from(BOB, 3), unread_from(ALICE, 4)]
    }

    #[test]
    fn opening_a_conversation_clears_only_that_sender() {
        let mut tracker = UnreadTracker::new();
        tracker.refresh(ME, &three_from_alice_one_from_bob());
        assert_eq!(tracker.count_for(ALICE), 3);
        assert_eq!(tracker.total(), 4);

        assert_eq!(tracker.mark_conversation_read(ALICE), 3);
        assert_eq!(tracker.count_for(ALICE), 0);
        assert_eq!(tracker.count_for(BOB), 1);
        assert_eq!(tracker.total(), 1);
    }

    #[test]
    fn refresh_recomputes_from_scratch() {
        let mut tracker = UnreadTracker::new();
        tracker.refresh(ME, &three_from_alice_one_from_bob());
        tracker.refresh(ME, &[unread_from(BOB, 9)]);
        assert_eq!(tracker.count_for(ALICE), 0);
        assert_eq!(tracker.total(), 1);
    }

    #[test]
    fn pushes_from_the_open_conversation_do_not_count() {
        let mut tracker = UnreadTracker::new();
        tracker.set_active(Some(ALICE));
        assert!(!tracker.on_inbound(ME, &unread_from(ALICE, 1)));
        assert!(tracker.on_inbound(ME, &unread_from(BOB, 2)));
        assert_eq!(tracker.total(), 1);

        tracker.set_active(None);
        assert!(tracker.on_inbound(ME, &unread_from(ALICE, 3)));
        assert_eq!(tracker.count_for(ALICE), 1);
    }

    #[test]
    fn own_messages_and_read_messages_are_ignored() {
        let mut tracker = UnreadTracker::new();
        let mut mine = unread_from(ME, 1);
        mine.receiver_id = ALICE;
        assert!(!tracker.on_inbound(ME, &mine));
        let mut seen = unread_from(BOB, 2);
        seen.is_read = true;
        assert!(!tracker.on_inbound(ME, &seen));
        assert_eq!(tracker.total(), 0);
    }

    #[test]
    fn single_read_decrements_and_never_underflows() {
        let mut tracker = UnreadTracker::new();
        tracker.refresh(ME, &[unread_from(BOB, 1), unread_from(BOB, 2)]);
        tracker.mark_message_read(BOB);
        assert_eq!(tracker.count_for(BOB), 1);
        tracker.mark_message_read(BOB);
        tracker.mark_message_read(BOB);
        assert_eq!(tracker.count_for(BOB), 0);
        assert!(tracker.per_sender().is_empty());
    }
}
