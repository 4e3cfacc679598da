//! Per-session queue of outgoing notifications.
//!
//! Entries are pushed from any thread without blocking and drained by
//! whoever currently holds the session's send lock. Draining preserves push
//! order and merges runs of entries of the same kind into one message:
//!
//! - consecutive property updates become one `PropertyUpdateNotification`
//! - consecutive creations and deletions become one `MetaUpdateNotification`,
//!   except that a creation following a deletion starts a new message, since
//!   receivers apply creations before deletions
//! - pre-encoded frames (forwarded rpc calls and answers) pass through as-is
//!   and end the current run
//!
//! A run also ends before it would grow past the configured body size.
//! The queue is bounded; a push beyond the limit is refused.

use std::collections::VecDeque;

use ptree_proto::{
    Frame, Message, UNSOLICITED_TRANSACTION_ID, WireFormat,
    payloads::{
        tree::{MetaCreate, MetaDelete, MetaUpdateNotification},
        value::{PropertyUpdate, PropertyUpdateNotification},
    },
};
use tracing::warn;

/// One structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaEntry {
    /// A property was created
    Created(MetaCreate),
    /// A property was deleted
    Deleted(MetaDelete),
}

/// Something waiting to be written to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Structural change
    Meta(MetaEntry),
    /// Value change
    Value(PropertyUpdate),
    /// Complete message
    Frame(Frame),
}

enum Run {
    Meta(MetaUpdateNotification),
    Value(PropertyUpdateNotification),
}

impl Run {
    fn into_message(self) -> Message {
        match self {
            Self::Meta(meta) => Message::MetaUpdateNotification(meta),
            Self::Value(values) => Message::PropertyUpdateNotification(values),
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Meta(meta) => meta.encoded_len(),
            Self::Value(values) => values.encoded_len(),
        }
    }
}

/// FIFO of pending notifications.
#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<Outgoing>,
    max_body: usize,
    max_entries: usize,
}

impl Outbox {
    /// Empty outbox holding at most `max_entries` entries, whose merged
    /// messages stay within `max_body` bytes.
    pub fn new(max_body: usize, max_entries: usize) -> Self {
        Self { queue: VecDeque::new(), max_body, max_entries }
    }

    /// Append an entry. Returns `false`, dropping the entry, when full.
    #[must_use]
    pub fn push(&mut self, entry: Outgoing) -> bool {
        if self.queue.len() >= self.max_entries {
            return false;
        }
        self.queue.push_back(entry);
        true
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove every entry, merged into frames in push order.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut run: Option<Run> = None;

        while let Some(entry) = self.queue.pop_front() {
            match entry {
                Outgoing::Frame(frame) => {
                    flush(&mut frames, run.take());
                    frames.push(frame);
                },
                Outgoing::Meta(meta) => {
                    let extra = match &meta {
                        MetaEntry::Created(created) => created.encoded_len(),
                        MetaEntry::Deleted(deleted) => deleted.encoded_len(),
                    };
                    let fits = match &run {
                        Some(Run::Meta(current)) => {
                            let reorders = matches!(meta, MetaEntry::Created(_))
                                && !current.deletions.is_empty();
                            !reorders && current.encoded_len() + extra <= self.max_body
                        },
                        _ => false,
                    };
                    if !fits {
                        flush(&mut frames, run.replace(Run::Meta(MetaUpdateNotification::default())));
                    }
                    if let Some(Run::Meta(current)) = &mut run {
                        match meta {
                            MetaEntry::Created(created) => current.creations.push(created),
                            MetaEntry::Deleted(deleted) => current.deletions.push(deleted),
                        }
                    }
                },
                Outgoing::Value(update) => {
                    let fits = match &run {
                        Some(Run::Value(current)) => {
                            current.encoded_len() + update.encoded_len() <= self.max_body
                        },
                        _ => false,
                    };
                    if !fits {
                        flush(
                            &mut frames,
                            run.replace(Run::Value(PropertyUpdateNotification::default())),
                        );
                    }
                    if let Some(Run::Value(current)) = &mut run {
                        current.updates.push(update);
                    }
                },
            }
        }

        flush(&mut frames, run);
        frames
    }
}

fn flush(frames: &mut Vec<Frame>, run: Option<Run>) {
    let Some(run) = run else {
        return;
    };
    let len = run.encoded_len();
    match run.into_message().into_frame(UNSOLICITED_TRANSACTION_ID) {
        Ok(frame) => frames.push(frame),
        Err(error) => warn!(%error, len, "dropping notification that cannot be encoded"),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;
    use ptree_proto::{MessageType, PropertyType, payloads::rpc::RpcResponse};

    use super::*;

    fn created(uuid: u32) -> Outgoing {
        Outgoing::Meta(MetaEntry::Created(MetaCreate {
            uuid,
            property_type: PropertyType::Value,
            path: format!("/p{uuid}"),
        }))
    }

    fn deleted(uuid: u32) -> Outgoing {
        Outgoing::Meta(MetaEntry::Deleted(MetaDelete { uuid }))
    }

    fn update(uuid: u32, byte: u8) -> Outgoing {
        Outgoing::Value(PropertyUpdate { uuid, data: Bytes::from(vec![byte]) })
    }

    fn decode(frames: &[Frame]) -> Vec<Message> {
        frames.iter().map(|frame| Message::from_frame(frame).unwrap()).collect()
    }

    #[test]
    fn empty_outbox_drains_nothing() {
        let mut outbox = Outbox::new(1024, 1024);
        assert!(outbox.drain().is_empty());
    }

    #[test]
    fn consecutive_updates_merge() {
        let mut outbox = Outbox::new(1024, 1024);
        assert!(outbox.push(update(100, 1)));
        assert!(outbox.push(update(101, 2)));
        assert!(outbox.push(update(100, 3)));

        let frames = outbox.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].transaction_id(), UNSOLICITED_TRANSACTION_ID);
        let Message::PropertyUpdateNotification(notification) = &decode(&frames)[0] else {
            panic!("expected property update");
        };
        let order: Vec<(u32, u8)> =
            notification.updates.iter().map(|u| (u.uuid, u.data[0])).collect();
        assert_eq!(order, vec![(100, 1), (101, 2), (100, 3)]);
        assert!(outbox.is_empty());
    }

    #[test]
    fn creations_and_deletions_merge() {
        let mut outbox = Outbox::new(1024, 1024);
        assert!(outbox.push(created(100)));
        assert!(outbox.push(created(101)));
        assert!(outbox.push(deleted(100)));

        let messages = decode(&outbox.drain());
        assert_eq!(messages.len(), 1);
        let Message::MetaUpdateNotification(meta) = &messages[0] else {
            panic!("expected meta update");
        };
        assert_eq!(meta.creations.len(), 2);
        assert_eq!(meta.deletions, vec![MetaDelete { uuid: 100 }]);
    }

    #[test]
    fn creation_after_deletion_starts_new_message() {
        let mut outbox = Outbox::new(1024, 1024);
        assert!(outbox.push(created(100)));
        assert!(outbox.push(deleted(100)));
        assert!(outbox.push(created(100)));

        let messages = decode(&outbox.drain());
        assert_eq!(messages.len(), 2);
        let Message::MetaUpdateNotification(second) = &messages[1] else {
            panic!("expected meta update");
        };
        assert_eq!(second.creations.len(), 1);
        assert!(second.deletions.is_empty());
    }

    #[test]
    fn kinds_are_not_reordered() {
        let mut outbox = Outbox::new(1024, 1024);
        assert!(outbox.push(created(100)));
        assert!(outbox.push(update(100, 1)));
        assert!(outbox.push(Outgoing::Frame(
            Message::RpcResponse(RpcResponse { return_value: Bytes::new() }).into_frame(9).unwrap(),
        )));
        assert!(outbox.push(update(100, 2)));
        assert!(outbox.push(deleted(100)));

        let types: Vec<MessageType> =
            outbox.drain().iter().map(|f| f.header.message_type().unwrap()).collect();
        assert_eq!(
            types,
            vec![
                MessageType::MetaUpdateNotification,
                MessageType::PropertyUpdateNotification,
                MessageType::RpcResponse,
                MessageType::PropertyUpdateNotification,
                MessageType::MetaUpdateNotification,
            ]
        );
    }

    #[test]
    fn runs_split_at_body_limit() {
        // Each update is 4 + 4 + 1 = 9 bytes after the 4-byte count.
        let mut outbox = Outbox::new(4 + 9 * 2, 1024);
        for i in 0..5 {
            assert!(outbox.push(update(100, i)));
        }

        let frames = outbox.drain();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.body.len() <= 22));
    }

    #[test]
    fn full_outbox_refuses_entries() {
        let mut outbox = Outbox::new(1024, 2);
        assert!(outbox.push(update(100, 1)));
        assert!(outbox.push(created(101)));
        assert!(!outbox.push(update(100, 2)));
        assert_eq!(outbox.len(), 2);

        outbox.drain();
        assert!(outbox.push(update(100, 3)));
    }

    fn arb_entry() -> impl Strategy<Value = Outgoing> {
        prop_oneof![
            (100u32..110, any::<u8>()).prop_map(|(uuid, byte)| update(uuid, byte)),
            (100u32..110).prop_map(created),
            (100u32..110).prop_map(deleted),
        ]
    }

    /// Flatten drained messages back into entries.
    fn entries(messages: Vec<Message>) -> Vec<Outgoing> {
        let mut out = Vec::new();
        for message in messages {
            match message {
                Message::PropertyUpdateNotification(n) => {
                    out.extend(n.updates.into_iter().map(Outgoing::Value));
                },
                Message::MetaUpdateNotification(m) => {
                    out.extend(m.creations.into_iter().map(|c| Outgoing::Meta(MetaEntry::Created(c))));
                    out.extend(m.deletions.into_iter().map(|d| Outgoing::Meta(MetaEntry::Deleted(d))));
                },
                other => panic!("unexpected {other:?}"),
            }
        }
        out
    }

    proptest! {
        #[test]
        fn drain_preserves_order_within_limit(
            pushed in proptest::collection::vec(arb_entry(), 0..60),
            max_body in 32usize..256,
        ) {
            let mut outbox = Outbox::new(max_body, 1024);
            for entry in &pushed {
                prop_assert!(outbox.push(entry.clone()));
            }

            let frames = outbox.drain();
            prop_assert!(frames.iter().all(|f| f.body.len() <= max_body));
            prop_assert_eq!(entries(decode(&frames)), pushed);
        }
    }
}
