//! Message framer.
//!
//! Reassembles frames from a byte stream. The framer never touches the
//! transport: the session feeds it whatever a read produced through
//! [`Framer::on_bytes`], and reports reads that produced nothing (a read
//! timeout) through [`Framer::on_idle`].
//!
//! # State Machine
//!
//! ```text
//!                 first byte               9 bytes
//! ┌─────────────────┐     ┌────────────┐        ┌───────────────┐
//! │ WaitHeaderEmpty │────>│ WaitHeader │───────>│ WaitBodyEmpty │
//! └─────────────────┘     └────────────┘        └───────────────┘
//!          ^                    │                       │ first byte
//!          │ frame / reset      │ idle > max            ↓
//!          │              ┌───────────────┐        ┌──────────┐
//!          ├──────────────│ HeaderTimeout │        │ WaitBody │
//!          │              └───────────────┘        └──────────┘
//!          │              ┌─────────────┐  idle > max  │
//!          └──────────────│ BodyTimeout │<─────────────┘
//!                         └─────────────┘
//! ```
//!
//! A declared body of zero bytes completes as soon as the header does. A
//! declared body above [`FramerConfig::max_body_size`] is rejected on the
//! spot and the framer starts over with the bytes that follow.
//!
//! Idle reads are only counted once a message has started: a quiet
//! connection sitting in `WaitHeaderEmpty` never times out.

use bytes::BytesMut;
use ptree_proto::{Frame, MessageHeader};

use crate::error::FrameError;

/// Framer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    /// Nothing of the next message received yet
    WaitHeaderEmpty,
    /// Part of the header received
    WaitHeader,
    /// Header complete, no body bytes yet
    WaitBodyEmpty,
    /// Part of the body received
    WaitBody,
    /// Header stalled; partial message dropped
    HeaderTimeout,
    /// Body stalled; partial message dropped
    BodyTimeout,
}

/// Framer configuration
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Largest accepted body in bytes
    pub max_body_size: usize,
    /// Consecutive zero-progress reads tolerated inside a message
    pub max_idle_reads: u32,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self { max_body_size: 1024 * 1024, max_idle_reads: 3 }
    }
}

/// Output of the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete message
    Frame(Frame),
    /// A message was abandoned; the framer has reset
    Rejected(FrameError),
}

/// Per-connection frame reassembly.
#[derive(Debug)]
pub struct Framer {
    state: FramerState,
    config: FramerConfig,
    header_buf: [u8; MessageHeader::SIZE],
    header_len: usize,
    header: Option<MessageHeader>,
    body: BytesMut,
    body_len: usize,
    idle_reads: u32,
}

impl Framer {
    /// Create a framer waiting for the first header.
    pub fn new(config: FramerConfig) -> Self {
        Self {
            state: FramerState::WaitHeaderEmpty,
            config,
            header_buf: [0; MessageHeader::SIZE],
            header_len: 0,
            header: None,
            body: BytesMut::new(),
            body_len: 0,
            idle_reads: 0,
        }
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Consume bytes read from the transport.
    ///
    /// Returns every frame completed and every rejection raised by this
    /// input, in stream order.
    pub fn on_bytes(&mut self, mut input: &[u8]) -> Vec<FramerEvent> {
        let mut events = Vec::new();

        if input.is_empty() {
            events.extend(self.on_idle().map(FramerEvent::Rejected));
            return events;
        }

        if matches!(self.state, FramerState::HeaderTimeout | FramerState::BodyTimeout) {
            self.reset();
        }

        while !input.is_empty() {
            self.idle_reads = 0;
            match self.state {
                FramerState::WaitHeaderEmpty | FramerState::WaitHeader => {
                    let take = (MessageHeader::SIZE - self.header_len).min(input.len());
                    self.header_buf[self.header_len..self.header_len + take]
                        .copy_from_slice(&input[..take]);
                    self.header_len += take;
                    input = &input[take..];
                    self.state = FramerState::WaitHeader;

                    if self.header_len == MessageHeader::SIZE {
                        events.extend(self.on_header_complete());
                    }
                },
                FramerState::WaitBodyEmpty | FramerState::WaitBody => {
                    let take = (self.body_len - self.body.len()).min(input.len());
                    self.body.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    self.state = FramerState::WaitBody;

                    if self.body.len() == self.body_len {
                        events.push(self.complete());
                    }
                },
                FramerState::HeaderTimeout | FramerState::BodyTimeout => self.reset(),
            }
        }

        events
    }

    /// Report a read that returned no data.
    ///
    /// Returns the timeout raised once more than
    /// [`FramerConfig::max_idle_reads`] consecutive idle reads hit the same
    /// message.
    pub fn on_idle(&mut self) -> Option<FrameError> {
        match self.state {
            FramerState::WaitHeaderEmpty => None,
            FramerState::HeaderTimeout | FramerState::BodyTimeout => {
                self.reset();
                None
            },
            FramerState::WaitHeader | FramerState::WaitBodyEmpty | FramerState::WaitBody => {
                self.idle_reads += 1;
                if self.idle_reads <= self.config.max_idle_reads {
                    return None;
                }

                let (state, error) = if self.state == FramerState::WaitHeader {
                    (FramerState::HeaderTimeout, FrameError::HeaderTimeout)
                } else {
                    (FramerState::BodyTimeout, FrameError::BodyTimeout)
                };
                self.reset();
                self.state = state;
                Some(error)
            },
        }
    }

    fn on_header_complete(&mut self) -> Option<FramerEvent> {
        let header = match MessageHeader::from_bytes(&self.header_buf) {
            Ok(header) => header,
            // Unreachable with a full buffer; treat as a bad size to stay total.
            Err(_) => return Some(self.reject(FrameError::Undersized { declared: 0 })),
        };

        let Ok(body_len) = header.body_len() else {
            return Some(self.reject(FrameError::Undersized { declared: header.size() }));
        };

        if body_len > self.config.max_body_size {
            return Some(
                self.reject(FrameError::Oversized {
                    declared: body_len,
                    max: self.config.max_body_size,
                }),
            );
        }

        self.header = Some(header);
        self.body_len = body_len;
        if body_len == 0 {
            return Some(self.complete());
        }

        self.body.reserve(body_len);
        self.state = FramerState::WaitBodyEmpty;
        None
    }

    fn complete(&mut self) -> FramerEvent {
        let body = self.body.split().freeze();
        let event = match self.header.take() {
            Some(header) => FramerEvent::Frame(Frame::new(header, body)),
            None => FramerEvent::Rejected(FrameError::Undersized { declared: 0 }),
        };
        self.reset();
        event
    }

    fn reject(&mut self, error: FrameError) -> FramerEvent {
        self.reset();
        FramerEvent::Rejected(error)
    }

    fn reset(&mut self) {
        self.state = FramerState::WaitHeaderEmpty;
        self.header_len = 0;
        self.header = None;
        self.body.clear();
        self.body_len = 0;
        self.idle_reads = 0;
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(FramerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;
    use ptree_proto::{
        Message, MessageType,
        payloads::value::{GetValueRequest, SetValueIndication},
    };

    use super::*;

    fn frames(events: Vec<FramerEvent>) -> Vec<Frame> {
        events
            .into_iter()
            .filter_map(|event| match event {
                FramerEvent::Frame(frame) => Some(frame),
                FramerEvent::Rejected(_) => None,
            })
            .collect()
    }

    fn encoded(message: Message, tid: u32) -> Vec<u8> {
        message.into_frame(tid).unwrap().to_bytes().to_vec()
    }

    #[test]
    fn single_message_in_one_read() {
        let mut framer = Framer::default();
        let bytes = encoded(Message::GetValueRequest(GetValueRequest { uuid: 101 }), 4);

        let out = frames(framer.on_bytes(&bytes));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].transaction_id(), 4);
        assert_eq!(out[0].header.message_type(), Ok(MessageType::GetValueRequest));
        assert_eq!(framer.state(), FramerState::WaitHeaderEmpty);
    }

    #[test]
    fn several_messages_in_one_read() {
        let mut framer = Framer::default();
        let mut bytes = encoded(Message::GetValueRequest(GetValueRequest { uuid: 1 }), 1);
        bytes.extend(encoded(Message::GetValueRequest(GetValueRequest { uuid: 2 }), 2));

        let out = frames(framer.on_bytes(&bytes));
        let tids: Vec<u32> = out.iter().map(Frame::transaction_id).collect();
        assert_eq!(tids, vec![1, 2]);
    }

    #[test]
    fn state_follows_partial_input() {
        let mut framer = Framer::default();
        let bytes = encoded(Message::GetValueRequest(GetValueRequest { uuid: 7 }), 0);

        assert!(framer.on_bytes(&bytes[..4]).is_empty());
        assert_eq!(framer.state(), FramerState::WaitHeader);

        assert!(framer.on_bytes(&bytes[4..9]).is_empty());
        assert_eq!(framer.state(), FramerState::WaitBodyEmpty);

        assert!(framer.on_bytes(&bytes[9..11]).is_empty());
        assert_eq!(framer.state(), FramerState::WaitBody);

        assert_eq!(frames(framer.on_bytes(&bytes[11..])).len(), 1);
        assert_eq!(framer.state(), FramerState::WaitHeaderEmpty);
    }

    #[test]
    fn empty_body_completes_with_header() {
        let mut framer = Framer::default();
        let events = framer.on_bytes(&hex!("38 09000000 05000000"));

        let out = frames(events);
        assert_eq!(out.len(), 1);
        assert!(out[0].body.is_empty());
    }

    #[test]
    fn oversized_body_is_rejected_and_framing_resumes() {
        let mut framer = Framer::new(FramerConfig { max_body_size: 16, ..Default::default() });
        let mut bytes = hex!("31 40000000 01000000").to_vec();
        bytes.extend(encoded(Message::GetValueRequest(GetValueRequest { uuid: 3 }), 9));

        let events = framer.on_bytes(&bytes);
        assert_eq!(
            events[0],
            FramerEvent::Rejected(FrameError::Oversized { declared: 55, max: 16 })
        );
        assert_eq!(frames(events).len(), 1);
    }

    #[test]
    fn default_limit_is_one_mebibyte() {
        let mut framer = Framer::default();
        let size = (1024 * 1024 + MessageHeader::SIZE + 1) as u32;
        let mut header = vec![0x31];
        header.extend(size.to_le_bytes());
        header.extend(0u32.to_le_bytes());

        let events = framer.on_bytes(&header);
        assert_eq!(
            events,
            vec![FramerEvent::Rejected(FrameError::Oversized {
                declared: 1024 * 1024 + 1,
                max: 1024 * 1024
            })]
        );
    }

    #[test]
    fn undersized_header_is_rejected() {
        let mut framer = Framer::default();
        let events = framer.on_bytes(&hex!("31 03000000 01000000"));
        assert_eq!(events, vec![FramerEvent::Rejected(FrameError::Undersized { declared: 3 })]);
        assert_eq!(framer.state(), FramerState::WaitHeaderEmpty);
    }

    #[test]
    fn idle_reads_before_a_message_are_free() {
        let mut framer = Framer::default();
        for _ in 0..100 {
            assert_eq!(framer.on_idle(), None);
        }
        assert_eq!(framer.state(), FramerState::WaitHeaderEmpty);
    }

    #[test]
    fn header_timeout_after_allowance() {
        let mut framer = Framer::default();
        framer.on_bytes(&[0x37, 0x0d]);

        assert_eq!(framer.on_idle(), None);
        assert_eq!(framer.on_idle(), None);
        assert_eq!(framer.on_idle(), None);
        assert_eq!(framer.on_idle(), Some(FrameError::HeaderTimeout));
        assert_eq!(framer.state(), FramerState::HeaderTimeout);

        // The next read starts a fresh message.
        let bytes = encoded(Message::GetValueRequest(GetValueRequest { uuid: 3 }), 1);
        assert_eq!(frames(framer.on_bytes(&bytes)).len(), 1);
    }

    #[test]
    fn body_timeout_after_allowance() {
        let mut framer = Framer::new(FramerConfig { max_idle_reads: 1, ..Default::default() });
        let bytes = encoded(Message::GetValueRequest(GetValueRequest { uuid: 3 }), 1);
        framer.on_bytes(&bytes[..10]);

        assert_eq!(framer.on_idle(), None);
        assert_eq!(framer.on_idle(), Some(FrameError::BodyTimeout));

        // An idle tick in the error state resets quietly.
        assert_eq!(framer.on_idle(), None);
        assert_eq!(framer.state(), FramerState::WaitHeaderEmpty);
    }

    #[test]
    fn progress_resets_idle_count() {
        let mut framer = Framer::default();
        let bytes = encoded(Message::GetValueRequest(GetValueRequest { uuid: 3 }), 1);

        for chunk in bytes[..12].chunks(1) {
            framer.on_bytes(chunk);
            assert_eq!(framer.on_idle(), None);
            assert_eq!(framer.on_idle(), None);
            assert_eq!(framer.on_idle(), None);
        }
        assert_eq!(frames(framer.on_bytes(&bytes[12..])).len(), 1);
    }

    #[test]
    fn empty_read_counts_as_idle() {
        let mut framer = Framer::new(FramerConfig { max_idle_reads: 0, ..Default::default() });
        framer.on_bytes(&[0x37]);
        let events = framer.on_bytes(&[]);
        assert_eq!(events, vec![FramerEvent::Rejected(FrameError::HeaderTimeout)]);
    }

    proptest! {
        #[test]
        fn any_chunking_reassembles(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..40), 1..6),
            cuts in proptest::collection::vec(1usize..17, 1..64),
        ) {
            let mut stream = Vec::new();
            for (tid, data) in payloads.iter().enumerate() {
                let message = Message::SetValueIndication(SetValueIndication {
                    uuid: 100,
                    data: data.clone().into(),
                });
                stream.extend(encoded(message, tid as u32));
            }

            let mut framer = Framer::default();
            let mut out = Vec::new();
            let mut rest = &stream[..];
            let mut cut = cuts.iter().cycle();
            while !rest.is_empty() {
                let take = (*cut.next().unwrap()).min(rest.len());
                out.extend(frames(framer.on_bytes(&rest[..take])));
                rest = &rest[take..];
            }

            prop_assert_eq!(out.len(), payloads.len());
            for (tid, (frame, data)) in out.iter().zip(&payloads).enumerate() {
                prop_assert_eq!(frame.transaction_id(), tid as u32);
                let message = Message::from_frame(frame).unwrap();
                let Message::SetValueIndication(indication) = message else {
                    return Err(TestCaseError::fail("wrong message type"));
                };
                prop_assert_eq!(&indication.data[..], &data[..]);
            }
        }
    }
}
