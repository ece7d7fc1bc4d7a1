//! Unit tests for [`MessageHandler`] frame assembly.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use proptest::prelude::*;
use rstest::{fixture, rstest};
use tokio::sync::mpsc::UnboundedReceiver;

use super::{AssembledMessage, MessageHandler, MessageKind};
use crate::{
    completion::{Completion, CompletionFuture},
    config::SessionConfig,
    error::ProtocolError,
    frame::{CloseCode, Frame, OpCode},
    hooks::{FrameHandler, MessageHooks},
    session::{ChannelSession, ConnectionId, CoreSession, OutboundFrame},
};

/// Four-byte UTF-8 sequence used to exercise split characters.
const SMILE: &str = "\u{1F600}";

/// Records delivered messages, optionally holding their completions.
#[derive(Clone, Default)]
struct Inbox {
    messages: Arc<Mutex<Vec<AssembledMessage>>>,
    held: Arc<Mutex<Vec<Completion>>>,
}

impl Inbox {
    fn hooks(&self, hold: bool) -> MessageHooks {
        let text_inbox = self.clone();
        let binary_inbox = self.clone();
        MessageHooks::new()
            .on_text(move |text, completion| {
                text_inbox.receive(AssembledMessage::Text(text), completion, hold);
            })
            .on_binary(move |data, completion| {
                binary_inbox.receive(AssembledMessage::Binary(data), completion, hold);
            })
    }

    fn receive(&self, message: AssembledMessage, completion: Completion, hold: bool) {
        self.messages.lock().expect("messages lock").push(message);
        if hold {
            self.held.lock().expect("held lock").push(completion);
        } else {
            completion.succeed();
        }
    }

    fn messages(&self) -> Vec<AssembledMessage> { self.messages.lock().expect("messages lock").clone() }

    fn take_held(&self) -> Vec<Completion> { std::mem::take(&mut *self.held.lock().expect("held lock")) }
}

struct Harness {
    handler: MessageHandler,
    session: Arc<ChannelSession>,
    _outbound: UnboundedReceiver<OutboundFrame>,
}

impl Harness {
    fn open(hooks: MessageHooks, config: SessionConfig) -> Self {
        let (session, outbound) = ChannelSession::new(ConnectionId::new(1), config.clone());
        let mut handler = MessageHandler::new(hooks, config);
        let (completion, mut opened) = Completion::channel();
        handler.on_open(session.clone(), completion);
        assert_eq!(opened.try_outcome(), Some(Ok(())));
        Self {
            handler,
            session,
            _outbound: outbound,
        }
    }

    fn feed(&mut self, frame: Frame) -> CompletionFuture {
        let (completion, done) = Completion::channel();
        self.handler.on_frame(frame, completion);
        done
    }
}

#[fixture]
fn inbox() -> Inbox { Inbox::default() }

#[fixture]
fn small_limits() -> SessionConfig {
    let config = SessionConfig::default();
    config.set_max_text_message_size(4);
    config.set_max_binary_message_size(4);
    config
}

fn expect_failure(done: &mut CompletionFuture) -> ProtocolError {
    match done.try_outcome() {
        Some(Err(error)) => error,
        other => panic!("expected a failed completion, got {other:?}"),
    }
}

#[rstest]
#[case(Frame::ping("hello"))]
#[case(Frame::pong("hello"))]
fn control_frames_complete_immediately(inbox: Inbox, #[case] frame: Frame) {
    let mut harness = Harness::open(inbox.hooks(true), SessionConfig::default());
    let mut done = harness.feed(frame);
    assert_eq!(done.try_outcome(), Some(Ok(())));
    assert!(inbox.messages().is_empty());
}

#[rstest]
fn control_hook_observes_ping(inbox: Inbox) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let hooks = inbox.hooks(false).on_control(move |frame| {
        sink.lock().expect("seen lock").push(frame.opcode());
    });
    let mut harness = Harness::open(hooks, SessionConfig::default());
    let _ = harness.feed(Frame::ping("x"));
    assert_eq!(*seen.lock().expect("seen lock"), vec![OpCode::Ping]);
}

#[rstest]
fn single_frame_text_waits_for_application(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(true), SessionConfig::default());
    let mut done = harness.feed(Frame::text("Hello World"));

    assert_eq!(
        inbox.messages(),
        vec![AssembledMessage::Text("Hello World".into())]
    );
    assert!(!done.is_done());

    for completion in inbox.take_held() {
        completion.succeed();
    }
    assert_eq!(done.try_outcome(), Some(Ok(())));
}

#[rstest]
fn fragments_complete_before_message(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(true), SessionConfig::default());
    let mut first = harness.feed(Frame::new(OpCode::Text, false, "Hello"));
    let mut second = harness.feed(Frame::new(OpCode::Continuation, false, " "));
    assert_eq!(first.try_outcome(), Some(Ok(())));
    assert_eq!(second.try_outcome(), Some(Ok(())));
    assert!(inbox.messages().is_empty());

    let mut last = harness.feed(Frame::new(OpCode::Continuation, true, "World"));
    assert!(!last.is_done());
    assert_eq!(
        inbox.messages(),
        vec![AssembledMessage::Text("Hello World".into())]
    );
    for completion in inbox.take_held() {
        completion.succeed();
    }
    assert_eq!(last.try_outcome(), Some(Ok(())));
}

#[rstest]
fn split_code_point_is_reassembled(inbox: Inbox) {
    let bytes = SMILE.as_bytes();
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let mut frames = vec![
        harness.feed(Frame::new(OpCode::Text, false, Bytes::copy_from_slice(&bytes[..2]))),
        harness.feed(Frame::new(
            OpCode::Continuation,
            false,
            Bytes::copy_from_slice(&bytes[2..3]),
        )),
        harness.feed(Frame::new(
            OpCode::Continuation,
            true,
            Bytes::copy_from_slice(&bytes[3..]),
        )),
    ];
    for done in &mut frames {
        assert_eq!(done.try_outcome(), Some(Ok(())));
    }
    assert_eq!(inbox.messages(), vec![AssembledMessage::Text(SMILE.into())]);
}

#[rstest]
fn incomplete_code_point_fails_final_frame(inbox: Inbox) {
    let bytes = SMILE.as_bytes();
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let mut first = harness.feed(Frame::new(OpCode::Text, false, Bytes::copy_from_slice(&bytes[..2])));
    assert_eq!(first.try_outcome(), Some(Ok(())));

    let mut last = harness.feed(Frame::new(
        OpCode::Continuation,
        true,
        Bytes::copy_from_slice(&bytes[2..3]),
    ));
    let error = expect_failure(&mut last);
    assert!(matches!(error, ProtocolError::BadPayload { .. }));
    assert_eq!(error.close_code(), CloseCode::BadPayload);
    assert!(inbox.messages().is_empty());
}

#[rstest]
fn invalid_text_in_one_frame_is_rejected(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let mut done = harness.feed(Frame::new(OpCode::Text, true, &b"\x7F\xFF\xFF"[..]));
    assert!(matches!(expect_failure(&mut done), ProtocolError::BadPayload { .. }));
    assert!(inbox.messages().is_empty());
}

#[rstest]
fn invalid_text_fails_the_offending_fragment(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let mut first = harness.feed(Frame::new(OpCode::Text, false, &b"\x7F"[..]));
    assert_eq!(first.try_outcome(), Some(Ok(())));
    let mut second = harness.feed(Frame::new(OpCode::Continuation, false, &b"\xFF"[..]));
    assert!(matches!(expect_failure(&mut second), ProtocolError::BadPayload { .. }));
    assert_eq!(harness.handler.open_message(), None);
}

#[rstest]
fn demand_follows_frames_the_application_never_sees(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false).demanding(true), SessionConfig::default());
    assert!(harness.handler.is_demanding());

    let _ = harness.feed(Frame::ping("p"));
    assert_eq!(harness.session.demand_count(), 1);

    let _ = harness.feed(Frame::text("whole"));
    assert_eq!(harness.session.demand_count(), 1);

    let _ = harness.feed(Frame::new(OpCode::Text, false, "a"));
    let _ = harness.feed(Frame::new(OpCode::Continuation, false, "b"));
    assert_eq!(harness.session.demand_count(), 3);

    let _ = harness.feed(Frame::new(OpCode::Continuation, true, "c"));
    assert_eq!(harness.session.demand_count(), 3);
}

#[rstest]
fn demanding_can_be_enabled_after_open(inbox: Inbox) {
    let config = SessionConfig::default();
    let mut harness = Harness::open(inbox.hooks(false), config.clone());
    let _ = harness.feed(Frame::ping("before"));
    assert_eq!(harness.session.demand_count(), 0);

    harness.session.config().set_demanding(true);
    assert!(harness.handler.is_demanding());
    let _ = harness.feed(Frame::ping("after"));
    assert_eq!(harness.session.demand_count(), 1);

    harness.handler.set_demanding(false);
    let _ = harness.feed(Frame::ping("off again"));
    assert_eq!(harness.session.demand_count(), 1);
    assert!(!config.is_demanding());
}

#[rstest]
fn non_demanding_handler_requests_nothing(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let _ = harness.feed(Frame::ping("p"));
    let _ = harness.feed(Frame::new(OpCode::Binary, false, "a"));
    assert_eq!(harness.session.demand_count(), 0);
}

#[rstest]
#[case("test", true)]
#[case("Testing", false)]
fn single_frame_size_limit(inbox: Inbox, small_limits: SessionConfig, #[case] text: &str, #[case] accepted: bool) {
    let mut harness = Harness::open(inbox.hooks(false), small_limits);
    let mut done = harness.feed(Frame::text(text));
    if accepted {
        assert_eq!(done.try_outcome(), Some(Ok(())));
    } else {
        let error = expect_failure(&mut done);
        assert!(matches!(
            error,
            ProtocolError::MessageTooLarge {
                kind: MessageKind::Text,
                attempted: 7,
                ..
            }
        ));
        assert_eq!(error.close_code(), CloseCode::MessageTooLarge);
    }
}

#[rstest]
fn oversized_fragment_fails_and_discards(inbox: Inbox, small_limits: SessionConfig) {
    let mut harness = Harness::open(inbox.hooks(false), small_limits);
    let mut first = harness.feed(Frame::new(OpCode::Text, false, "123"));
    assert_eq!(first.try_outcome(), Some(Ok(())));
    let mut second = harness.feed(Frame::new(OpCode::Continuation, true, "456"));
    assert!(matches!(
        expect_failure(&mut second),
        ProtocolError::MessageTooLarge { attempted: 6, .. }
    ));
    assert_eq!(harness.handler.open_message(), None);
    assert!(inbox.messages().is_empty());

    let mut next = harness.feed(Frame::text("ok"));
    assert_eq!(next.try_outcome(), Some(Ok(())));
}

#[rstest]
fn limit_counts_encoded_bytes(inbox: Inbox, small_limits: SessionConfig) {
    let mut harness = Harness::open(inbox.hooks(false), small_limits);
    let mut whole = harness.feed(Frame::text(SMILE));
    assert_eq!(whole.try_outcome(), Some(Ok(())));

    let _ = harness.feed(Frame::new(OpCode::Text, false, SMILE));
    let mut second = harness.feed(Frame::new(OpCode::Continuation, true, SMILE));
    assert!(matches!(
        expect_failure(&mut second),
        ProtocolError::MessageTooLarge { attempted: 8, .. }
    ));
}

#[rstest]
fn binary_limit_is_independent(inbox: Inbox, small_limits: SessionConfig) {
    small_limits.set_max_text_message_size(0);
    let mut harness = Harness::open(inbox.hooks(false), small_limits);
    let mut text = harness.feed(Frame::text("a long text message"));
    assert_eq!(text.try_outcome(), Some(Ok(())));
    let mut binary = harness.feed(Frame::binary(&b"123456"[..]));
    assert!(matches!(
        expect_failure(&mut binary),
        ProtocolError::MessageTooLarge {
            kind: MessageKind::Binary,
            ..
        }
    ));
}

#[rstest]
fn limit_change_applies_to_next_frame(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let _ = harness.feed(Frame::new(OpCode::Binary, false, &b"12"[..]));
    harness.handler.set_max_binary_message_size(3);
    let mut done = harness.feed(Frame::new(OpCode::Continuation, true, &b"34"[..]));
    assert!(matches!(
        expect_failure(&mut done),
        ProtocolError::MessageTooLarge { attempted: 4, .. }
    ));
}

#[rstest]
#[case(Frame::text("hi"), MessageHooks::new().on_binary(|_, completion| completion.succeed()))]
#[case(Frame::binary(&b"hi"[..]), MessageHooks::new().on_text(|_, completion| completion.succeed()))]
fn unhandled_kind_is_bad_payload(#[case] frame: Frame, #[case] hooks: MessageHooks) {
    let mut harness = Harness::open(hooks, SessionConfig::default());
    let mut done = harness.feed(frame);
    assert!(matches!(expect_failure(&mut done), ProtocolError::BadPayload { .. }));
}

#[rstest]
fn continuation_without_message_is_protocol_error(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let mut done = harness.feed(Frame::new(OpCode::Continuation, true, "x"));
    let error = expect_failure(&mut done);
    assert!(matches!(error, ProtocolError::Protocol { .. }));
    assert_eq!(error.close_code(), CloseCode::Protocol);
}

#[rstest]
fn new_message_while_open_is_protocol_error(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let _ = harness.feed(Frame::new(OpCode::Text, false, "a"));
    let mut done = harness.feed(Frame::new(OpCode::Binary, true, "b"));
    assert!(matches!(expect_failure(&mut done), ProtocolError::Protocol { .. }));
    assert_eq!(harness.handler.open_message(), None);
}

#[rstest]
fn control_frames_may_interleave_fragments(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let _ = harness.feed(Frame::new(OpCode::Text, false, "Hel"));
    let mut ping = harness.feed(Frame::ping(""));
    assert_eq!(ping.try_outcome(), Some(Ok(())));
    assert_eq!(harness.handler.open_message(), Some(MessageKind::Text));
    let _ = harness.feed(Frame::new(OpCode::Continuation, true, "lo"));
    assert_eq!(inbox.messages(), vec![AssembledMessage::Text("Hello".into())]);
}

#[rstest]
fn data_after_close_is_rejected(inbox: Inbox) {
    let mut harness = Harness::open(inbox.hooks(false), SessionConfig::default());
    let _ = harness.feed(Frame::new(OpCode::Text, false, "partial"));
    let mut close = harness.feed(Frame::close(CloseCode::Normal, "bye"));
    assert_eq!(close.try_outcome(), Some(Ok(())));
    assert_eq!(harness.handler.open_message(), None);

    let mut late = harness.feed(Frame::text("late"));
    assert!(matches!(expect_failure(&mut late), ProtocolError::Protocol { .. }));
    assert!(inbox.messages().is_empty());
}

#[rstest]
fn application_failure_is_mirrored() {
    let hooks = MessageHooks::new().on_text(|_, completion| {
        completion.fail(ProtocolError::Application("rejected".into()));
    });
    let mut harness = Harness::open(hooks, SessionConfig::default());
    let mut done = harness.feed(Frame::text("hi"));
    assert_eq!(
        done.try_outcome(),
        Some(Err(ProtocolError::Application("rejected".into())))
    );
}

#[rstest]
fn dropped_application_completion_is_cancelled() {
    let hooks = MessageHooks::new().on_binary(|_, completion| drop(completion));
    let mut harness = Harness::open(hooks, SessionConfig::default());
    let mut done = harness.feed(Frame::binary(&b"x"[..]));
    assert_eq!(done.try_outcome(), Some(Err(ProtocolError::Cancelled)));
}

#[rstest]
fn open_hook_can_adjust_session(inbox: Inbox) {
    let hooks = inbox.hooks(false).on_open(|session| {
        session.set_idle_timeout(Duration::from_secs(7200));
    });
    let harness = Harness::open(hooks, SessionConfig::default());
    assert_eq!(harness.session.idle_timeout(), Duration::from_secs(7200));
    assert!(harness.handler.session().is_some());
}

#[rstest]
fn lifecycle_hooks_are_forwarded(inbox: Inbox) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let on_error = Arc::clone(&events);
    let on_closed = Arc::clone(&events);
    let hooks = inbox
        .hooks(false)
        .on_error(move |error| {
            on_error.lock().expect("events lock").push(error.kind_label().to_owned());
        })
        .on_closed(move |code| {
            on_closed.lock().expect("events lock").push(code.to_string());
        });
    let mut harness = Harness::open(hooks, SessionConfig::default());
    let _ = harness.feed(Frame::new(OpCode::Text, false, "a"));
    harness.handler.on_error(&ProtocolError::Cancelled);
    assert_eq!(harness.handler.open_message(), None);
    harness.handler.on_closed(CloseCode::GoingAway);
    assert_eq!(events.lock().expect("events lock").len(), 2);
}

#[test]
fn send_before_open_fails() {
    let handler = MessageHandler::new(MessageHooks::new(), SessionConfig::default());
    let (completion, mut done) = Completion::channel();
    handler.send_text(["hi"], completion, false);
    assert!(matches!(done.try_outcome(), Some(Err(ProtocolError::Transport(_)))));
}

#[rstest]
fn send_text_uses_opened_session(inbox: Inbox) {
    let config = SessionConfig::default();
    let (session, mut outbound) = ChannelSession::new(ConnectionId::new(2), config.clone());
    let mut handler = MessageHandler::new(inbox.hooks(false), config);
    handler.on_open(session, Completion::noop());
    handler.send_binary([&b"ab"[..], &b"cd"[..]], Completion::noop(), false);
    let frames: Vec<_> = std::iter::from_fn(|| outbound.try_recv().ok())
        .map(|queued| (queued.frame.opcode(), queued.frame.is_fin()))
        .collect();
    assert_eq!(
        frames,
        vec![(OpCode::Binary, false), (OpCode::Continuation, true)]
    );

    handler.send_text_message("whole", Completion::noop());
    let queued = outbound.try_recv().expect("text frame");
    assert_eq!(queued.frame, Frame::text("whole"));
}

proptest! {
    #[test]
    fn any_fragmentation_of_valid_text_is_delivered_whole(
        text in "\\PC{0,40}",
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..5),
    ) {
        let bytes = text.as_bytes();
        let mut points: Vec<usize> = cuts.iter().map(|cut| cut.index(bytes.len() + 1)).collect();
        points.sort_unstable();
        let mut chunks = Vec::new();
        let mut start = 0;
        for point in points {
            chunks.push(Bytes::copy_from_slice(&bytes[start..point]));
            start = point;
        }
        chunks.push(Bytes::copy_from_slice(&bytes[start..]));

        let inbox = Inbox::default();
        let config = SessionConfig::default();
        config.set_max_text_message_size(0);
        let mut harness = Harness::open(inbox.hooks(false), config);
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let opcode = if index == 0 { OpCode::Text } else { OpCode::Continuation };
            let mut done = harness.feed(Frame::new(opcode, index == last, chunk));
            prop_assert_eq!(done.try_outcome(), Some(Ok(())));
        }
        prop_assert_eq!(inbox.messages(), vec![AssembledMessage::Text(text.clone())]);
    }
}
