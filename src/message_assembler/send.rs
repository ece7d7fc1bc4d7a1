//! Outbound messages split across frames.
//!
//! The first frame carries the message opcode, later frames are
//! CONTINUATION, and only the last has FIN set. The caller's completion is
//! split across the frames and resolves once every frame has been written,
//! or with the first failure.

use bytes::Bytes;

use super::MessageKind;
use crate::{
    completion::Completion,
    frame::{Frame, OpCode},
    session::CoreSession,
};

/// Send a text message with one frame per chunk.
///
/// An empty chunk list sends a single empty final frame.
///
/// # Examples
///
/// ```
/// use wiresocket::{
///     completion::Completion,
///     config::SessionConfig,
///     frame::OpCode,
///     message_assembler::send_text,
///     session::{ChannelSession, ConnectionId},
/// };
///
/// let (session, mut rx) = ChannelSession::new(ConnectionId::new(1), SessionConfig::default());
/// send_text(session.as_ref(), ["Hello", " ", "World"], Completion::noop(), false);
/// let opcodes: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
///     .map(|queued| (queued.frame.opcode(), queued.frame.is_fin()))
///     .collect();
/// assert_eq!(
///     opcodes,
///     [
///         (OpCode::Text, false),
///         (OpCode::Continuation, false),
///         (OpCode::Continuation, true),
///     ]
/// );
/// ```
pub fn send_text<I, S>(session: &dyn CoreSession, chunks: I, completion: Completion, batch: bool)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let chunks: Vec<Bytes> = chunks
        .into_iter()
        .map(|chunk| Bytes::from(chunk.into()))
        .collect();
    send_chunks(session, MessageKind::Text, chunks, completion, batch);
}

/// Send a binary message with one frame per chunk.
pub fn send_binary<I, B>(session: &dyn CoreSession, chunks: I, completion: Completion, batch: bool)
where
    I: IntoIterator<Item = B>,
    B: Into<Bytes>,
{
    let chunks: Vec<Bytes> = chunks.into_iter().map(Into::into).collect();
    send_chunks(session, MessageKind::Binary, chunks, completion, batch);
}

fn send_chunks(
    session: &dyn CoreSession,
    kind: MessageKind,
    mut chunks: Vec<Bytes>,
    completion: Completion,
    batch: bool,
) {
    if chunks.is_empty() {
        chunks.push(Bytes::new());
    }
    let last = chunks.len() - 1;
    let parts = completion.split(chunks.len());
    for (index, (chunk, part)) in chunks.into_iter().zip(parts).enumerate() {
        let opcode = if index == 0 {
            kind.opcode()
        } else {
            OpCode::Continuation
        };
        let fin = index == last;
        session.send_frame(Frame::new(opcode, fin, chunk), part, batch || !fin);
    }
}
