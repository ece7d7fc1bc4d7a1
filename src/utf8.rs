//! Incremental UTF-8 validation across fragment boundaries.
//!
//! Text messages may be split at arbitrary byte offsets, including inside a
//! multi-byte code point. [`Utf8Validator`] carries the partial sequence
//! state between calls: how many continuation bytes are still owed and the
//! byte range the next one must fall in (which rules out overlong forms,
//! surrogates and code points above U+10FFFF).

use thiserror::Error;

/// Reasons a byte stream fails UTF-8 validation.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Utf8Error {
    /// A byte cannot appear at this position.
    #[error("invalid UTF-8 byte at message offset {offset}")]
    Invalid {
        /// Offset of the offending byte from the start of the message.
        offset: usize,
    },
    /// The message ended inside a multi-byte sequence.
    #[error("message ends with a truncated UTF-8 sequence")]
    Incomplete,
}

const CONT_LOW: u8 = 0x80;
const CONT_HIGH: u8 = 0xBF;

/// Validator state threaded through successive [`feed`](Self::feed) calls.
///
/// # Examples
///
/// ```
/// use wiresocket::utf8::Utf8Validator;
///
/// let bytes = "𠮟".as_bytes();
/// let mut validator = Utf8Validator::new();
/// validator.feed(&bytes[..2]).expect("valid prefix");
/// assert!(!validator.is_complete());
/// validator.feed(&bytes[2..]).expect("valid suffix");
/// validator.finish().expect("complete");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Utf8Validator {
    pending: u8,
    lower: u8,
    upper: u8,
    consumed: usize,
}

impl Default for Utf8Validator {
    fn default() -> Self { Self::new() }
}

impl Utf8Validator {
    /// Fresh validator positioned at a code point boundary.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: 0,
            lower: CONT_LOW,
            upper: CONT_HIGH,
            consumed: 0,
        }
    }

    /// Returns `true` when no multi-byte sequence is open.
    #[must_use]
    pub const fn is_complete(&self) -> bool { self.pending == 0 }

    /// Validate the next chunk of the message.
    ///
    /// # Errors
    ///
    /// Returns [`Utf8Error::Invalid`] as soon as a byte is found that cannot
    /// be part of valid UTF-8 given everything fed so far. A chunk ending
    /// mid-sequence is not an error; call [`finish`](Self::finish) at the end
    /// of the message to reject a truncated tail.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), Utf8Error> {
        let mut index = 0;
        while self.pending > 0 && index < bytes.len() {
            self.step(bytes[index], index)?;
            index += 1;
        }
        let rest = &bytes[index..];
        match std::str::from_utf8(rest) {
            Ok(_) => {}
            Err(error) => {
                let valid = error.valid_up_to();
                if error.error_len().is_some() {
                    return Err(Utf8Error::Invalid {
                        offset: self.consumed + index + valid,
                    });
                }
                // Incomplete tail: remember it for the next chunk.
                for (offset, byte) in rest[valid..].iter().enumerate() {
                    self.step(*byte, index + valid + offset)?;
                }
            }
        }
        self.consumed += bytes.len();
        Ok(())
    }

    /// Check that the message ended on a code point boundary and reset.
    ///
    /// # Errors
    ///
    /// Returns [`Utf8Error::Incomplete`] if a multi-byte sequence is still
    /// open.
    pub fn finish(&mut self) -> Result<(), Utf8Error> {
        let complete = self.is_complete();
        self.reset();
        if complete {
            Ok(())
        } else {
            Err(Utf8Error::Incomplete)
        }
    }

    /// Forget any partial state.
    pub fn reset(&mut self) { *self = Self::new(); }

    fn step(&mut self, byte: u8, index: usize) -> Result<(), Utf8Error> {
        if self.pending > 0 {
            if byte < self.lower || byte > self.upper {
                return Err(self.invalid(index));
            }
            self.pending -= 1;
            self.lower = CONT_LOW;
            self.upper = CONT_HIGH;
            return Ok(());
        }
        let (pending, lower, upper) = match byte {
            0x00..=0x7F => return Ok(()),
            0xC2..=0xDF => (1, CONT_LOW, CONT_HIGH),
            0xE0 => (2, 0xA0, CONT_HIGH),
            0xE1..=0xEC | 0xEE..=0xEF => (2, CONT_LOW, CONT_HIGH),
            0xED => (2, CONT_LOW, 0x9F),
            0xF0 => (3, 0x90, CONT_HIGH),
            0xF1..=0xF3 => (3, CONT_LOW, CONT_HIGH),
            0xF4 => (3, CONT_LOW, 0x8F),
            _ => return Err(self.invalid(index)),
        };
        self.pending = pending;
        self.lower = lower;
        self.upper = upper;
        Ok(())
    }

    const fn invalid(&self, index: usize) -> Utf8Error {
        Utf8Error::Invalid {
            offset: self.consumed + index,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::{Utf8Error, Utf8Validator};

    const FOUR_BYTE: &str = "\u{20B9F}";

    fn validate_chunks(chunks: &[&[u8]]) -> Result<(), Utf8Error> {
        let mut validator = Utf8Validator::new();
        for chunk in chunks {
            validator.feed(chunk)?;
        }
        validator.finish()
    }

    #[rstest]
    #[case(&[2, 1, 1])]
    #[case(&[1, 3])]
    #[case(&[3, 1])]
    #[case(&[1, 1, 2])]
    fn four_byte_code_point_survives_any_split(#[case] sizes: &[usize]) {
        let bytes = FOUR_BYTE.as_bytes();
        let mut chunks = Vec::new();
        let mut start = 0;
        for size in sizes {
            chunks.push(&bytes[start..start + size]);
            start += size;
        }
        assert_eq!(validate_chunks(&chunks), Ok(()));
    }

    #[test]
    fn truncated_tail_is_incomplete() {
        let bytes = FOUR_BYTE.as_bytes();
        assert_eq!(
            validate_chunks(&[&bytes[..2], &bytes[2..3]]),
            Err(Utf8Error::Incomplete)
        );
    }

    #[test]
    fn invalid_byte_reports_message_offset() {
        let mut validator = Utf8Validator::new();
        validator.feed(b"\x7F").expect("ascii");
        assert_eq!(
            validator.feed(b"\xFF\xFF"),
            Err(Utf8Error::Invalid { offset: 1 })
        );
    }

    #[rstest]
    #[case::overlong(&[0xE0, 0x80, 0x80])]
    #[case::surrogate(&[0xED, 0xA0, 0x80])]
    #[case::above_max(&[0xF4, 0x90, 0x80, 0x80])]
    #[case::stray_continuation(&[0x80])]
    fn split_invalid_sequences_are_rejected(#[case] bytes: &[u8]) {
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert!(matches!(
            validate_chunks(&chunks),
            Err(Utf8Error::Invalid { .. })
        ));
    }

    #[test]
    fn finish_resets_for_next_message() {
        let mut validator = Utf8Validator::new();
        validator.feed(&FOUR_BYTE.as_bytes()[..1]).expect("lead byte");
        assert!(validator.finish().is_err());
        assert!(validator.is_complete());
        validator.feed(b"ok").expect("ascii");
    }

    proptest! {
        #[test]
        fn valid_text_split_anywhere_validates(text in "\\PC{0,32}", cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..4)) {
            let bytes = text.as_bytes();
            let mut points: Vec<usize> = cuts.iter().map(|cut| cut.index(bytes.len() + 1)).collect();
            points.sort_unstable();
            let mut chunks = Vec::new();
            let mut start = 0;
            for point in points {
                chunks.push(&bytes[start..point]);
                start = point;
            }
            chunks.push(&bytes[start..]);
            prop_assert_eq!(validate_chunks(&chunks), Ok(()));
        }

        #[test]
        fn chunked_result_matches_std(bytes in prop::collection::vec(any::<u8>(), 0..24), chunk in 1usize..5) {
            let chunks: Vec<&[u8]> = bytes.chunks(chunk).collect();
            prop_assert_eq!(
                validate_chunks(&chunks).is_ok(),
                std::str::from_utf8(&bytes).is_ok()
            );
        }
    }
}
