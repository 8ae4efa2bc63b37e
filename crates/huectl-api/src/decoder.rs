//! Incremental decoder for top-level JSON arrays.
//!
//! The bridge event stream delivers JSON arrays in arbitrary chunks. The
//! decoder is fed those chunks as they arrive and yields each array element
//! as soon as it closes, without waiting for the rest of the array. Once an
//! array closes the decoder goes back to waiting for the next `[`, so
//! back-to-back arrays decode on the same instance.
//!
//! Scanning is byte-wise. Every structural character is ASCII, so a
//! multi-byte UTF-8 sequence split across chunks is simply buffered until
//! the element completes.
//!
//! After an error the decoder refuses further input until [`ArrayDecoder::reset`].

use serde_json::Value;
use thiserror::Error;

/// Upper bound on a single buffered element.
pub const MAX_ELEMENT_BYTES: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected '[' to open an array, found {found:?}")]
    ExpectedArray { found: char },

    #[error("unexpected {found:?} between array elements")]
    UnexpectedToken { found: char },

    #[error("malformed array element: {0}")]
    Element(#[from] serde_json::Error),

    #[error("array element exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("array element is not an event object")]
    NotAnEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for `[`.
    BeforeArray,
    /// Just after `[` (`first`) or `,`.
    BeforeElement { first: bool },
    /// Buffering an element.
    InElement,
    /// Element done; expecting `,` or `]`.
    AfterElement,
    /// Poisoned until reset.
    Failed,
}

/// Streaming splitter for a sequence of top-level JSON arrays.
#[derive(Debug)]
pub struct ArrayDecoder {
    state: State,
    element: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Default for ArrayDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayDecoder {
    pub fn new() -> Self {
        Self {
            state: State::BeforeArray,
            element: Vec::new(),
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Discard any partial element and wait for a fresh array.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// `true` when no array is open and nothing is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::BeforeArray
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    /// Feed a fragment; returns every element that closed within it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Value, DecodeError>> {
        let mut out = Vec::new();
        for &b in bytes {
            if self.state == State::Failed {
                break;
            }
            self.step(b, &mut out);
        }
        out
    }

    fn step(&mut self, b: u8, out: &mut Vec<Result<Value, DecodeError>>) {
        match self.state {
            State::Failed => {}
            State::BeforeArray => match b {
                b'[' => self.state = State::BeforeElement { first: true },
                b if b.is_ascii_whitespace() => {}
                other => self.fail(
                    DecodeError::ExpectedArray {
                        found: char::from(other),
                    },
                    out,
                ),
            },
            State::BeforeElement { first } => match b {
                b if b.is_ascii_whitespace() => {}
                b']' if first => self.state = State::BeforeArray,
                b',' | b']' => self.fail(
                    DecodeError::UnexpectedToken {
                        found: char::from(b),
                    },
                    out,
                ),
                _ => {
                    self.state = State::InElement;
                    self.element_byte(b, out);
                }
            },
            State::InElement => self.element_byte(b, out),
            State::AfterElement => match b {
                b if b.is_ascii_whitespace() => {}
                b',' => self.state = State::BeforeElement { first: false },
                b']' => self.state = State::BeforeArray,
                other => self.fail(
                    DecodeError::UnexpectedToken {
                        found: char::from(other),
                    },
                    out,
                ),
            },
        }
    }

    fn element_byte(&mut self, b: u8, out: &mut Vec<Result<Value, DecodeError>>) {
        if self.element.len() >= MAX_ELEMENT_BYTES {
            self.fail(
                DecodeError::TooLarge {
                    limit: MAX_ELEMENT_BYTES,
                },
                out,
            );
            return;
        }

        if self.in_string {
            self.element.push(b);
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
                if self.depth == 0 {
                    self.finish(State::AfterElement, out);
                }
            }
            return;
        }

        match b {
            b'"' => {
                self.element.push(b);
                self.in_string = true;
            }
            b'{' | b'[' => {
                self.element.push(b);
                self.depth += 1;
            }
            b'}' | b']' if self.depth > 0 => {
                self.element.push(b);
                self.depth -= 1;
                if self.depth == 0 {
                    self.finish(State::AfterElement, out);
                }
            }
            // Bare scalars (numbers, literals) end at a delimiter.
            b']' => self.finish(State::BeforeArray, out),
            b',' if self.depth == 0 => self.finish(State::BeforeElement { first: false }, out),
            b if self.depth == 0 && b.is_ascii_whitespace() => {
                self.finish(State::AfterElement, out);
            }
            _ => self.element.push(b),
        }
    }

    fn finish(&mut self, next: State, out: &mut Vec<Result<Value, DecodeError>>) {
        let bytes = std::mem::take(&mut self.element);
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                out.push(Ok(value));
                self.state = next;
            }
            Err(e) => self.fail(DecodeError::Element(e), out),
        }
    }

    fn fail(&mut self, err: DecodeError, out: &mut Vec<Result<Value, DecodeError>>) {
        self.element.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.state = State::Failed;
        out.push(Err(err));
    }
}
