// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License:
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

//! `capnwire` is the runtime core of a Cap'n Proto message implementation: the
//! segment/pointer data model, and the reader/builder machinery that navigates
//! and mutates it without copying.
//!
//! This crate does not include a schema compiler, an RPC system, or stream
//! framing. It is meant to be the foundation those layers are built on top of:
//! a code generator emits typed accessor structs that hold a
//! [`private::layout::StructReader`]/[`private::layout::StructBuilder`] and
//! call into it; an RPC layer stores capability handles in a message's
//! [`capability::CapTable`]; a serializer reads
//! [`message::Builder::get_segments_for_output`] and writes the segment-table
//! framing Cap'n Proto expects on the wire.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(not(feature = "alloc"))]
compile_error!("the \"alloc\" feature is currently required");

pub mod any_pointer;
pub mod capability;
pub mod data;
pub mod message;
pub mod primitive_list;
pub mod private;
pub mod struct_list;
pub mod text;
pub mod traits;

use core::fmt;

/// An atomic, 8-byte-aligned unit of the Cap'n Proto wire format.
///
/// `Word` has no meaningful fields of its own; its only purpose is to force
/// 8-byte alignment on buffers that are going to be reinterpreted as raw wire
/// bytes, so that a `&[Word]` can be safely transmuted to `&[u8]` and back.
#[derive(Clone, Copy)]
#[repr(align(8))]
pub struct Word([u8; 8]);

impl Word {
    pub const fn zero() -> Word {
        Word([0; 8])
    }

    #[cfg(feature = "alloc")]
    pub fn allocate_zeroed_vec(size: usize) -> alloc::vec::Vec<Word> {
        alloc::vec![Word::zero(); size]
    }

    /// Reinterprets a slice of words as a slice of bytes. Safe because `Word`
    /// has no padding and no invalid bit patterns.
    pub fn words_to_bytes(words: &[Word]) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts(
                words.as_ptr() as *const u8,
                words.len() * private::units::BYTES_PER_WORD,
            )
        }
    }

    pub fn words_to_bytes_mut(words: &mut [Word]) -> &mut [u8] {
        unsafe {
            core::slice::from_raw_parts_mut(
                words.as_mut_ptr() as *mut u8,
                words.len() * private::units::BYTES_PER_WORD,
            )
        }
    }

    /// Reinterprets a byte slice as a slice of words. Panics if `bytes` is not
    /// word-aligned length, or (unless the `unaligned` feature is enabled) not
    /// 8-byte aligned in memory.
    pub fn bytes_to_words(bytes: &[u8]) -> &[Word] {
        assert_eq!(bytes.len() % private::units::BYTES_PER_WORD, 0);
        #[cfg(not(feature = "unaligned"))]
        assert_eq!(bytes.as_ptr() as usize % private::units::BYTES_PER_WORD, 0);
        unsafe {
            core::slice::from_raw_parts(
                bytes.as_ptr() as *const Word,
                bytes.len() / private::units::BYTES_PER_WORD,
            )
        }
    }
}

/// Running tally of the words and capabilities reachable from some message
/// object: the data/pointer words of every struct and list transitively
/// referenced, plus a count of the distinct capabilities among them.
/// [`private::layout::PointerReader::target_size`] computes one; a
/// serializer uses it to pre-size a destination buffer before copying a
/// message into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MessageSize {
    pub word_count: u64,
    pub cap_count: u32,
}

impl MessageSize {
    pub fn plus_eq(&mut self, other: MessageSize) {
        self.word_count += other.word_count;
        self.cap_count += other.cap_count;
    }
}

/// The segments that make up a built message, ready to be handed to an
/// external serializer. Most messages fit in a single segment; `MultiSegment`
/// is reached for only once a message grows past its first segment's
/// capacity.
pub enum OutputSegments<'a> {
    SingleSegment([&'a [u8]; 1]),
    MultiSegment(alloc::vec::Vec<&'a [u8]>),
}

impl<'a> core::ops::Deref for OutputSegments<'a> {
    type Target = [&'a [u8]];
    fn deref(&self) -> &[&'a [u8]] {
        match self {
            OutputSegments::SingleSegment(s) => s,
            OutputSegments::MultiSegment(v) => v,
        }
    }
}

/// The kind of failure reported by a `capnwire` operation.
///
/// `Failed` is a catch-all for internal-invariant violations that don't fit
/// one of the wire-format-specific kinds below (mirroring the
/// `Error::failed(description)` escape hatch of the upstream implementation
/// this crate is descended from).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Failed,
    SegmentOutOfRange,
    PointerIndexOutOfRange,
    ShortStruct,
    UpgradedListElement,
    MalformedPointer,
    OversizedList,
    TraversalLimitExceeded,
    IndexOutOfRange,
    UnsupportedOtherPointer,
    /// Reserved. A builder's pointer-writing paths (`set_struct`, `set_list`,
    /// `copy_from`, ...) always deep-copy a pointer target that lives in a
    /// different message rather than writing a raw cross-message offset, so
    /// nothing in this crate constructs this variant today. Kept for a
    /// future caller that wants to forbid the copy and fail instead.
    CrossMessagePointer,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Failed => "operation failed",
            ErrorKind::SegmentOutOfRange => "segment index or word offset out of range",
            ErrorKind::PointerIndexOutOfRange => "pointer slot index out of range",
            ErrorKind::ShortStruct => "write to a field beyond a short struct's allocated size",
            ErrorKind::UpgradedListElement => {
                "field access on an upgraded list element outside of field 0"
            }
            ErrorKind::MalformedPointer => "malformed pointer",
            ErrorKind::OversizedList => "list element count or word count overflow",
            ErrorKind::TraversalLimitExceeded => "read traversal limit exceeded",
            ErrorKind::IndexOutOfRange => "list index out of range",
            ErrorKind::UnsupportedOtherPointer => "unsupported kind of \"other\" pointer",
            ErrorKind::CrossMessagePointer => "pointer target lies in a different message",
        };
        f.write_str(s)
    }
}

/// The error type returned by fallible `capnwire` operations.
#[derive(Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    description: alloc::string::String,
}

impl Error {
    /// Constructs an `ErrorKind::Failed` error, for internal-invariant
    /// violations that have no more specific kind.
    pub fn failed(description: alloc::string::String) -> Error {
        Error {
            kind: ErrorKind::Failed,
            description,
        }
    }

    pub(crate) fn from_kind(kind: ErrorKind, description: impl Into<alloc::string::String>) -> Error {
        Error {
            kind,
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
