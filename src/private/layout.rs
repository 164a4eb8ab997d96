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

//! The pointer codec and the struct/list reader and builder types built on
//! top of it. Everything in this module operates directly on segment bytes;
//! [`crate::any_pointer`], [`crate::primitive_list`], [`crate::struct_list`],
//! [`crate::text`] and [`crate::data`] are thin typed wrappers around it.

use alloc::rc::Rc;
use core::marker::PhantomData;

use crate::capability::CapabilityHandle;
use crate::private::arena::{BuilderArena, ReaderArena};
use crate::private::endian::WireValue;
use crate::private::units::{bits_to_words_round_up, BYTES_PER_WORD};
use crate::{Error, ErrorKind, MessageSize, Result, Word};

#[inline]
unsafe fn read_raw(ptr: *const u8) -> u64 {
    unsafe { core::ptr::read_unaligned(ptr as *const WireValue<u64>) }.get()
}

#[inline]
unsafe fn write_raw(ptr: *mut u8, value: u64) {
    unsafe { core::ptr::write_unaligned(ptr as *mut WireValue<u64>, WireValue::new(value)) };
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WirePointerKind {
    Struct,
    List,
    Far,
    Other,
}

impl WirePointerKind {
    fn from_bits(raw: u64) -> Self {
        match raw & 3 {
            0 => WirePointerKind::Struct,
            1 => WirePointerKind::List,
            2 => WirePointerKind::Far,
            _ => WirePointerKind::Other,
        }
    }
}

fn decode_offset(low: u32) -> i32 {
    (low as i32) >> 2
}

fn encode_offset_and_kind(offset: i32, kind: WirePointerKind) -> Result<u32> {
    const MIN: i32 = -(1 << 29);
    const MAX: i32 = (1 << 29) - 1;
    if !(MIN..=MAX).contains(&offset) {
        return Err(Error::from_kind(
            ErrorKind::Failed,
            "pointer offset out of encodable range",
        ));
    }
    Ok(((offset as u32) << 2) | (kind as u32 & 3))
}

fn struct_data_words(high: u32) -> u16 {
    (high & 0xffff) as u16
}

fn struct_pointer_words(high: u32) -> u16 {
    (high >> 16) as u16
}

fn struct_high(data_words: u16, pointer_words: u16) -> u32 {
    (data_words as u32) | ((pointer_words as u32) << 16)
}

fn list_element_size_tag(high: u32) -> u8 {
    (high & 0x7) as u8
}

fn list_element_count(high: u32) -> u32 {
    high >> 3
}

fn far_is_double(low: u32) -> bool {
    (low >> 2) & 1 != 0
}

fn far_pad_offset(low: u32) -> u32 {
    low >> 3
}

fn far_low(double: bool, pad_offset: u32) -> u32 {
    2 | ((double as u32) << 2) | (pad_offset << 3)
}

/// The element-size tag carried by a list pointer. Matches the wire values in
/// the Cap'n Proto encoding exactly, so it can be cast to/from `u8`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ElementSize {
    Void = 0,
    Bit = 1,
    Byte = 2,
    TwoBytes = 3,
    FourBytes = 4,
    EightBytes = 5,
    Pointer = 6,
    InlineComposite = 7,
}

impl ElementSize {
    fn from_wire(tag: u8) -> Result<ElementSize> {
        Ok(match tag {
            0 => ElementSize::Void,
            1 => ElementSize::Bit,
            2 => ElementSize::Byte,
            3 => ElementSize::TwoBytes,
            4 => ElementSize::FourBytes,
            5 => ElementSize::EightBytes,
            6 => ElementSize::Pointer,
            7 => ElementSize::InlineComposite,
            _ => {
                return Err(Error::from_kind(
                    ErrorKind::MalformedPointer,
                    "unrecognized list element size tag",
                ));
            }
        })
    }
}

fn data_bits_per_element(size: ElementSize) -> u32 {
    match size {
        ElementSize::Void => 0,
        ElementSize::Bit => 1,
        ElementSize::Byte => 8,
        ElementSize::TwoBytes => 16,
        ElementSize::FourBytes => 32,
        ElementSize::EightBytes => 64,
        ElementSize::Pointer => 64,
        ElementSize::InlineComposite => 0,
    }
}

/// The data-word and pointer-word counts declared for a struct, as carried by
/// a struct pointer or a composite list's tag word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StructSize {
    pub data: u16,
    pub pointers: u16,
}

impl StructSize {
    pub fn total_words(&self) -> u32 {
        self.data as u32 + self.pointers as u32
    }
}

/// A type that can occupy a struct's data section or a non-pointer list's
/// elements: read/written in wire (little-endian) byte order, with the same
/// bit-width used for both a struct field's index-based addressing and a
/// list's element-based addressing.
///
/// `bool` is handled separately ([`StructReader::get_bool_field`] and
/// friends), since it addresses individual bits rather than whole bytes.
pub trait PrimitiveElement: Copy + Default {
    const BITS: u32;
    const ELEMENT_SIZE: ElementSize;

    fn get_raw(bytes: &[u8]) -> Self;
    fn set_raw(bytes: &mut [u8], value: Self);
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

macro_rules! primitive_element_int {
    ($t:ty, $bits:expr, $size:expr) => {
        impl PrimitiveElement for $t {
            const BITS: u32 = $bits;
            const ELEMENT_SIZE: ElementSize = $size;

            fn get_raw(bytes: &[u8]) -> Self {
                let wire = unsafe {
                    core::ptr::read_unaligned(bytes.as_ptr() as *const WireValue<$t>)
                };
                wire.get()
            }

            fn set_raw(bytes: &mut [u8], value: Self) {
                let wire = WireValue::new(value);
                unsafe {
                    core::ptr::write_unaligned(bytes.as_mut_ptr() as *mut WireValue<$t>, wire)
                };
            }

            fn to_bits(self) -> u64 {
                self as u64
            }

            fn from_bits(bits: u64) -> Self {
                bits as $t
            }
        }
    };
}

primitive_element_int!(u8, 8, ElementSize::Byte);
primitive_element_int!(u16, 16, ElementSize::TwoBytes);
primitive_element_int!(u32, 32, ElementSize::FourBytes);
primitive_element_int!(u64, 64, ElementSize::EightBytes);
primitive_element_int!(i8, 8, ElementSize::Byte);
primitive_element_int!(i16, 16, ElementSize::TwoBytes);
primitive_element_int!(i32, 32, ElementSize::FourBytes);
primitive_element_int!(i64, 64, ElementSize::EightBytes);

impl PrimitiveElement for f32 {
    const BITS: u32 = 32;
    const ELEMENT_SIZE: ElementSize = ElementSize::FourBytes;

    fn get_raw(bytes: &[u8]) -> Self {
        f32::from_bits(u32::get_raw(bytes))
    }
    fn set_raw(bytes: &mut [u8], value: Self) {
        u32::set_raw(bytes, value.to_bits());
    }
    fn to_bits(self) -> u64 {
        self.to_bits() as u64
    }
    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl PrimitiveElement for f64 {
    const BITS: u32 = 64;
    const ELEMENT_SIZE: ElementSize = ElementSize::EightBytes;

    fn get_raw(bytes: &[u8]) -> Self {
        f64::from_bits(u64::get_raw(bytes))
    }
    fn set_raw(bytes: &mut [u8], value: Self) {
        u64::set_raw(bytes, value.to_bits());
    }
    fn to_bits(self) -> u64 {
        self.to_bits()
    }
    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

fn check_bounds(
    seg_start: *const u8,
    seg_len: u32,
    word_offset: i64,
    word_count: u64,
) -> Result<*const u8> {
    if word_offset < 0 {
        return Err(Error::from_kind(
            ErrorKind::SegmentOutOfRange,
            "pointer target offset is negative",
        ));
    }
    let end = (word_offset as u64).checked_add(word_count);
    let out_of_range = match end {
        Some(end) => end > seg_len as u64,
        None => true,
    };
    if out_of_range {
        return Err(Error::from_kind(
            ErrorKind::SegmentOutOfRange,
            "pointer target lies outside its segment",
        ));
    }
    Ok(unsafe { seg_start.add(word_offset as usize * BYTES_PER_WORD) })
}

/// Read-side access to a message's arena, with a zero-segment stand-in used
/// for values backed by flat default bytes rather than a live message.
#[derive(Clone, Copy)]
enum ArenaRef<'a> {
    Live(&'a dyn ReaderArena),
    Empty,
}

impl<'a> ArenaRef<'a> {
    fn get_segment(&self, id: u32) -> Result<(*const u8, u32)> {
        match self {
            ArenaRef::Live(a) => a.get_segment(id),
            ArenaRef::Empty => Err(Error::from_kind(
                ErrorKind::SegmentOutOfRange,
                "default-backed value has no segments",
            )),
        }
    }

    fn can_advance(&self, words: u64) -> Result<()> {
        match self {
            ArenaRef::Live(a) => a.read_limiter().can_advance(words),
            ArenaRef::Empty => Ok(()),
        }
    }

    fn extract_cap(&self, index: u32) -> Option<Rc<dyn CapabilityHandle>> {
        match self {
            ArenaRef::Live(a) => a.extract_cap(index),
            ArenaRef::Empty => None,
        }
    }
}

struct Resolved<'a> {
    arena: ArenaRef<'a>,
    segment_id: u32,
    seg_start: *const u8,
    seg_len: u32,
    target_offset: u32,
    kind: WirePointerKind,
    shape_raw: u64,
}

/// The write-side counterpart of [`Resolved`]: no bounds/traversal-limit
/// checks, since a builder's own already-allocated memory is trusted.
struct ResolvedBuilder {
    segment_id: u32,
    target_offset: u32,
    kind: WirePointerKind,
    shape_raw: u64,
}

/// A read-only handle to a pointer word: the root pointer, a struct's pointer
/// field, or a list element. Dereferencing it (`get_struct`/`get_list`/etc.)
/// follows near, far, and double-far indirections transparently.
#[derive(Clone, Copy)]
pub struct PointerReader<'a> {
    arena: ArenaRef<'a>,
    segment_id: u32,
    pointer: *const u8,
    nesting_limit: i32,
}

impl<'a> PointerReader<'a> {
    /// A reader over a null pointer with no backing message. Used when a
    /// builder's message is still completely empty.
    pub fn new_default() -> PointerReader<'static> {
        PointerReader {
            arena: ArenaRef::Empty,
            segment_id: 0,
            pointer: core::ptr::null(),
            nesting_limit: i32::MAX,
        }
    }

    pub fn get_root(
        arena: &'a dyn ReaderArena,
        segment_id: u32,
        location: *const u8,
        nesting_limit: i32,
    ) -> Result<PointerReader<'a>> {
        Ok(PointerReader {
            arena: ArenaRef::Live(arena),
            segment_id,
            pointer: location,
            nesting_limit,
        })
    }

    fn raw(&self) -> u64 {
        if self.pointer.is_null() {
            0
        } else {
            unsafe { read_raw(self.pointer) }
        }
    }

    pub fn is_null(&self) -> bool {
        self.raw() == 0
    }

    fn resolve(&self) -> Result<Option<Resolved<'a>>> {
        let raw = self.raw();
        if raw == 0 {
            return Ok(None);
        }
        let kind = WirePointerKind::from_bits(raw);
        if kind != WirePointerKind::Far {
            let (seg_start, seg_len) = self.arena.get_segment(self.segment_id)?;
            let pointer_word_index =
                (self.pointer as usize - seg_start as usize) / BYTES_PER_WORD;
            let obj_offset = pointer_word_index as i64 + 1 + decode_offset(raw as u32) as i64;
            check_bounds(seg_start, seg_len, obj_offset, 0)?;
            return Ok(Some(Resolved {
                arena: self.arena,
                segment_id: self.segment_id,
                seg_start,
                seg_len,
                target_offset: obj_offset as u32,
                kind,
                shape_raw: raw,
            }));
        }

        let low = raw as u32;
        let high = (raw >> 32) as u32;
        let double = far_is_double(low);
        let pad_offset = far_pad_offset(low);
        let target_segment = high;
        let (seg_start, seg_len) = self.arena.get_segment(target_segment)?;

        if !double {
            let pad_ptr = check_bounds(seg_start, seg_len, pad_offset as i64, 1)?;
            let pad_raw = unsafe { read_raw(pad_ptr) };
            let pad_kind = WirePointerKind::from_bits(pad_raw);
            if matches!(pad_kind, WirePointerKind::Far | WirePointerKind::Other) {
                return Err(Error::from_kind(
                    ErrorKind::MalformedPointer,
                    "far pointer landing pad is not a struct/list pointer",
                ));
            }
            let obj_offset = pad_offset as i64 + 1 + decode_offset(pad_raw as u32) as i64;
            check_bounds(seg_start, seg_len, obj_offset, 0)?;
            Ok(Some(Resolved {
                arena: self.arena,
                segment_id: target_segment,
                seg_start,
                seg_len,
                target_offset: obj_offset as u32,
                kind: pad_kind,
                shape_raw: pad_raw,
            }))
        } else {
            let pad0_ptr = check_bounds(seg_start, seg_len, pad_offset as i64, 2)?;
            let pad0_raw = unsafe { read_raw(pad0_ptr) };
            let pad1_ptr = unsafe { pad0_ptr.add(BYTES_PER_WORD) };
            let pad1_raw = unsafe { read_raw(pad1_ptr) };

            if WirePointerKind::from_bits(pad0_raw) != WirePointerKind::Far {
                return Err(Error::from_kind(
                    ErrorKind::MalformedPointer,
                    "double-far first landing pad is not itself a far pointer",
                ));
            }
            let pad0_low = pad0_raw as u32;
            if far_is_double(pad0_low) {
                return Err(Error::from_kind(
                    ErrorKind::MalformedPointer,
                    "double-far first landing pad must not be double",
                ));
            }
            let obj_segment = (pad0_raw >> 32) as u32;
            let obj_offset = far_pad_offset(pad0_low);
            let pad1_kind = WirePointerKind::from_bits(pad1_raw);
            if matches!(pad1_kind, WirePointerKind::Far | WirePointerKind::Other) {
                return Err(Error::from_kind(
                    ErrorKind::MalformedPointer,
                    "double-far shape word is not a struct/list pointer",
                ));
            }
            if decode_offset(pad1_raw as u32) != 0 {
                return Err(Error::from_kind(
                    ErrorKind::MalformedPointer,
                    "double-far shape word must carry a zero offset",
                ));
            }
            let (obj_seg_start, obj_seg_len) = self.arena.get_segment(obj_segment)?;
            check_bounds(obj_seg_start, obj_seg_len, obj_offset as i64, 0)?;
            Ok(Some(Resolved {
                arena: self.arena,
                segment_id: obj_segment,
                seg_start: obj_seg_start,
                seg_len: obj_seg_len,
                target_offset: obj_offset,
                kind: pad1_kind,
                shape_raw: pad1_raw,
            }))
        }
    }

    pub fn get_struct(&self, default: Option<&'a [Word]>) -> Result<StructReader<'a>> {
        let resolved = match self.resolve()? {
            None => return Ok(StructReader::from_default(default)),
            Some(r) => r,
        };
        if resolved.kind != WirePointerKind::Struct {
            return Err(Error::from_kind(
                ErrorKind::MalformedPointer,
                "expected a struct pointer",
            ));
        }
        if self.nesting_limit <= 0 {
            return Err(Error::from_kind(
                ErrorKind::Failed,
                "nesting limit exceeded",
            ));
        }
        let high = (resolved.shape_raw >> 32) as u32;
        let data_words = struct_data_words(high) as u32;
        let pointer_words = struct_pointer_words(high) as u32;
        check_bounds(
            resolved.seg_start,
            resolved.seg_len,
            resolved.target_offset as i64,
            data_words as u64 + pointer_words as u64,
        )?;
        self.arena.can_advance(data_words as u64 + pointer_words as u64)?;
        let data = unsafe {
            resolved
                .seg_start
                .add(resolved.target_offset as usize * BYTES_PER_WORD)
        };
        let pointers = unsafe { data.add(data_words as usize * BYTES_PER_WORD) };
        Ok(StructReader {
            arena: resolved.arena,
            segment_id: resolved.segment_id,
            data,
            pointers,
            data_size_bits: data_words * 64,
            pointer_count: pointer_words as u16,
            nesting_limit: self.nesting_limit - 1,
            upgraded_list_element: false,
        })
    }

    pub fn get_list(&self) -> Result<ListReader<'a>> {
        let resolved = match self.resolve()? {
            None => return Ok(ListReader::empty()),
            Some(r) => r,
        };
        if resolved.kind != WirePointerKind::List {
            return Err(Error::from_kind(
                ErrorKind::MalformedPointer,
                "expected a list pointer",
            ));
        }
        if self.nesting_limit <= 0 {
            return Err(Error::from_kind(
                ErrorKind::Failed,
                "nesting limit exceeded",
            ));
        }
        let high = (resolved.shape_raw >> 32) as u32;
        let size_tag = list_element_size_tag(high);
        let raw_count = list_element_count(high);

        if size_tag == ElementSize::InlineComposite as u8 {
            let tag_ptr = check_bounds(
                resolved.seg_start,
                resolved.seg_len,
                resolved.target_offset as i64,
                1,
            )?;
            let tag_raw = unsafe { read_raw(tag_ptr) };
            if WirePointerKind::from_bits(tag_raw) != WirePointerKind::Struct {
                return Err(Error::from_kind(
                    ErrorKind::MalformedPointer,
                    "composite list tag is not a struct pointer",
                ));
            }
            let element_count = (tag_raw as u32) >> 2;
            let thigh = (tag_raw >> 32) as u32;
            let data_words = struct_data_words(thigh) as u32;
            let pointer_words = struct_pointer_words(thigh) as u32;
            let words_per_element = data_words + pointer_words;
            let expected_words = element_count as u64 * words_per_element as u64;
            if expected_words != raw_count as u64 {
                return Err(Error::from_kind(
                    ErrorKind::OversizedList,
                    "composite list tag word count does not match its element shape",
                ));
            }
            check_bounds(
                resolved.seg_start,
                resolved.seg_len,
                resolved.target_offset as i64,
                1 + raw_count as u64,
            )?;
            self.arena.can_advance(1 + raw_count as u64)?;
            Ok(ListReader {
                arena: resolved.arena,
                segment_id: resolved.segment_id,
                ptr: unsafe { tag_ptr.add(BYTES_PER_WORD) },
                element_count,
                step_bits: words_per_element * 64,
                struct_data_size: data_words * 64,
                struct_pointer_count: pointer_words as u16,
                element_size: ElementSize::InlineComposite,
                nesting_limit: self.nesting_limit - 1,
            })
        } else {
            let element_size = ElementSize::from_wire(size_tag)?;
            let bits_per_element = data_bits_per_element(element_size);
            let total_words =
                bits_to_words_round_up(bits_per_element as u64 * raw_count as u64);
            check_bounds(
                resolved.seg_start,
                resolved.seg_len,
                resolved.target_offset as i64,
                total_words,
            )?;
            self.arena.can_advance(total_words)?;
            let ptr = unsafe {
                resolved
                    .seg_start
                    .add(resolved.target_offset as usize * BYTES_PER_WORD)
            };
            Ok(ListReader {
                arena: resolved.arena,
                segment_id: resolved.segment_id,
                ptr,
                element_count: raw_count,
                step_bits: bits_per_element,
                struct_data_size: 0,
                struct_pointer_count: 0,
                element_size,
                nesting_limit: self.nesting_limit - 1,
            })
        }
    }

    fn get_byte_list(&self, default: Option<&'a [u8]>, drop_trailing_nul: bool) -> Result<ListReader<'a>> {
        let resolved = match self.resolve()? {
            None => return Ok(ListReader::from_default_bytes(default.unwrap_or(&[]))),
            Some(r) => r,
        };
        if resolved.kind != WirePointerKind::List {
            return Err(Error::from_kind(
                ErrorKind::MalformedPointer,
                "expected a list pointer",
            ));
        }
        let high = (resolved.shape_raw >> 32) as u32;
        if list_element_size_tag(high) != ElementSize::Byte as u8 {
            return Err(Error::from_kind(
                ErrorKind::MalformedPointer,
                "expected a byte list",
            ));
        }
        let count = list_element_count(high);
        let total_words = bits_to_words_round_up(count as u64 * 8);
        check_bounds(
            resolved.seg_start,
            resolved.seg_len,
            resolved.target_offset as i64,
            total_words,
        )?;
        self.arena.can_advance(total_words)?;
        let ptr = unsafe {
            resolved
                .seg_start
                .add(resolved.target_offset as usize * BYTES_PER_WORD)
        };
        // Text is stored on the wire with a trailing NUL included in the
        // element count; strip it here so `ListReader::as_bytes` returns
        // exactly the string content. Data has no such terminator.
        let visible_count = if drop_trailing_nul {
            count.saturating_sub(1)
        } else {
            count
        };
        Ok(ListReader {
            arena: resolved.arena,
            segment_id: resolved.segment_id,
            ptr,
            element_count: visible_count,
            step_bits: 8,
            struct_data_size: 0,
            struct_pointer_count: 0,
            element_size: ElementSize::Byte,
            nesting_limit: self.nesting_limit - 1,
        })
    }

    /// `default` is the NUL-excluded default string bytes, if any.
    pub fn get_text(&self, default: Option<&'a [u8]>) -> Result<ListReader<'a>> {
        self.get_byte_list(default, true)
    }

    pub fn get_data(&self, default: Option<&'a [u8]>) -> Result<ListReader<'a>> {
        self.get_byte_list(default, false)
    }

    pub fn get_capability(&self) -> Result<Option<Rc<dyn CapabilityHandle>>> {
        let raw = self.raw();
        if raw == 0 {
            return Ok(None);
        }
        if WirePointerKind::from_bits(raw) != WirePointerKind::Other {
            return Err(Error::from_kind(
                ErrorKind::MalformedPointer,
                "expected a capability pointer",
            ));
        }
        if ((raw as u32) >> 2) != 0 {
            return Err(Error::from_kind(
                ErrorKind::UnsupportedOtherPointer,
                "unrecognized \"other\" pointer subtype",
            ));
        }
        let index = (raw >> 32) as u32;
        Ok(self.arena.extract_cap(index))
    }

    /// Total size of whatever this pointer refers to, recursing through
    /// struct and list contents. Null pointers size to zero; capability
    /// pointers contribute no words but one capability.
    pub fn target_size(&self) -> Result<MessageSize> {
        let raw = self.raw();
        if raw == 0 {
            return Ok(MessageSize::default());
        }
        if WirePointerKind::from_bits(raw) == WirePointerKind::Other {
            return Ok(MessageSize {
                word_count: 0,
                cap_count: 1,
            });
        }
        match self.resolve()? {
            None => Ok(MessageSize::default()),
            Some(resolved) => match resolved.kind {
                WirePointerKind::Struct => self.get_struct(None)?.total_size(),
                WirePointerKind::List => self.get_list()?.total_size(),
                WirePointerKind::Other | WirePointerKind::Far => Err(Error::from_kind(
                    ErrorKind::MalformedPointer,
                    "unexpected pointer kind while computing message size",
                )),
            },
        }
    }
}

/// A read-only view of a struct: a data section (primitive fields) and a
/// pointer section (struct/list/text/data/capability fields), both optional
/// in the sense that out-of-range access yields the field's default.
#[derive(Clone, Copy)]
pub struct StructReader<'a> {
    arena: ArenaRef<'a>,
    segment_id: u32,
    data: *const u8,
    pointers: *const u8,
    data_size_bits: u32,
    pointer_count: u16,
    nesting_limit: i32,
    upgraded_list_element: bool,
}

impl<'a> StructReader<'a> {
    pub fn empty() -> StructReader<'static> {
        StructReader {
            arena: ArenaRef::Empty,
            segment_id: 0,
            data: core::ptr::null(),
            pointers: core::ptr::null(),
            data_size_bits: 0,
            pointer_count: 0,
            nesting_limit: i32::MAX,
            upgraded_list_element: false,
        }
    }

    fn from_default(default: Option<&'a [Word]>) -> StructReader<'a> {
        match default {
            Some(words) if !words.is_empty() => {
                let bytes = Word::words_to_bytes(words);
                StructReader {
                    arena: ArenaRef::Empty,
                    segment_id: 0,
                    data: bytes.as_ptr(),
                    pointers: unsafe { bytes.as_ptr().add(bytes.len()) },
                    data_size_bits: (bytes.len() as u32) * 8,
                    pointer_count: 0,
                    nesting_limit: i32::MAX,
                    upgraded_list_element: false,
                }
            }
            _ => StructReader::empty(),
        }
    }

    /// Synthesizes a struct view over a single primitive list element
    /// promoted to struct shape for schema evolution: only field index 0 is
    /// addressable, and there are no pointer fields.
    pub(crate) fn from_upgraded_element(
        arena: ArenaRef<'a>,
        segment_id: u32,
        data: *const u8,
        data_size_bits: u32,
        nesting_limit: i32,
    ) -> StructReader<'a> {
        StructReader {
            arena,
            segment_id,
            data,
            pointers: core::ptr::null(),
            data_size_bits,
            pointer_count: 0,
            nesting_limit,
            upgraded_list_element: true,
        }
    }

    pub fn data_size_bits(&self) -> u32 {
        self.data_size_bits
    }

    pub fn pointer_count(&self) -> u16 {
        self.pointer_count
    }

    pub fn get_data_field<T: PrimitiveElement>(&self, index: u32, default: T) -> T {
        if self.upgraded_list_element && index != 0 {
            return default;
        }
        let bit_offset = index as u64 * T::BITS as u64;
        if bit_offset + T::BITS as u64 > self.data_size_bits as u64 {
            return default;
        }
        let byte_offset = (bit_offset / 8) as usize;
        let raw = unsafe {
            T::get_raw(core::slice::from_raw_parts(
                self.data.add(byte_offset),
                core::mem::size_of::<T>(),
            ))
        };
        T::from_bits(raw.to_bits() ^ default.to_bits())
    }

    pub fn get_bool_field(&self, index: u32, default: bool) -> bool {
        if self.upgraded_list_element && index != 0 {
            return default;
        }
        if index as u64 + 1 > self.data_size_bits as u64 {
            return default;
        }
        let byte_offset = (index / 8) as usize;
        let mask = 1u8 << (index % 8);
        let bit = unsafe { *self.data.add(byte_offset) } & mask != 0;
        bit ^ default
    }

    pub fn get_pointer(&self, index: u32) -> PointerReader<'a> {
        if self.upgraded_list_element || index >= self.pointer_count as u32 {
            return PointerReader {
                arena: self.arena,
                segment_id: self.segment_id,
                pointer: core::ptr::null(),
                nesting_limit: self.nesting_limit,
            };
        }
        PointerReader {
            arena: self.arena,
            segment_id: self.segment_id,
            pointer: unsafe { self.pointers.add(index as usize * BYTES_PER_WORD) },
            nesting_limit: self.nesting_limit,
        }
    }

    /// Total size of this struct's own data/pointer words plus everything
    /// reachable through its pointer section.
    pub fn total_size(&self) -> Result<MessageSize> {
        let mut result = MessageSize {
            word_count: bits_to_words_round_up(self.data_size_bits as u64) as u64
                + self.pointer_count as u64,
            cap_count: 0,
        };
        for i in 0..self.pointer_count as u32 {
            result.plus_eq(self.get_pointer(i).target_size()?);
        }
        Ok(result)
    }

    /// Deep-copies this struct's data and (recursively) its pointer targets
    /// into `dst`, which must already have been allocated with its own
    /// shape. Slots present in one struct but not the other are left at
    /// their already-zeroed defaults.
    pub fn copy_to(&self, dst: &mut StructBuilder<'_>) -> Result<()> {
        let data_bytes =
            core::cmp::min(self.data_size_bits, dst.data_size_bits) as usize / 8;
        if data_bytes > 0 {
            unsafe {
                core::ptr::copy_nonoverlapping(self.data, dst.data, data_bytes);
            }
        }
        let pointer_count = core::cmp::min(self.pointer_count, dst.pointer_count);
        for i in 0..pointer_count {
            let src = self.get_pointer(i as u32);
            let mut dst_ptr = dst.get_pointer(i as u32)?;
            dst_ptr.copy_from(&src)?;
        }
        Ok(())
    }
}

/// A read-only view of a list: primitive, bit, pointer, or composite
/// (inline-struct) elements, all addressed the same way once `step_bits` and
/// the element base pointer are known.
#[derive(Clone, Copy)]
pub struct ListReader<'a> {
    arena: ArenaRef<'a>,
    segment_id: u32,
    ptr: *const u8,
    element_count: u32,
    step_bits: u32,
    struct_data_size: u32,
    struct_pointer_count: u16,
    element_size: ElementSize,
    nesting_limit: i32,
}

impl<'a> ListReader<'a> {
    pub fn empty() -> ListReader<'static> {
        ListReader {
            arena: ArenaRef::Empty,
            segment_id: 0,
            ptr: core::ptr::null(),
            element_count: 0,
            step_bits: 0,
            struct_data_size: 0,
            struct_pointer_count: 0,
            element_size: ElementSize::Void,
            nesting_limit: i32::MAX,
        }
    }

    fn from_default_bytes(bytes: &'a [u8]) -> ListReader<'a> {
        ListReader {
            arena: ArenaRef::Empty,
            segment_id: 0,
            ptr: bytes.as_ptr(),
            element_count: bytes.len() as u32,
            step_bits: 8,
            struct_data_size: 0,
            struct_pointer_count: 0,
            element_size: ElementSize::Byte,
            nesting_limit: i32::MAX,
        }
    }

    pub fn len(&self) -> u32 {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn element_size(&self) -> ElementSize {
        self.element_size
    }

    pub fn struct_size(&self) -> StructSize {
        StructSize {
            data: (self.struct_data_size / 64) as u16,
            pointers: self.struct_pointer_count,
        }
    }

    fn bounds_check(&self, index: u32) -> Result<()> {
        if index >= self.element_count {
            Err(Error::from_kind(
                ErrorKind::IndexOutOfRange,
                "list index out of range",
            ))
        } else {
            Ok(())
        }
    }

    /// Total size of this list's own element words plus everything
    /// reachable through any pointers it holds (pointer lists directly, or
    /// the pointer section of each element of a composite list).
    pub fn total_size(&self) -> Result<MessageSize> {
        match self.element_size {
            ElementSize::Pointer => {
                let mut result = MessageSize {
                    word_count: self.element_count as u64,
                    cap_count: 0,
                };
                for i in 0..self.element_count {
                    result.plus_eq(self.get_pointer_element(i).target_size()?);
                }
                Ok(result)
            }
            ElementSize::InlineComposite => {
                let words_per_element =
                    (self.struct_data_size as u64 / 64) + self.struct_pointer_count as u64;
                let mut result = MessageSize {
                    // +1 word for the tag that precedes a composite list's elements.
                    word_count: 1 + self.element_count as u64 * words_per_element,
                    cap_count: 0,
                };
                for i in 0..self.element_count {
                    let element = self.get_struct_element(i);
                    for p in 0..element.pointer_count() as u32 {
                        result.plus_eq(element.get_pointer(p).target_size()?);
                    }
                }
                Ok(result)
            }
            _ => Ok(MessageSize {
                word_count: bits_to_words_round_up(
                    self.step_bits as u64 * self.element_count as u64,
                ) as u64,
                cap_count: 0,
            }),
        }
    }

    /// Returns `T::default()` if the list's wire element size does not
    /// match `T`'s, rather than erroring -- this is the only "upgrade"
    /// behavior this crate implements for mismatched list element types,
    /// since there is no schema-evolution layer to drive anything richer.
    pub fn get_primitive_element<T: PrimitiveElement>(&self, index: u32) -> Result<T> {
        self.bounds_check(index)?;
        if self.element_size != T::ELEMENT_SIZE {
            return Ok(T::default());
        }
        let bit_offset = index as u64 * self.step_bits as u64;
        let byte_offset = (bit_offset / 8) as usize;
        Ok(unsafe {
            T::get_raw(core::slice::from_raw_parts(
                self.ptr.add(byte_offset),
                core::mem::size_of::<T>(),
            ))
        })
    }

    pub fn get_bool_element(&self, index: u32) -> Result<bool> {
        self.bounds_check(index)?;
        let bit = index as u64 * self.step_bits as u64;
        let byte_offset = (bit / 8) as usize;
        let mask = 1u8 << (bit % 8);
        Ok(unsafe { *self.ptr.add(byte_offset) } & mask != 0)
    }

    pub fn get_pointer_element(&self, index: u32) -> PointerReader<'a> {
        if index >= self.element_count {
            return PointerReader {
                arena: self.arena,
                segment_id: self.segment_id,
                pointer: core::ptr::null(),
                nesting_limit: self.nesting_limit,
            };
        }
        let byte_offset = (index as u64 * self.step_bits as u64 / 8) as usize;
        PointerReader {
            arena: self.arena,
            segment_id: self.segment_id,
            pointer: unsafe { self.ptr.add(byte_offset) },
            nesting_limit: self.nesting_limit,
        }
    }

    pub fn get_struct_element(&self, index: u32) -> StructReader<'a> {
        let byte_offset = (index as u64 * self.step_bits as u64 / 8) as usize;
        let data = unsafe { self.ptr.add(byte_offset) };
        if self.element_size != ElementSize::InlineComposite {
            // The list's wire shape is primitive/bool/byte/pointer, but a
            // struct-list accessor is reading it: synthesize a one-field
            // struct view over each element, per the upgraded-list-element
            // rule.
            return StructReader::from_upgraded_element(
                self.arena,
                self.segment_id,
                data,
                self.step_bits,
                self.nesting_limit,
            );
        }
        let pointers = unsafe { data.add((self.struct_data_size / 8) as usize) };
        StructReader {
            arena: self.arena,
            segment_id: self.segment_id,
            data,
            pointers,
            data_size_bits: self.struct_data_size,
            pointer_count: self.struct_pointer_count,
            nesting_limit: self.nesting_limit,
            upgraded_list_element: false,
        }
    }

    /// The raw byte payload, valid for `Byte`-element lists (text/data).
    pub fn as_bytes(&self) -> &'a [u8] {
        unsafe { core::slice::from_raw_parts(self.ptr, self.element_count as usize) }
    }
}

enum PointerShape {
    Struct { data_words: u16, pointer_words: u16 },
    List { element_size: u8, count: u32 },
}

impl PointerShape {
    fn encode(&self, offset: i32) -> Result<u64> {
        match *self {
            PointerShape::Struct {
                data_words,
                pointer_words,
            } => {
                let low = encode_offset_and_kind(offset, WirePointerKind::Struct)?;
                let high = struct_high(data_words, pointer_words);
                Ok((low as u64) | ((high as u64) << 32))
            }
            PointerShape::List {
                element_size,
                count,
            } => {
                if count > (1u32 << 29) - 1 {
                    return Err(Error::from_kind(
                        ErrorKind::OversizedList,
                        "list element/word count exceeds the encodable range",
                    ));
                }
                let low = encode_offset_and_kind(offset, WirePointerKind::List)?;
                let high = (element_size as u32) | (count << 3);
                Ok((low as u64) | ((high as u64) << 32))
            }
        }
    }
}

/// Lifetime-erased the way [`crate::private::arena::BuilderArena`] handles
/// are shared between every live builder over the same message: a raw
/// pointer plus a `'a` marker rather than an actual borrow, so that a parent
/// struct builder and a child it just allocated can both be held at once.
unsafe fn arena_as_reader<'a>(arena: *mut dyn BuilderArena) -> ArenaRef<'a> {
    let r: &dyn ReaderArena = unsafe { (*arena).as_reader() };
    ArenaRef::Live(unsafe { core::mem::transmute::<&dyn ReaderArena, &'a dyn ReaderArena>(r) })
}

/// A mutable handle to a pointer word, the write-side counterpart of
/// [`PointerReader`]. Allocation and far-pointer emission happen here.
pub struct PointerBuilder<'a> {
    arena: *mut dyn BuilderArena,
    segment_id: u32,
    pointer: *mut u8,
    marker: PhantomData<&'a mut ()>,
}

impl<'a> PointerBuilder<'a> {
    pub fn get_root(arena: &'a mut dyn BuilderArena, segment_id: u32, location: *mut u8) -> Self {
        PointerBuilder {
            arena: arena as *mut dyn BuilderArena,
            segment_id,
            pointer: location,
            marker: PhantomData,
        }
    }

    fn arena_mut(&self) -> &mut dyn BuilderArena {
        unsafe { &mut *self.arena }
    }

    fn raw(&self) -> u64 {
        unsafe { read_raw(self.pointer) }
    }

    fn write_raw(&mut self, value: u64) {
        unsafe { write_raw(self.pointer, value) };
    }

    pub fn is_null(&self) -> bool {
        self.raw() == 0
    }

    /// Zeroes this pointer word. Shallow: whatever it previously pointed at
    /// is not recursively cleared, only orphaned.
    pub fn clear(&mut self) {
        self.write_raw(0);
    }

    pub fn as_reader(&self) -> PointerReader<'a> {
        PointerReader {
            arena: unsafe { arena_as_reader(self.arena) },
            segment_id: self.segment_id,
            pointer: self.pointer as *const u8,
            nesting_limit: i32::MAX,
        }
    }

    /// A fresh handle to the same pointer word, usable without holding onto
    /// `self`'s borrow. Sound because every field here is a raw pointer or
    /// plain integer; `'a` is a marker, not an actual borrow of the arena.
    pub fn reborrow(&mut self) -> PointerBuilder<'_> {
        PointerBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            pointer: self.pointer,
            marker: PhantomData,
        }
    }

    fn pointer_word_index(&self, arena: &mut dyn BuilderArena) -> u32 {
        let (seg_start, _used) = arena.get_segment_mut(self.segment_id);
        ((self.pointer as usize) - (seg_start as usize)) as u32 / BYTES_PER_WORD as u32
    }

    fn place(&mut self, target_segment: u32, target_offset: u32, shape: PointerShape) -> Result<()> {
        let arena = self.arena_mut();
        if target_segment == self.segment_id {
            let pointer_word_index = self.pointer_word_index(arena);
            let rel = target_offset as i64 - (pointer_word_index as i64 + 1);
            let raw = shape.encode(rel as i32)?;
            self.write_raw(raw);
            return Ok(());
        }

        if let Some(pad_offset) = arena.try_allocate_in_segment(target_segment, 1) {
            let pad_ptr = arena.segment_ptr_mut(target_segment, pad_offset);
            let rel = target_offset as i64 - (pad_offset as i64 + 1);
            let shape_raw = shape.encode(rel as i32)?;
            unsafe { write_raw(pad_ptr, shape_raw) };
            let raw = (far_low(false, pad_offset) as u64) | ((target_segment as u64) << 32);
            self.write_raw(raw);
            return Ok(());
        }

        let (pad_segment, pad_offset) = arena.allocate(self.segment_id, 2);
        let pad0_ptr = arena.segment_ptr_mut(pad_segment, pad_offset);
        let pad1_ptr = arena.segment_ptr_mut(pad_segment, pad_offset + 1);
        let pad0_raw = (far_low(false, target_offset) as u64) | ((target_segment as u64) << 32);
        unsafe { write_raw(pad0_ptr, pad0_raw) };
        let pad1_raw = shape.encode(0)?;
        unsafe { write_raw(pad1_ptr, pad1_raw) };
        let raw = (far_low(true, pad_offset) as u64) | ((pad_segment as u64) << 32);
        self.write_raw(raw);
        Ok(())
    }

    pub fn init_struct(&mut self, size: StructSize) -> StructBuilder<'a> {
        let total = size.total_words();
        let arena = self.arena_mut();
        let (seg, offset) = arena.allocate(self.segment_id, total);
        let ptr = arena.segment_ptr_mut(seg, offset);
        self.place(
            seg,
            offset,
            PointerShape::Struct {
                data_words: size.data,
                pointer_words: size.pointers,
            },
        )
        .expect("struct fits within the encodable pointer range");
        StructBuilder {
            arena: self.arena,
            segment_id: seg,
            data: ptr,
            pointers: unsafe { ptr.add(size.data as usize * BYTES_PER_WORD) },
            data_size_bits: size.data as u32 * 64,
            pointer_count: size.pointers,
            upgraded_list_element: false,
            marker: PhantomData,
        }
    }

    /// Initializes this pointer field as a struct, using `default` (flat
    /// data-section bytes) to seed any fields left out-of-range of the
    /// requested size -- mirrors how a short-struct default XORs in.
    pub fn init_struct_with_default(
        &mut self,
        size: StructSize,
        default: Option<&[Word]>,
    ) -> StructBuilder<'a> {
        let mut builder = self.init_struct(size);
        if let Some(words) = default {
            let default_bytes = Word::words_to_bytes(words);
            let n = core::cmp::min(default_bytes.len(), (size.data as usize) * BYTES_PER_WORD);
            if n > 0 {
                unsafe {
                    core::ptr::copy_nonoverlapping(default_bytes.as_ptr(), builder.data, n);
                }
            }
        }
        builder
    }

    /// Resolves whatever this pointer currently targets, following a single
    /// far or double-far indirection in place (no reallocation) the same way
    /// [`PointerReader::resolve`] does. Returns `None` for a null pointer.
    fn resolve_existing(&mut self) -> Result<Option<ResolvedBuilder>> {
        let raw = self.raw();
        if raw == 0 {
            return Ok(None);
        }
        let kind = WirePointerKind::from_bits(raw);
        if kind != WirePointerKind::Far {
            let arena = self.arena_mut();
            let pointer_word_index = self.pointer_word_index(arena);
            let obj_offset = pointer_word_index as i64 + 1 + decode_offset(raw as u32) as i64;
            return Ok(Some(ResolvedBuilder {
                segment_id: self.segment_id,
                target_offset: obj_offset as u32,
                kind,
                shape_raw: raw,
            }));
        }

        let low = raw as u32;
        let double = far_is_double(low);
        let pad_offset = far_pad_offset(low);
        let target_segment = (raw >> 32) as u32;
        let arena = self.arena_mut();

        if !double {
            let pad_ptr = arena.segment_ptr_mut(target_segment, pad_offset);
            let pad_raw = unsafe { read_raw(pad_ptr) };
            let obj_offset = pad_offset as i64 + 1 + decode_offset(pad_raw as u32) as i64;
            Ok(Some(ResolvedBuilder {
                segment_id: target_segment,
                target_offset: obj_offset as u32,
                kind: WirePointerKind::from_bits(pad_raw),
                shape_raw: pad_raw,
            }))
        } else {
            let pad0_ptr = arena.segment_ptr_mut(target_segment, pad_offset);
            let pad0_raw = unsafe { read_raw(pad0_ptr) };
            let pad1_ptr = unsafe { pad0_ptr.add(BYTES_PER_WORD) };
            let pad1_raw = unsafe { read_raw(pad1_ptr) };
            let obj_segment = (pad0_raw >> 32) as u32;
            let obj_offset = far_pad_offset(pad0_raw as u32);
            Ok(Some(ResolvedBuilder {
                segment_id: obj_segment,
                target_offset: obj_offset,
                kind: WirePointerKind::from_bits(pad1_raw),
                shape_raw: pad1_raw,
            }))
        }
    }

    /// Returns a builder over this pointer's struct, following an existing
    /// near/far pointer in place rather than reallocating, or initializing a
    /// fresh struct of `size` (seeded from `default`) if the pointer is null.
    pub fn get_struct(&mut self, size: StructSize, default: Option<&[Word]>) -> Result<StructBuilder<'a>> {
        match self.resolve_existing()? {
            None => Ok(self.init_struct_with_default(size, default)),
            Some(r) => {
                if r.kind != WirePointerKind::Struct {
                    return Err(Error::from_kind(
                        ErrorKind::MalformedPointer,
                        "expected a struct pointer",
                    ));
                }
                let high = (r.shape_raw >> 32) as u32;
                let data_words = struct_data_words(high);
                let pointer_words = struct_pointer_words(high);
                let arena = self.arena_mut();
                let ptr = arena.segment_ptr_mut(r.segment_id, r.target_offset);
                let pointers = unsafe { ptr.add(data_words as usize * BYTES_PER_WORD) };
                Ok(StructBuilder {
                    arena: self.arena,
                    segment_id: r.segment_id,
                    data: ptr,
                    pointers,
                    data_size_bits: data_words as u32 * 64,
                    pointer_count: pointer_words,
                    upgraded_list_element: false,
                    marker: PhantomData,
                })
            }
        }
    }

    /// Returns a builder over this pointer's list, following an existing
    /// pointer in place, or an empty zero-element placeholder if the pointer
    /// is null (a generated accessor re-inits explicitly when it needs a
    /// non-empty list). `element_size` is advisory only: a mismatch with
    /// what's actually there is reported through the same degrade-to-default
    /// behavior as [`ListReader::get_primitive_element`], not an error here.
    pub fn get_list(&mut self, element_size: ElementSize) -> Result<ListBuilder<'a>> {
        match self.resolve_existing()? {
            None => Ok(ListBuilder {
                arena: self.arena,
                segment_id: self.segment_id,
                ptr: core::ptr::null_mut(),
                element_count: 0,
                step_bits: data_bits_per_element(element_size),
                struct_data_size: 0,
                struct_pointer_count: 0,
                element_size,
                marker: PhantomData,
            }),
            Some(r) => {
                if r.kind != WirePointerKind::List {
                    return Err(Error::from_kind(
                        ErrorKind::MalformedPointer,
                        "expected a list pointer",
                    ));
                }
                let high = (r.shape_raw >> 32) as u32;
                let size_tag = list_element_size_tag(high);
                if size_tag == ElementSize::InlineComposite as u8 {
                    let arena = self.arena_mut();
                    let tag_ptr = arena.segment_ptr_mut(r.segment_id, r.target_offset);
                    let tag_raw = unsafe { read_raw(tag_ptr) };
                    let element_count = (tag_raw as u32) >> 2;
                    let thigh = (tag_raw >> 32) as u32;
                    let data_words = struct_data_words(thigh);
                    let pointer_words = struct_pointer_words(thigh);
                    Ok(ListBuilder {
                        arena: self.arena,
                        segment_id: r.segment_id,
                        ptr: unsafe { tag_ptr.add(BYTES_PER_WORD) },
                        element_count,
                        step_bits: (data_words as u32 + pointer_words as u32) * 64,
                        struct_data_size: data_words as u32 * 64,
                        struct_pointer_count: pointer_words,
                        element_size: ElementSize::InlineComposite,
                        marker: PhantomData,
                    })
                } else {
                    let resolved_size = ElementSize::from_wire(size_tag)?;
                    let count = list_element_count(high);
                    let arena = self.arena_mut();
                    let ptr = arena.segment_ptr_mut(r.segment_id, r.target_offset);
                    Ok(ListBuilder {
                        arena: self.arena,
                        segment_id: r.segment_id,
                        ptr,
                        element_count: count,
                        step_bits: data_bits_per_element(resolved_size),
                        struct_data_size: 0,
                        struct_pointer_count: 0,
                        element_size: resolved_size,
                        marker: PhantomData,
                    })
                }
            }
        }
    }

    /// `default` is the NUL-excluded default string bytes, if any.
    pub fn get_text(&mut self, default: Option<&[u8]>) -> Result<ListBuilder<'a>> {
        if self.is_null() {
            match default {
                Some(d) => self.set_text(d),
                None => {
                    self.init_text(0);
                }
            }
        }
        let mut builder = self.get_list(ElementSize::Byte)?;
        // Text is stored with a trailing NUL included in the wire element
        // count; hide it the same way the reader side does.
        builder.element_count = builder.element_count.saturating_sub(1);
        Ok(builder)
    }

    pub fn get_data(&mut self, default: Option<&[u8]>) -> Result<ListBuilder<'a>> {
        if self.is_null() {
            match default {
                Some(d) => self.set_data(d),
                None => return Ok(self.init_data(0)),
            }
        }
        self.get_list(ElementSize::Byte)
    }

    pub fn init_primitive_list(&mut self, count: u32, element_size: ElementSize) -> ListBuilder<'a> {
        let bits = data_bits_per_element(element_size) as u64 * count as u64;
        let words = bits_to_words_round_up(bits);
        let arena = self.arena_mut();
        let (seg, offset) = arena.allocate(self.segment_id, words as u32);
        let ptr = arena.segment_ptr_mut(seg, offset);
        self.place(
            seg,
            offset,
            PointerShape::List {
                element_size: element_size as u8,
                count,
            },
        )
        .expect("list fits within the encodable pointer range");
        ListBuilder {
            arena: self.arena,
            segment_id: seg,
            ptr,
            element_count: count,
            step_bits: data_bits_per_element(element_size),
            struct_data_size: 0,
            struct_pointer_count: 0,
            element_size,
            marker: PhantomData,
        }
    }

    pub fn init_list(&mut self, element_size: ElementSize, count: u32) -> ListBuilder<'a> {
        self.init_primitive_list(count, element_size)
    }

    pub fn init_pointer_list(&mut self, count: u32) -> ListBuilder<'a> {
        self.init_primitive_list(count, ElementSize::Pointer)
    }

    pub fn init_struct_list(&mut self, count: u32, size: StructSize) -> ListBuilder<'a> {
        let words_per_element = size.total_words();
        let total_words = 1 + count as u64 * words_per_element as u64;
        let arena = self.arena_mut();
        let (seg, offset) = arena.allocate(self.segment_id, total_words as u32);
        let tag_ptr = arena.segment_ptr_mut(seg, offset);
        let tag_low = (count << 2) | (WirePointerKind::Struct as u32 & 3);
        let tag_high = struct_high(size.data, size.pointers);
        unsafe { write_raw(tag_ptr, (tag_low as u64) | ((tag_high as u64) << 32)) };
        self.place(
            seg,
            offset,
            PointerShape::List {
                element_size: ElementSize::InlineComposite as u8,
                count: (count as u64 * words_per_element as u64) as u32,
            },
        )
        .expect("composite list fits within the encodable pointer range");
        ListBuilder {
            arena: self.arena,
            segment_id: seg,
            ptr: unsafe { tag_ptr.add(BYTES_PER_WORD) },
            element_count: count,
            step_bits: words_per_element * 64,
            struct_data_size: size.data as u32 * 64,
            struct_pointer_count: size.pointers,
            element_size: ElementSize::InlineComposite,
            marker: PhantomData,
        }
    }

    pub fn init_text(&mut self, size: u32) -> ListBuilder<'a> {
        self.init_primitive_list(size + 1, ElementSize::Byte)
    }

    pub fn set_text(&mut self, value: &[u8]) {
        let builder = self.init_text(value.len() as u32);
        if !value.is_empty() {
            unsafe { core::ptr::copy_nonoverlapping(value.as_ptr(), builder.ptr, value.len()) };
        }
    }

    pub fn init_data(&mut self, size: u32) -> ListBuilder<'a> {
        self.init_primitive_list(size, ElementSize::Byte)
    }

    pub fn set_data(&mut self, value: &[u8]) {
        let builder = self.init_data(value.len() as u32);
        if !value.is_empty() {
            unsafe { core::ptr::copy_nonoverlapping(value.as_ptr(), builder.ptr, value.len()) };
        }
    }

    pub fn set_capability(&mut self, handle: Rc<dyn CapabilityHandle>) {
        let arena = self.arena_mut();
        let index = arena.local_cap_table().intern(handle);
        let raw = (WirePointerKind::Other as u32 as u64) | ((index as u64) << 32);
        self.write_raw(raw);
    }

    pub fn get_capability(&self) -> Result<Option<Rc<dyn CapabilityHandle>>> {
        self.as_reader().get_capability()
    }

    pub fn set_struct(&mut self, value: &StructReader<'_>) -> Result<()> {
        let size = StructSize {
            data: (value.data_size_bits / 64) as u16,
            pointers: value.pointer_count,
        };
        let mut builder = self.init_struct(size);
        value.copy_to(&mut builder)
    }

    pub fn set_list(&mut self, value: &ListReader<'_>) -> Result<()> {
        match value.element_size {
            ElementSize::InlineComposite => {
                let size = StructSize {
                    data: (value.struct_data_size / 64) as u16,
                    pointers: value.struct_pointer_count,
                };
                let mut builder = self.init_struct_list(value.element_count, size);
                for i in 0..value.element_count {
                    let src = value.get_struct_element(i);
                    let mut dst = builder.get_struct_element(i);
                    src.copy_to(&mut dst)?;
                }
                Ok(())
            }
            ElementSize::Pointer => {
                let mut builder = self.init_pointer_list(value.element_count);
                for i in 0..value.element_count {
                    let src = value.get_pointer_element(i);
                    let mut dst = builder.get_pointer_element(i);
                    dst.copy_from(&src)?;
                }
                Ok(())
            }
            other => {
                let builder = self.init_primitive_list(value.element_count, other);
                let total_words = bits_to_words_round_up(
                    data_bits_per_element(other) as u64 * value.element_count as u64,
                );
                let total_bytes = total_words as usize * BYTES_PER_WORD;
                if total_bytes > 0 {
                    unsafe { core::ptr::copy_nonoverlapping(value.ptr, builder.ptr, total_bytes) };
                }
                Ok(())
            }
        }
    }

    /// The general deep-copy entry point: makes this pointer slot a copy of
    /// whatever `src` currently points at, following far indirections on the
    /// source and translating capability-table indices as needed.
    pub fn copy_from(&mut self, src: &PointerReader<'_>) -> Result<()> {
        let raw = src.raw();
        if raw == 0 {
            self.clear();
            return Ok(());
        }
        let kind = WirePointerKind::from_bits(raw);
        let resolved_kind = if kind == WirePointerKind::Far {
            src.resolve()?
                .map(|r| r.kind)
                .ok_or_else(|| Error::from_kind(ErrorKind::MalformedPointer, "far pointer resolved to nothing"))?
        } else {
            kind
        };
        match resolved_kind {
            WirePointerKind::Struct => {
                let r = src.get_struct(None)?;
                self.set_struct(&r)
            }
            WirePointerKind::List => {
                let r = src.get_list()?;
                self.set_list(&r)
            }
            WirePointerKind::Other => match src.get_capability()? {
                Some(handle) => {
                    self.set_capability(handle);
                    Ok(())
                }
                None => {
                    self.clear();
                    Ok(())
                }
            },
            WirePointerKind::Far => unreachable!("far pointers are resolved above"),
        }
    }
}

/// A mutable handle to a struct: a data section and a pointer section, both
/// already allocated to the shape given when the struct was created.
pub struct StructBuilder<'a> {
    arena: *mut dyn BuilderArena,
    segment_id: u32,
    data: *mut u8,
    pointers: *mut u8,
    data_size_bits: u32,
    pointer_count: u16,
    upgraded_list_element: bool,
    marker: PhantomData<&'a mut ()>,
}

impl<'a> StructBuilder<'a> {
    fn arena_mut(&self) -> &mut dyn BuilderArena {
        unsafe { &mut *self.arena }
    }

    /// Synthesizes a struct view over a single primitive list element
    /// promoted to struct shape, mirroring
    /// [`StructReader::from_upgraded_element`].
    pub(crate) fn from_upgraded_element(
        arena: *mut dyn BuilderArena,
        segment_id: u32,
        data: *mut u8,
        data_size_bits: u32,
    ) -> StructBuilder<'a> {
        StructBuilder {
            arena,
            segment_id,
            data,
            pointers: core::ptr::null_mut(),
            data_size_bits,
            pointer_count: 0,
            upgraded_list_element: true,
            marker: PhantomData,
        }
    }

    pub fn data_size_bits(&self) -> u32 {
        self.data_size_bits
    }

    pub fn pointer_count(&self) -> u16 {
        self.pointer_count
    }

    pub fn reborrow(&mut self) -> StructBuilder<'_> {
        StructBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            data: self.data,
            pointers: self.pointers,
            data_size_bits: self.data_size_bits,
            pointer_count: self.pointer_count,
            upgraded_list_element: self.upgraded_list_element,
            marker: PhantomData,
        }
    }

    pub fn as_reader(&self) -> StructReader<'a> {
        StructReader {
            arena: unsafe { arena_as_reader(self.arena) },
            segment_id: self.segment_id,
            data: self.data as *const u8,
            pointers: self.pointers as *const u8,
            data_size_bits: self.data_size_bits,
            pointer_count: self.pointer_count,
            nesting_limit: i32::MAX,
            upgraded_list_element: self.upgraded_list_element,
        }
    }

    pub fn get_data_field<T: PrimitiveElement>(&self, index: u32, default: T) -> T {
        self.as_reader().get_data_field(index, default)
    }

    pub fn get_bool_field(&self, index: u32, default: bool) -> bool {
        self.as_reader().get_bool_field(index, default)
    }

    pub fn set_data_field<T: PrimitiveElement>(
        &mut self,
        index: u32,
        value: T,
        default: T,
    ) -> Result<()> {
        if self.upgraded_list_element && index != 0 {
            return Err(Error::from_kind(
                ErrorKind::UpgradedListElement,
                "write to field other than 0 on an upgraded list element",
            ));
        }
        let bit_offset = index as u64 * T::BITS as u64;
        if bit_offset + T::BITS as u64 > self.data_size_bits as u64 {
            if value.to_bits() == default.to_bits() {
                return Ok(());
            }
            return Err(Error::from_kind(
                ErrorKind::ShortStruct,
                "write beyond a short struct's allocated data words",
            ));
        }
        let byte_offset = (bit_offset / 8) as usize;
        let encoded = T::from_bits(value.to_bits() ^ default.to_bits());
        unsafe {
            T::set_raw(
                core::slice::from_raw_parts_mut(
                    self.data.add(byte_offset),
                    core::mem::size_of::<T>(),
                ),
                encoded,
            );
        }
        Ok(())
    }

    pub fn set_bool_field(&mut self, index: u32, value: bool, default: bool) -> Result<()> {
        if self.upgraded_list_element && index != 0 {
            return Err(Error::from_kind(
                ErrorKind::UpgradedListElement,
                "write to field other than 0 on an upgraded list element",
            ));
        }
        if index as u64 + 1 > self.data_size_bits as u64 {
            if value == default {
                return Ok(());
            }
            return Err(Error::from_kind(
                ErrorKind::ShortStruct,
                "write beyond a short struct's allocated data words",
            ));
        }
        let byte_offset = (index / 8) as usize;
        let mask = 1u8 << (index % 8);
        let encoded = value ^ default;
        unsafe {
            let byte = self.data.add(byte_offset);
            if encoded {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
        Ok(())
    }

    pub fn get_pointer(&self, index: u32) -> Result<PointerBuilder<'a>> {
        if self.upgraded_list_element {
            return Err(Error::from_kind(
                ErrorKind::UpgradedListElement,
                "an upgraded list element has no pointer fields",
            ));
        }
        if index >= self.pointer_count as u32 {
            return Err(Error::from_kind(
                ErrorKind::PointerIndexOutOfRange,
                "pointer slot index out of range",
            ));
        }
        Ok(PointerBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            pointer: unsafe { self.pointers.add(index as usize * BYTES_PER_WORD) },
            marker: PhantomData,
        })
    }

    /// Trims trailing all-zero data words (and, unless `data_only`, trailing
    /// all-zero pointer words) from the end of this struct, shifting any
    /// surviving pointer words left and rewriting their near-pointer offsets
    /// to match. Gives the reclaimed tail back to the segment if nothing has
    /// been allocated past it since.
    pub fn compact(&mut self, data_only: bool) {
        let data_words = self.data_size_bits / 64;
        let mut new_data_words = data_words;
        while new_data_words > 0 {
            let word = unsafe { read_raw(self.data.add(((new_data_words - 1) * 8) as usize)) };
            if word != 0 {
                break;
            }
            new_data_words -= 1;
        }

        let mut new_pointer_words = self.pointer_count as u32;
        if !data_only {
            while new_pointer_words > 0 {
                let word = unsafe {
                    read_raw(self.pointers.add(((new_pointer_words - 1) * 8) as usize))
                };
                if word != 0 {
                    break;
                }
                new_pointer_words -= 1;
            }
        }

        let trimmed_data = data_words - new_data_words;
        if trimmed_data == 0 && new_pointer_words as u16 == self.pointer_count {
            return;
        }

        if trimmed_data > 0 && new_pointer_words > 0 {
            for i in 0..new_pointer_words {
                let old_ptr_addr = unsafe { self.pointers.add((i * 8) as usize) };
                let new_ptr_addr = unsafe { self.data.add(((new_data_words + i) * 8) as usize) };
                let raw = unsafe { read_raw(old_ptr_addr) };
                if raw == 0 {
                    unsafe { write_raw(new_ptr_addr, 0) };
                    continue;
                }
                let kind = WirePointerKind::from_bits(raw);
                if matches!(kind, WirePointerKind::Struct | WirePointerKind::List) {
                    let off = decode_offset(raw as u32) as i64;
                    let target = unsafe {
                        old_ptr_addr
                            .add(BYTES_PER_WORD)
                            .offset(off as isize * BYTES_PER_WORD as isize)
                    };
                    let new_rel = (target as i64 - (new_ptr_addr as i64 + BYTES_PER_WORD as i64))
                        / BYTES_PER_WORD as i64;
                    let low = encode_offset_and_kind(new_rel as i32, kind)
                        .expect("compaction keeps offsets within range");
                    let high = (raw >> 32) as u32;
                    unsafe { write_raw(new_ptr_addr, (low as u64) | ((high as u64) << 32)) };
                } else {
                    // far and capability pointers carry no self-relative offset.
                    unsafe { write_raw(new_ptr_addr, raw) };
                }
            }
        }

        let old_total = data_words + self.pointer_count as u32;
        let new_total = new_data_words + new_pointer_words;
        let tail_words = old_total - new_total;
        if tail_words > 0 {
            let tail_start = unsafe { self.data.add((new_total * 8) as usize) };
            unsafe { core::ptr::write_bytes(tail_start, 0, (tail_words * 8) as usize) };
        }

        let arena = self.arena_mut();
        let (seg_start, _used) = arena.get_segment_mut(self.segment_id);
        let struct_offset = ((self.data as usize) - (seg_start as usize)) as u32 / BYTES_PER_WORD as u32;
        let end_offset = struct_offset + old_total;
        arena.try_reclaim(self.segment_id, end_offset, tail_words);

        self.data_size_bits = new_data_words * 64;
        self.pointer_count = new_pointer_words as u16;
        self.pointers = unsafe { self.data.add((new_data_words * 8) as usize) };
    }
}

/// A mutable handle to a list: primitive, bit, pointer, or composite
/// elements, addressed by index the same way as [`ListReader`].
pub struct ListBuilder<'a> {
    arena: *mut dyn BuilderArena,
    segment_id: u32,
    ptr: *mut u8,
    element_count: u32,
    step_bits: u32,
    struct_data_size: u32,
    struct_pointer_count: u16,
    element_size: ElementSize,
    marker: PhantomData<&'a mut ()>,
}

impl<'a> ListBuilder<'a> {
    pub fn len(&self) -> u32 {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn element_size(&self) -> ElementSize {
        self.element_size
    }

    pub fn reborrow(&mut self) -> ListBuilder<'_> {
        ListBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            ptr: self.ptr,
            element_count: self.element_count,
            step_bits: self.step_bits,
            struct_data_size: self.struct_data_size,
            struct_pointer_count: self.struct_pointer_count,
            element_size: self.element_size,
            marker: PhantomData,
        }
    }

    pub fn as_reader(&self) -> ListReader<'a> {
        ListReader {
            arena: unsafe { arena_as_reader(self.arena) },
            segment_id: self.segment_id,
            ptr: self.ptr as *const u8,
            element_count: self.element_count,
            step_bits: self.step_bits,
            struct_data_size: self.struct_data_size,
            struct_pointer_count: self.struct_pointer_count,
            element_size: self.element_size,
            nesting_limit: i32::MAX,
        }
    }

    fn bounds_check(&self, index: u32) -> Result<()> {
        if index >= self.element_count {
            Err(Error::from_kind(
                ErrorKind::IndexOutOfRange,
                "list index out of range",
            ))
        } else {
            Ok(())
        }
    }

    pub fn get_primitive_element<T: PrimitiveElement>(&self, index: u32) -> Result<T> {
        self.bounds_check(index)?;
        let bit_offset = index as u64 * self.step_bits as u64;
        let byte_offset = (bit_offset / 8) as usize;
        Ok(unsafe {
            T::get_raw(core::slice::from_raw_parts(
                self.ptr.add(byte_offset),
                core::mem::size_of::<T>(),
            ))
        })
    }

    pub fn set_primitive_element<T: PrimitiveElement>(&mut self, index: u32, value: T) -> Result<()> {
        self.bounds_check(index)?;
        let bit_offset = index as u64 * self.step_bits as u64;
        let byte_offset = (bit_offset / 8) as usize;
        unsafe {
            T::set_raw(
                core::slice::from_raw_parts_mut(
                    self.ptr.add(byte_offset),
                    core::mem::size_of::<T>(),
                ),
                value,
            );
        }
        Ok(())
    }

    pub fn get_bool_element(&self, index: u32) -> Result<bool> {
        self.bounds_check(index)?;
        let bit = index as u64 * self.step_bits as u64;
        let byte_offset = (bit / 8) as usize;
        let mask = 1u8 << (bit % 8);
        Ok(unsafe { *self.ptr.add(byte_offset) } & mask != 0)
    }

    pub fn set_bool_element(&mut self, index: u32, value: bool) -> Result<()> {
        self.bounds_check(index)?;
        let bit = index as u64 * self.step_bits as u64;
        let byte_offset = (bit / 8) as usize;
        let mask = 1u8 << (bit % 8);
        unsafe {
            let byte = self.ptr.add(byte_offset);
            if value {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
        Ok(())
    }

    pub fn get_pointer_element(&self, index: u32) -> PointerBuilder<'a> {
        PointerBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            pointer: unsafe { self.ptr.add(index as usize * BYTES_PER_WORD) },
            marker: PhantomData,
        }
    }

    pub fn get_struct_element(&self, index: u32) -> StructBuilder<'a> {
        let byte_offset = (index as u64 * self.step_bits as u64 / 8) as usize;
        let data = unsafe { self.ptr.add(byte_offset) };
        if self.element_size != ElementSize::InlineComposite {
            return StructBuilder::from_upgraded_element(
                self.arena,
                self.segment_id,
                data,
                self.step_bits,
            );
        }
        let pointers = unsafe { data.add((self.struct_data_size / 8) as usize) };
        StructBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            data,
            pointers,
            data_size_bits: self.struct_data_size,
            pointer_count: self.struct_pointer_count,
            upgraded_list_element: false,
            marker: PhantomData,
        }
    }

    /// The raw byte payload, valid for `Byte`-element lists (text/data).
    pub fn as_bytes(&self) -> &'a [u8] {
        unsafe { core::slice::from_raw_parts(self.ptr, self.element_count as usize) }
    }

    /// The raw byte payload, valid for `Byte`-element lists (text/data).
    pub fn as_bytes_mut(&mut self) -> &'a mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.element_count as usize) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Builder, HeapAllocator, ReaderOptions};
    use crate::private::arena::{BuilderArenaImpl, ReaderArenaImpl};

    fn new_arena() -> BuilderArenaImpl<HeapAllocator> {
        BuilderArenaImpl::new(HeapAllocator::new())
    }

    fn root_pointer(arena: &mut BuilderArenaImpl<HeapAllocator>) -> PointerBuilder<'_> {
        if arena.is_empty() {
            arena.allocate_new_segment(1);
            arena.allocate(0, 1);
        }
        let (seg_start, _len) = arena.get_segment_mut(0);
        PointerBuilder::get_root(arena, 0, seg_start)
    }

    #[test]
    fn round_trip_and_default_encoding() {
        let mut arena = new_arena();
        let mut root = root_pointer(&mut arena);
        let mut s = root.init_struct(StructSize { data: 2, pointers: 0 });

        assert_eq!(s.get_data_field::<i32>(0, 0), 0);
        s.set_data_field::<i32>(0, -7, 0).unwrap();
        assert_eq!(s.get_data_field::<i32>(0, 0), -7);

        s.set_data_field::<u64>(0, 42, 10).unwrap();
        assert_eq!(s.get_data_field::<u64>(0, 10), 42);

        let raw0 = unsafe { read_raw(s.data) };
        assert_eq!(raw0 as u32, (-7i32) as u32);
        let raw1 = unsafe { read_raw(s.data.add(8)) };
        assert_eq!(raw1, 42u64 ^ 10u64);

        s.set_data_field::<u64>(0, 10, 10).unwrap();
        assert_eq!(unsafe { read_raw(s.data.add(8)) }, 0);
    }

    #[test]
    fn short_struct_defaults_and_errors() {
        let mut arena = new_arena();
        let mut root = root_pointer(&mut arena);
        let mut s = root.init_struct(StructSize { data: 1, pointers: 0 });

        assert_eq!(s.get_data_field::<u32>(4, 99), 99);
        assert!(s.set_data_field::<u32>(4, 99, 99).is_ok());
        assert!(matches!(
            s.set_data_field::<u32>(4, 5, 99),
            Err(Error { kind: ErrorKind::ShortStruct, .. })
        ));
    }

    #[test]
    fn near_pointer_math() {
        let mut arena = new_arena();
        let mut root = root_pointer(&mut arena);
        let mut a = root.init_struct(StructSize { data: 0, pointers: 1 });
        let mut p = a.get_pointer(0).unwrap();
        let b = p.init_struct(StructSize { data: 1, pointers: 0 });

        let reader = p.as_reader().get_struct(None).unwrap();
        assert_eq!(reader.data_size_bits(), 64);
        let _ = b;
    }

    #[test]
    fn far_pointer_across_segments() {
        let mut arena = new_arena();
        arena.allocate_new_segment(1);
        arena.allocate(0, 1);
        let seg1 = arena.allocate_new_segment(1);
        assert_eq!(seg1, 1);

        let (seg_start, _len) = arena.get_segment_mut(0);
        let mut a = PointerBuilder::get_root(&mut arena, 0, seg_start)
            .init_struct(StructSize { data: 0, pointers: 1 });
        let mut p = a.get_pointer(0).unwrap();

        let b_words = arena.try_allocate_in_segment(1, 1);
        assert_eq!(b_words, Some(0));
        let b_ptr = arena.segment_ptr_mut(1, 0);
        unsafe {
            write_raw(
                b_ptr,
                PointerShape::Struct {
                    data_words: 0,
                    pointer_words: 0,
                }
                .encode(0)
                .unwrap(),
            )
        };
        p.place(1, 0, PointerShape::Struct { data_words: 0, pointer_words: 0 })
            .unwrap();

        let raw = p.raw();
        assert_eq!(WirePointerKind::from_bits(raw), WirePointerKind::Far);
        assert!(!far_is_double(raw as u32));
        assert_eq!((raw >> 32) as u32, 1);
    }

    #[test]
    fn capability_interning_round_trips_index() {
        use crate::capability::CapabilityHandle;

        struct Dummy;
        impl CapabilityHandle for Dummy {
            fn get_ptr(&self) -> usize {
                self as *const Dummy as usize
            }
        }

        let mut arena = new_arena();
        let mut root = root_pointer(&mut arena);
        let mut s = root.init_struct(StructSize { data: 0, pointers: 2 });
        let handle: Rc<dyn CapabilityHandle> = Rc::new(Dummy);

        let mut p0 = s.get_pointer(0).unwrap();
        p0.set_capability(handle.clone());
        let mut p1 = s.get_pointer(1).unwrap();
        p1.set_capability(handle);

        assert_eq!(WirePointerKind::from_bits(p0.raw()), WirePointerKind::Other);
        assert_eq!((p0.raw() >> 32) as u32, 0);
        assert_eq!((p1.raw() >> 32) as u32, 0);
    }

    #[test]
    fn compaction_shrinks_trailing_zero_data_words() {
        let mut arena = new_arena();
        let mut root = root_pointer(&mut arena);
        let mut s = root.init_struct(StructSize { data: 3, pointers: 0 });
        s.set_data_field::<u32>(0, 123, 0).unwrap();

        s.compact(true);
        assert_eq!(s.data_size_bits(), 64);
        assert_eq!(s.get_data_field::<u32>(0, 0), 123);
    }

    #[test]
    fn primitive_list_upgraded_to_struct_list_exposes_field_zero_only() {
        let mut arena = new_arena();
        let mut root = root_pointer(&mut arena);
        let mut list = root.init_list(ElementSize::FourBytes, 2);
        list.set_primitive_element::<u32>(0, 0xABCD_1234).unwrap();
        list.set_primitive_element::<u32>(1, 0x1111_2222).unwrap();

        let builder_elem = list.get_struct_element(0);
        assert_eq!(builder_elem.get_data_field::<u32>(0, 0), 0xABCD_1234);
        assert_eq!(builder_elem.get_data_field::<u32>(1, 99), 99);
        assert!(builder_elem.as_reader().get_pointer(0).is_null());

        let mut builder_elem1 = list.get_struct_element(1);
        assert_eq!(builder_elem1.get_data_field::<u32>(0, 0), 0x1111_2222);
        assert!(matches!(
            builder_elem1.set_data_field::<u32>(1, 1, 0),
            Err(Error { kind: ErrorKind::UpgradedListElement, .. })
        ));

        let reader = list.as_reader();
        let reader_elem0 = reader.get_struct_element(0);
        assert_eq!(reader_elem0.get_data_field::<u32>(0, 0), 0xABCD_1234);
        assert_eq!(reader_elem0.get_data_field::<u32>(1, 99), 99);
    }

    #[test]
    fn target_size_counts_own_words_and_nested_pointer_targets() {
        let mut arena = new_arena();
        let mut root = root_pointer(&mut arena);
        let mut outer = root.init_struct(StructSize { data: 1, pointers: 2 });
        outer.set_data_field::<u64>(0, 7, 0).unwrap();

        let mut inner_ptr = outer.get_pointer(0).unwrap();
        let mut inner = inner_ptr.init_struct(StructSize { data: 2, pointers: 0 });
        inner.set_data_field::<u64>(0, 1, 0).unwrap();

        let mut list_ptr = outer.get_pointer(1).unwrap();
        let mut list = list_ptr.init_list(ElementSize::FourBytes, 4);
        list.set_primitive_element::<u32>(0, 1).unwrap();

        let reader = outer.as_reader();
        let size = reader.total_size().unwrap();
        // outer: 1 data word + 2 pointer words = 3.
        // inner struct: 2 data words.
        // list: 4 x 4-byte elements round up to 2 words.
        assert_eq!(size.word_count, 3 + 2 + 2);
        assert_eq!(size.cap_count, 0);
    }

    #[test]
    fn target_size_counts_capability_pointer() {
        use crate::capability::CapabilityHandle;

        struct Dummy;
        impl CapabilityHandle for Dummy {
            fn get_ptr(&self) -> usize {
                self as *const Dummy as usize
            }
        }

        let mut arena = new_arena();
        let mut root = root_pointer(&mut arena);
        let mut s = root.init_struct(StructSize { data: 0, pointers: 1 });
        let mut p = s.get_pointer(0).unwrap();
        p.set_capability(Rc::new(Dummy));

        let size = s.as_reader().total_size().unwrap();
        assert_eq!(size.word_count, 1);
        assert_eq!(size.cap_count, 1);
    }

    // Keeps `ReaderArenaImpl` and `ReaderOptions` reachable from this test
    // module without a dedicated end-to-end reader test here (see
    // `tests/roundtrip.rs` for those).
    #[allow(dead_code)]
    fn _typecheck_reader_imports(segments: alloc::vec::Vec<&'static [u8]>) {
        let _ = Builder::<HeapAllocator>::new_default;
        let _: ReaderArenaImpl<crate::message::SegmentArray<'_>> =
            ReaderArenaImpl::new(crate::message::SegmentArray::new(&[]), ReaderOptions::new());
        let _ = segments;
    }
}
