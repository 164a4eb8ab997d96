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

//! Traits that a code generator's per-type `Reader`/`Builder` pair implements
//! on top of [`crate::private::layout`], so that generic containers (an
//! `any_pointer`, a struct's pointer field, a `primitive_list`) can construct
//! and interpret them without knowing the concrete type.

use crate::Result;
use crate::private::layout::{ListReader, PointerBuilder, PointerReader, StructBuilder, StructReader, StructSize};

/// A type-level tag for a generated type, giving the lifetime-parameterized
/// `Reader`/`Builder` pair associated with it. A code generator emits one
/// `Owned` implementation per struct/list/interface it compiles.
pub trait Owned {
    type Reader<'a>;
    type Builder<'a>;
}

/// A value that can be constructed from a pointer reader: a struct, a list,
/// text, data, or an `any_pointer`.
pub trait FromPointerReader<'a>: Sized {
    fn get_from_pointer(reader: &PointerReader<'a>, default: Option<&'a [crate::Word]>)
    -> Result<Self>;
}

/// A value that can be constructed from (or read back out of) a pointer
/// builder.
pub trait FromPointerBuilder<'a>: Sized {
    /// Initializes the pointer as a fresh value, discarding whatever it
    /// previously pointed to. `size` is a list element count; ignored by
    /// struct types.
    fn init_pointer(builder: PointerBuilder<'a>, size: u32) -> Self;

    fn get_from_pointer(
        builder: PointerBuilder<'a>,
        default: Option<&'a [crate::Word]>,
    ) -> Result<Self>;
}

/// A value that knows how to deep-copy itself into a pointer slot. Every
/// `Reader` type implements this so that `set_foo(reader)`-style generated
/// setters can delegate to it.
pub trait SetPointerBuilder {
    fn set_pointer_builder(pointer: PointerBuilder<'_>, value: Self) -> Result<()>;
}

/// Wraps a raw [`StructReader`] into a generated type's `Reader`. A struct
/// list's element accessor is generic over this trait so it doesn't need to
/// know the concrete element type.
pub trait FromStructReader<'a> {
    fn new(reader: StructReader<'a>) -> Self;
}

/// Wraps a raw [`StructBuilder`] into a generated type's `Builder`.
pub trait FromStructBuilder<'a> {
    fn new(builder: StructBuilder<'a>) -> Self;
}

/// The fixed data/pointer section sizes a generated struct type allocates,
/// needed to initialize elements of a list of that struct.
pub trait HasStructSize {
    fn struct_size() -> StructSize;
}

/// Bridges a typed list `Reader` to the untyped `ListReader` underneath it,
/// so that copy and introspection code that only needs element shape/count
/// doesn't need to be generic over every element type.
pub trait IntoInternalListReader<'a> {
    fn into_internal_list_reader(self) -> ListReader<'a>;
}

/// Indexed, pass-by-value access, as opposed to `core::ops::Index` which
/// returns a reference. Cap'n Proto list elements are usually extracted by
/// value (a `u32`, a sub-struct `Reader`), so this is the trait
/// `ListIter` is built on.
pub trait IndexMove<Idx, T> {
    fn index_move(&self, index: Idx) -> T;
}

/// An iterator over a Cap'n Proto list, yielding elements by value.
pub struct ListIter<T, U> {
    marker: core::marker::PhantomData<U>,
    list: T,
    index: u32,
    count: u32,
}

impl<T, U> ListIter<T, U> {
    pub fn new(list: T, count: u32) -> Self {
        Self {
            list,
            index: 0,
            count,
            marker: core::marker::PhantomData,
        }
    }
}

impl<T: IndexMove<u32, U>, U> Iterator for ListIter<T, U> {
    type Item = U;
    fn next(&mut self) -> Option<Self::Item> {
        if self.index < self.count {
            let result = self.list.index_move(self.index);
            self.index += 1;
            Some(result)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let l = (self.count - self.index) as usize;
        (l, Some(l))
    }
}

impl<T: IndexMove<u32, U>, U> ExactSizeIterator for ListIter<T, U> {
    fn len(&self) -> usize {
        (self.count - self.index) as usize
    }
}

impl<T: IndexMove<u32, U>, U> DoubleEndedIterator for ListIter<T, U> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.index < self.count {
            self.count -= 1;
            Some(self.list.index_move(self.count))
        } else {
            None
        }
    }
}
