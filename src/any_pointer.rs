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

//! `AnyPointer`: a pointer field whose contents haven't been interpreted as
//! any particular type yet. [`message::Reader::get_root_internal`] and
//! [`message::Builder::get_root_internal`] go through this module, and a
//! generated accessor for a `Data`/interface-typed field that a schema left
//! untyped would too.

use alloc::rc::Rc;

use crate::capability::CapabilityHandle;
use crate::private::layout::{
    ElementSize, ListBuilder, ListReader, PointerBuilder, PointerReader, StructBuilder,
    StructReader, StructSize,
};
use crate::traits::{FromPointerBuilder, FromPointerReader, SetPointerBuilder};
use crate::{MessageSize, Result, Word};

/// A type tag for `AnyPointer`, for use with [`crate::traits::Owned`]-bounded
/// generic code (e.g. [`crate::message::TypedReader`]).
#[derive(Copy, Clone)]
pub struct Owned(());

impl crate::traits::Owned for Owned {
    type Reader<'a> = Reader<'a>;
    type Builder<'a> = Builder<'a>;
}

/// A read-only, not-yet-interpreted pointer field.
#[derive(Clone, Copy)]
pub struct Reader<'a> {
    reader: PointerReader<'a>,
}

impl<'a> Reader<'a> {
    pub fn new(reader: PointerReader<'a>) -> Reader<'a> {
        Reader { reader }
    }

    pub fn is_null(&self) -> bool {
        self.reader.is_null()
    }

    pub fn get_as<T: FromPointerReader<'a>>(self) -> Result<T> {
        T::get_from_pointer(&self.reader, None)
    }

    pub fn get_struct(&self, default: Option<&'a [Word]>) -> Result<StructReader<'a>> {
        self.reader.get_struct(default)
    }

    pub fn get_list(&self) -> Result<ListReader<'a>> {
        self.reader.get_list()
    }

    pub fn get_text(&self, default: Option<&'a [u8]>) -> Result<ListReader<'a>> {
        self.reader.get_text(default)
    }

    pub fn get_data(&self, default: Option<&'a [u8]>) -> Result<ListReader<'a>> {
        self.reader.get_data(default)
    }

    pub fn get_capability(&self) -> Result<Option<Rc<dyn CapabilityHandle>>> {
        self.reader.get_capability()
    }

    /// Total size of whatever this pointer refers to: the words its own
    /// struct/list occupies plus every struct and list reachable through it,
    /// and the number of distinct capabilities among them. A serializer uses
    /// this to pre-size a destination buffer before copying a message into
    /// it.
    pub fn target_size(&self) -> Result<MessageSize> {
        self.reader.target_size()
    }
}

impl<'a> FromPointerReader<'a> for Reader<'a> {
    fn get_from_pointer(
        reader: &PointerReader<'a>,
        _default: Option<&'a [Word]>,
    ) -> Result<Self> {
        Ok(Reader::new(*reader))
    }
}

impl<'a> SetPointerBuilder for Reader<'a> {
    fn set_pointer_builder(mut pointer: PointerBuilder<'_>, value: Self) -> Result<()> {
        pointer.copy_from(&value.reader)
    }
}

/// A mutable, not-yet-interpreted pointer field.
pub struct Builder<'a> {
    builder: PointerBuilder<'a>,
}

impl<'a> FromPointerBuilder<'a> for Builder<'a> {
    fn init_pointer(builder: PointerBuilder<'a>, _size: u32) -> Self {
        Builder::new(builder)
    }

    fn get_from_pointer(builder: PointerBuilder<'a>, _default: Option<&'a [Word]>) -> Result<Self> {
        Ok(Builder::new(builder))
    }
}

impl<'a> Builder<'a> {
    pub fn new(builder: PointerBuilder<'a>) -> Builder<'a> {
        Builder { builder }
    }

    pub fn is_null(&self) -> bool {
        self.builder.is_null()
    }

    pub fn clear(&mut self) {
        self.builder.clear();
    }

    pub fn reborrow(&mut self) -> Builder<'_> {
        Builder {
            builder: self.builder.reborrow(),
        }
    }

    pub fn into_reader(self) -> Reader<'a> {
        Reader::new(self.builder.as_reader())
    }

    pub fn init_as<T: FromPointerBuilder<'a>>(self) -> T {
        T::init_pointer(self.builder, 0)
    }

    pub fn init_as_list<T: FromPointerBuilder<'a>>(self, size: u32) -> T {
        T::init_pointer(self.builder, size)
    }

    pub fn get_as<T: FromPointerBuilder<'a>>(self) -> Result<T> {
        T::get_from_pointer(self.builder, None)
    }

    pub fn set_as<From: SetPointerBuilder>(self, value: From) -> Result<()> {
        SetPointerBuilder::set_pointer_builder(self.builder, value)
    }

    pub fn init_struct(self, size: StructSize) -> StructBuilder<'a> {
        let mut builder = self.builder;
        builder.init_struct(size)
    }

    pub fn get_struct(self, size: StructSize, default: Option<&[Word]>) -> Result<StructBuilder<'a>> {
        let mut builder = self.builder;
        builder.get_struct(size, default)
    }

    pub fn init_list(self, element_size: ElementSize, count: u32) -> ListBuilder<'a> {
        let mut builder = self.builder;
        builder.init_list(element_size, count)
    }

    pub fn get_list(self, element_size: ElementSize) -> Result<ListBuilder<'a>> {
        let mut builder = self.builder;
        builder.get_list(element_size)
    }

    pub fn set_capability(self, handle: Rc<dyn CapabilityHandle>) {
        let mut builder = self.builder;
        builder.set_capability(handle);
    }

    pub fn get_capability(&self) -> Result<Option<Rc<dyn CapabilityHandle>>> {
        self.builder.get_capability()
    }
}
