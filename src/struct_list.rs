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

//! List of structs, addressed by index. Backed by an inline-composite list on
//! the wire: a tag word carrying the per-element data/pointer section sizes,
//! followed by the elements themselves packed end to end.

use core::marker;

use crate::Result;
use crate::private::layout::{ListBuilder, ListReader, PointerBuilder, PointerReader};
use crate::traits::{
    FromPointerBuilder, FromPointerReader, FromStructBuilder, FromStructReader, HasStructSize,
    IndexMove, ListIter,
};

pub struct Reader<'a, T> {
    marker: marker::PhantomData<T>,
    reader: ListReader<'a>,
}

impl<T> Clone for Reader<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Reader<'_, T> {}

impl<'a, T> Reader<'a, T> {
    pub fn len(&self) -> u32 {
        self.reader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(self) -> ListIter<Reader<'a, T>, T::Reader<'a>>
    where
        T: crate::traits::Owned,
        T::Reader<'a>: FromStructReader<'a>,
    {
        let l = self.len();
        ListIter::new(self, l)
    }
}

impl<'a, T> Reader<'a, T>
where
    T: crate::traits::Owned,
    T::Reader<'a>: FromStructReader<'a>,
{
    pub fn get(&self, index: u32) -> T::Reader<'a> {
        assert!(index < self.len());
        FromStructReader::new(self.reader.get_struct_element(index))
    }
}

impl<'a, T> FromPointerReader<'a> for Reader<'a, T>
where
    T: crate::traits::Owned,
    T::Reader<'a>: FromStructReader<'a>,
{
    fn get_from_pointer(
        reader: &PointerReader<'a>,
        _default: Option<&'a [crate::Word]>,
    ) -> Result<Reader<'a, T>> {
        Ok(Reader {
            reader: reader.get_list()?,
            marker: marker::PhantomData,
        })
    }
}

impl<'a, T> IndexMove<u32, T::Reader<'a>> for Reader<'a, T>
where
    T: crate::traits::Owned,
    T::Reader<'a>: FromStructReader<'a>,
{
    fn index_move(&self, index: u32) -> T::Reader<'a> {
        self.get(index)
    }
}

impl<'a, T> crate::traits::IntoInternalListReader<'a> for Reader<'a, T> {
    fn into_internal_list_reader(self) -> ListReader<'a> {
        self.reader
    }
}

pub struct Builder<'a, T> {
    marker: marker::PhantomData<T>,
    builder: ListBuilder<'a>,
}

impl<'a, T> Builder<'a, T> {
    pub fn len(&self) -> u32 {
        self.builder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_reader(self) -> Reader<'a, T> {
        Reader {
            marker: marker::PhantomData,
            reader: self.builder.as_reader(),
        }
    }

    pub fn reborrow(&mut self) -> Builder<'_, T> {
        Builder {
            marker: marker::PhantomData,
            builder: self.builder.reborrow(),
        }
    }
}

impl<'a, T> Builder<'a, T>
where
    T: crate::traits::Owned,
    T::Builder<'a>: FromStructBuilder<'a>,
{
    pub fn get(&mut self, index: u32) -> T::Builder<'a> {
        assert!(index < self.len());
        FromStructBuilder::new(self.builder.get_struct_element(index))
    }
}

impl<'a, T> FromPointerBuilder<'a> for Builder<'a, T>
where
    T: HasStructSize,
{
    fn init_pointer(mut builder: PointerBuilder<'a>, size: u32) -> Builder<'a, T> {
        Builder {
            builder: builder.init_struct_list(size, T::struct_size()),
            marker: marker::PhantomData,
        }
    }

    fn get_from_pointer(
        mut builder: PointerBuilder<'a>,
        _default: Option<&'a [crate::Word]>,
    ) -> Result<Builder<'a, T>> {
        Ok(Builder {
            builder: builder.get_list(crate::private::layout::ElementSize::InlineComposite)?,
            marker: marker::PhantomData,
        })
    }
}

impl<'a, T> crate::traits::SetPointerBuilder for Reader<'a, T> {
    fn set_pointer_builder(mut pointer: PointerBuilder<'_>, value: Reader<'a, T>) -> Result<()> {
        pointer.set_list(&value.reader)
    }
}

impl<'a, T> ::core::iter::IntoIterator for Reader<'a, T>
where
    T: crate::traits::Owned,
    T::Reader<'a>: FromStructReader<'a>,
{
    type Item = T::Reader<'a>;
    type IntoIter = ListIter<Reader<'a, T>, Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
