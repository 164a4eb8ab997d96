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

//! The capability table: an interned, per-message list of opaque handles that
//! "other"/capability pointers index into.
//!
//! This crate has no RPC system of its own, so it doesn't know how to call a
//! capability; it only knows how to store one opaquely, compare two handles
//! for identity, and carry them along when a message is copied. An RPC layer
//! built on top supplies the actual [`CapabilityHandle`] implementation (e.g.
//! a client stub) and is the only thing that ever calls through it.

use alloc::rc::Rc;
use alloc::vec::Vec;

/// An opaque capability handle. The only operation this crate needs is
/// identity comparison, via [`CapabilityHandle::get_ptr`], which a builder's
/// `cap_table` uses to dedupe a capability written into a message more than
/// once.
pub trait CapabilityHandle {
    /// A value that uniquely identifies this capability's identity for as
    /// long as it's alive. Typically the address of some heap allocation the
    /// handle owns or shares.
    fn get_ptr(&self) -> usize;
}

impl core::fmt::Debug for dyn CapabilityHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CapabilityHandle({:x})", self.get_ptr())
    }
}

/// The capability table belonging to a single message. A capability pointer's
/// "other pointer" index refers into this table; [`CapTable::intern`] is how
/// a builder assigns an index to a handle, reusing an existing slot if the
/// same capability (by identity) has already been written.
#[derive(Default)]
pub struct CapTable {
    handles: Vec<Rc<dyn CapabilityHandle>>,
}

impl CapTable {
    pub fn new() -> CapTable {
        CapTable {
            handles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<Rc<dyn CapabilityHandle>> {
        self.handles.get(index as usize).cloned()
    }

    /// Interns `handle`, returning the index it can be referred to by. If a
    /// handle with the same identity (`get_ptr()`) is already present, its
    /// existing index is reused instead of appending a duplicate.
    pub fn intern(&mut self, handle: Rc<dyn CapabilityHandle>) -> u32 {
        let ptr = handle.get_ptr();
        if let Some(index) = self.handles.iter().position(|h| h.get_ptr() == ptr) {
            return index as u32;
        }
        self.handles.push(handle);
        (self.handles.len() - 1) as u32
    }

    /// Copies every handle of `other` into `self`, returning the mapping from
    /// `other`'s indices to `self`'s (post-dedup) indices. Used by
    /// `copy_to` when a struct or list containing capabilities is copied
    /// across messages.
    pub fn merge_from(&mut self, other: &CapTable) -> Vec<u32> {
        other
            .handles
            .iter()
            .map(|h| self.intern(h.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(u8);
    impl CapabilityHandle for Dummy {
        fn get_ptr(&self) -> usize {
            self as *const Dummy as usize
        }
    }

    #[test]
    fn intern_dedupes_by_identity() {
        let mut table = CapTable::new();
        let a: Rc<dyn CapabilityHandle> = Rc::new(Dummy(1));
        let b: Rc<dyn CapabilityHandle> = Rc::new(Dummy(2));

        let ia = table.intern(a.clone());
        let ib = table.intern(b);
        let ia_again = table.intern(a);

        assert_eq!(ia, ia_again);
        assert_ne!(ia, ib);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn merge_from_preserves_relative_order_and_dedupes_across_tables() {
        let mut src = CapTable::new();
        let shared: Rc<dyn CapabilityHandle> = Rc::new(Dummy(9));
        let only_in_src: Rc<dyn CapabilityHandle> = Rc::new(Dummy(3));
        src.intern(shared.clone());
        src.intern(only_in_src);

        let mut dst = CapTable::new();
        dst.intern(shared);
        let mapping = dst.merge_from(&src);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping[0], 0); // shared capability reused dst's existing slot
        assert_ne!(mapping[1], mapping[0]);
    }
}
