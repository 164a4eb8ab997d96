//! Invariant 8: compacting a struct whose trailing data and pointer words
//! are all zero shrinks both the handle's own reported shape and, when
//! nothing has been allocated past it since, the segment's high-water mark.

use capnwire::message::{Builder, HeapAllocator};
use capnwire::private::layout::StructSize;

#[test]
fn compact_trims_trailing_zero_words_and_updates_shape() {
    let mut message = Builder::new(HeapAllocator::new());
    let root = message.init_root::<capnwire::any_pointer::Builder>();
    let mut s = root.init_struct(StructSize {
        data: 3,
        pointers: 2,
    });

    // only the first data word and no pointers are ever written; the rest
    // stay at their default zero value.
    s.set_data_field::<u64>(0, 0x1, 0).unwrap();

    assert_eq!(s.data_size_bits(), 3 * 64);
    assert_eq!(s.pointer_count(), 2);

    s.compact(false);

    assert_eq!(s.data_size_bits(), 64);
    assert_eq!(s.pointer_count(), 0);
    assert_eq!(s.get_data_field::<u64>(0, 0), 0x1);
}

#[test]
fn compact_reclaims_segment_tail_when_nothing_allocated_since() {
    let mut message = Builder::new(HeapAllocator::new());
    let root = message.init_root::<capnwire::any_pointer::Builder>();
    let mut s = root.init_struct(StructSize {
        data: 4,
        pointers: 0,
    });
    s.set_data_field::<u64>(0, 0xFF, 0).unwrap();

    let before = message.get_segments_for_output();
    let before_words: usize = before.iter().map(|seg| seg.len()).sum();

    s.compact(true);

    let after = message.get_segments_for_output();
    let after_words: usize = after.iter().map(|seg| seg.len()).sum();

    assert!(after_words < before_words);
}

#[test]
fn compact_is_a_no_op_when_nothing_trims() {
    let mut message = Builder::new(HeapAllocator::new());
    let root = message.init_root::<capnwire::any_pointer::Builder>();
    let mut s = root.init_struct(StructSize {
        data: 1,
        pointers: 0,
    });
    s.set_data_field::<u64>(0, u64::MAX, 0).unwrap();

    s.compact(true);

    assert_eq!(s.data_size_bits(), 64);
    assert_eq!(s.get_data_field::<u64>(0, 0), u64::MAX);
}
