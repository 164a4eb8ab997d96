//! Invariants 1-3 and scenario E1: primitive field round-tripping, default
//! encoding, and short-struct backward compatibility.

use capnwire::message::{Builder, HeapAllocator};
use capnwire::private::layout::StructSize;

fn new_message() -> Builder<HeapAllocator> {
    Builder::new_default()
}

#[test]
fn e1_primitive_round_trip() {
    let mut message = new_message();
    let mut root = message.init_root::<capnwire::any_pointer::Builder>();
    let mut s = root.init_struct(StructSize {
        data: 2,
        pointers: 0,
    });

    s.set_data_field::<i32>(0, -7, 0).unwrap();
    s.set_data_field::<u64>(1, 42, 10).unwrap();

    assert_eq!(s.get_data_field::<i32>(0, 0), -7);
    assert_eq!(s.get_data_field::<u64>(1, 10), 42);
}

#[test]
fn default_write_leaves_word_zero() {
    let mut message = new_message();
    let mut root = message.init_root::<capnwire::any_pointer::Builder>();
    let mut s = root.init_struct(StructSize {
        data: 1,
        pointers: 0,
    });

    assert_eq!(s.get_data_field::<u32>(0, 77), 77);
    s.set_data_field::<u32>(0, 77, 77).unwrap();
    assert_eq!(s.get_data_field::<u32>(0, 0), 0);
}

#[test]
fn short_struct_reads_default_beyond_allocated_words() {
    let mut message = new_message();
    let mut root = message.init_root::<capnwire::any_pointer::Builder>();
    let s = root.init_struct(StructSize {
        data: 1,
        pointers: 0,
    });

    assert_eq!(s.get_data_field::<u64>(1, 1234), 1234);
}

quickcheck::quickcheck! {
    fn round_trip_i64(v: i64, default: i64) -> bool {
        let mut message = new_message();
        let mut root = message.init_root::<capnwire::any_pointer::Builder>();
        let mut s = root.init_struct(StructSize { data: 1, pointers: 0 });
        s.set_data_field::<i64>(0, v, default).unwrap();
        s.get_data_field::<i64>(0, default) == v
    }
}
