//! Invariant 8 and scenario E6: deep-copying a struct that references both a
//! nested struct and a text field into a fresh destination message. The copy
//! must be structurally equal to the source and independent of it -- later
//! mutating the source must not change what the destination reads back.

use capnwire::message::{Builder, HeapAllocator};
use capnwire::private::layout::StructSize;

const OUTER_SIZE: StructSize = StructSize {
    data: 0,
    pointers: 2,
};
const INNER_SIZE: StructSize = StructSize {
    data: 1,
    pointers: 0,
};

fn build_source() -> Builder<HeapAllocator> {
    let mut message = Builder::new(HeapAllocator::new());
    {
        let root = message.init_root::<capnwire::any_pointer::Builder>();
        let mut outer = root.init_struct(OUTER_SIZE);

        let mut text_ptr = outer.get_pointer(0).unwrap();
        text_ptr.set_text(b"hello capnwire");

        let mut inner = outer
            .get_pointer(1)
            .unwrap()
            .get_struct(INNER_SIZE, None)
            .unwrap();
        inner.set_data_field::<u32>(0, 0x1234_5678, 0).unwrap();
    }
    message
}

#[test]
fn e6_deep_copy_is_structurally_equal_and_independent() {
    let mut src = build_source();
    let mut dst = Builder::new(HeapAllocator::new());

    {
        let src_root = src
            .get_root::<capnwire::any_pointer::Builder>()
            .unwrap()
            .into_reader();
        dst.set_root(src_root).unwrap();
    }

    // mutate the source after the copy; the destination must be unaffected.
    {
        let root = src.get_root::<capnwire::any_pointer::Builder>().unwrap();
        let outer = root.init_struct(OUTER_SIZE);
        let mut inner = outer
            .get_pointer(1)
            .unwrap()
            .get_struct(INNER_SIZE, None)
            .unwrap();
        inner.set_data_field::<u32>(0, 0xDEAD_BEEF, 0).unwrap();
    }

    let dst_root = dst
        .get_root::<capnwire::any_pointer::Builder>()
        .unwrap()
        .into_reader();
    let dst_outer = dst_root.get_struct(None).unwrap();

    let text = dst_outer.get_pointer(0);
    let text_list = text.get_text(None).unwrap();
    assert_eq!(text_list.as_bytes(), b"hello capnwire");

    let inner = dst_outer.get_pointer(1).get_struct(None).unwrap();
    assert_eq!(inner.get_data_field::<u32>(0, 0), 0x1234_5678);
}
