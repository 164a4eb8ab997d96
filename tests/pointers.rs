//! Invariants 4-6 and scenarios E2-E4: near-pointer, far-pointer, and
//! double-far pointer construction, exercised end to end through the public
//! message/any_pointer API. The exact wire encoding of each case (near vs.
//! far vs. double-far) is covered by the inline unit tests in
//! `private::layout`, which have access to the raw pointer bits; here we only
//! check that a reader sees the same struct regardless of how its pointer
//! had to be encoded.

use capnwire::message::{AllocationStrategy, Builder, HeapAllocator};
use capnwire::private::layout::StructSize;

const CHILD_SIZE: StructSize = StructSize {
    data: 1,
    pointers: 0,
};

fn write_and_read_back(first_segment_words: u32, strategy: AllocationStrategy) -> u32 {
    let allocator = HeapAllocator::new()
        .first_segment_words(first_segment_words)
        .allocation_strategy(strategy);
    let mut message = Builder::new(allocator);

    {
        let root = message.init_root::<capnwire::any_pointer::Builder>();
        let mut a = root.init_struct(StructSize {
            data: 0,
            pointers: 1,
        });
        let mut p = a.get_pointer(0).unwrap();
        let mut b = p.get_struct(CHILD_SIZE, None).unwrap();
        b.set_data_field::<u32>(0, 0xCAFEBABE, 0).unwrap();
    }

    let a = message
        .get_root::<capnwire::any_pointer::Builder>()
        .unwrap()
        .into_reader();
    let a_struct = a.get_struct(None).unwrap();
    let b_struct = a_struct.get_pointer(0).get_struct(None).unwrap();
    b_struct.get_data_field::<u32>(0, 0)
}

#[test]
fn e2_same_segment_pointer() {
    // Plenty of room: A and B land in the same segment, a near pointer.
    let value = write_and_read_back(1024, AllocationStrategy::GrowHeuristically);
    assert_eq!(value, 0xCAFEBABE);
}

#[test]
fn e3_cross_segment_pointer_one_word_budget() {
    // A one-word fixed segment budget leaves no slack in either A's or B's
    // segment, so the pointer from A to B must be lifted out of a plain
    // near pointer -- into a far pointer, or, if neither segment has room
    // for even a single landing-pad word, a double-far. Which of the two
    // gets chosen is an implementation detail covered by the white-box
    // `far_pointer_across_segments` unit test in `private::layout`; here we
    // only care that the read-back value survives the trip.
    let value = write_and_read_back(1, AllocationStrategy::FixedSize);
    assert_eq!(value, 0xCAFEBABE);
}

#[test]
fn e4_cross_segment_pointer_tight_budget_repeated() {
    // Same tight budget, run twice in the same process to catch any
    // allocator state that isn't correctly reset between independent
    // messages (e.g. a `next_size` heuristic leaking across builders).
    for _ in 0..2 {
        let value = write_and_read_back(1, AllocationStrategy::FixedSize);
        assert_eq!(value, 0xCAFEBABE);
    }
}
