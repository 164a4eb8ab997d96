//! Little-endian storage for the primitive types that can occupy a struct's
//! data section or a pointer word. The wire format is defined to be
//! little-endian regardless of host endianness, so every multi-byte read and
//! write goes through [`WireValue`], which stores bytes in wire order and
//! converts on access.

/// A type that can be stored in its wire (little-endian) byte representation
/// and converted back to host representation on access.
pub trait Endian: Copy {
    fn from_le(self) -> Self;
    fn to_le(self) -> Self;
}

macro_rules! endian_impl {
    ($t:ty) => {
        impl Endian for $t {
            #[inline]
            fn from_le(self) -> Self {
                <$t>::from_le(self)
            }
            #[inline]
            fn to_le(self) -> Self {
                self.to_le()
            }
        }
    };
}

endian_impl!(u8);
endian_impl!(u16);
endian_impl!(u32);
endian_impl!(u64);
endian_impl!(i8);
endian_impl!(i16);
endian_impl!(i32);
endian_impl!(i64);

impl Endian for f32 {
    #[inline]
    fn from_le(self) -> Self {
        f32::from_bits(u32::from_le(self.to_bits()))
    }
    #[inline]
    fn to_le(self) -> Self {
        f32::from_bits(self.to_bits().to_le())
    }
}

impl Endian for f64 {
    #[inline]
    fn from_le(self) -> Self {
        f64::from_bits(u64::from_le(self.to_bits()))
    }
    #[inline]
    fn to_le(self) -> Self {
        f64::from_bits(self.to_bits().to_le())
    }
}

/// A value of type `T` stored in wire (little-endian) byte order. `get`/`set`
/// do the conversion; nothing else in the crate is allowed to read the raw
/// bytes directly.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct WireValue<T> {
    value: T,
}

impl<T: Endian> WireValue<T> {
    #[inline]
    pub fn new(value: T) -> Self {
        WireValue {
            value: value.to_le(),
        }
    }

    #[inline]
    pub fn get(&self) -> T {
        self.value.from_le()
    }

    #[inline]
    pub fn set(&mut self, value: T) {
        self.value = value.to_le();
    }
}
