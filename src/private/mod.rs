//! Implementation details not meant to be used directly by clients of this
//! crate. Code generators build typed accessors on top of [`layout`]; nothing
//! else in this module is part of the stable surface.

pub mod arena;
pub mod endian;
pub mod layout;
pub mod units;
