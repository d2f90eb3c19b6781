//! Byte-level storage: a key-value engine trait, its in-memory implementation,
//! an order-preserving key codec and the MVCC layer built on top of them.

pub mod engine;
pub mod keycode;
pub mod memory;
pub mod mvcc;
