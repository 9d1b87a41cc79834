//! Tuple-level types shared between the heap file and its callers.
//!
//! Query operators see tables as streams of [`Tuple`]s; the tuple's embedded
//! [`TupleId`] carries the page identity the storage core needs to route a
//! delete back to the owning page.

pub mod tuple;

pub use tuple::{Tuple, TupleId};
