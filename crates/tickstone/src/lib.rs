#![doc = include_str!("../README.md")]

mod allocator;
mod bound;
mod cursor;
mod error;
mod migration;
mod range;
mod service;
mod store;
mod time;

pub use crate::allocator::*;
pub use crate::bound::*;
pub use crate::cursor::*;
pub use crate::error::*;
pub use crate::migration::*;
pub use crate::range::*;
pub use crate::service::*;
pub use crate::store::*;
pub use crate::time::*;
