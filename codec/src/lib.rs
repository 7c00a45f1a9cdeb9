mod block;
mod boc;
mod builder;
mod cell;
mod dict;

pub use block::*;
pub use boc::*;
pub use builder::*;
pub use cell::*;
pub use dict::*;
