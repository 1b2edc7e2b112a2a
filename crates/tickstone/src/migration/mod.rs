mod interface;
mod migrator;

pub use interface::*;
pub use migrator::*;
