mod config;
mod timestamps;

pub use config::*;
pub use timestamps::*;
