pub mod entries;
pub mod stage;

pub use entries::*;
pub use stage::*;
