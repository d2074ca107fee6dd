pub mod analytics;
pub mod pipeline;

pub use analytics::*;
pub use pipeline::*;
