pub mod errors;
pub mod metric;
pub mod outcome;

pub use errors::*;
pub use metric::*;
pub use outcome::*;
