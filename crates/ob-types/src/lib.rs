pub mod errors;
pub mod outcome;
pub mod trial;

pub use errors::*;
pub use outcome::*;
pub use trial::*;
