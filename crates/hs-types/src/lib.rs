pub mod config;
pub mod document;
pub mod errors;
pub mod trial;

pub use config::*;
pub use document::*;
pub use errors::*;
pub use trial::*;
