pub mod diagnostic;
pub mod json;

pub use json::PageListWriter;
