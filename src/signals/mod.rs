pub mod extractor;
pub mod policy;
