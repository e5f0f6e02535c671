pub mod bucket;
pub mod epoch;
pub mod error;
pub mod grouper;
pub mod model;
pub mod pipeline;
pub mod result;
pub mod resume;
pub mod splitter;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;
