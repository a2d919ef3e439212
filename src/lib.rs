#![forbid(unsafe_code)]

pub mod cli;
pub mod extract;
pub mod fetch;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod rank;
pub mod report;
pub mod store;
