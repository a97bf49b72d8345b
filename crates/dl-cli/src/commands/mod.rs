//! CLI command implementations

pub(crate) mod checkpoint;
pub(crate) mod common;
pub(crate) mod quality;
pub(crate) mod run;
pub(crate) mod runs;
