#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod aggregate;
pub mod combinations;
pub mod design;
pub mod extract;
pub mod fixtures;
pub mod lims;
pub mod panel;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod summarize;
pub mod types;
