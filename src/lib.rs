#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde;

#[macro_use]
pub mod log;
pub mod common;
pub mod errors;
pub mod paths;
pub mod arch;
pub mod graph;
pub mod mux;
pub mod decoder;
pub mod netlist;
pub mod dot_exporter;
