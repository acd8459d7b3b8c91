//! PanFS CSI driver: volume provisioning on a PanFS realm and volume
//! publishing on the nodes.

pub mod annotator;
pub mod backend;
pub mod config;
pub mod driver;
pub mod errors;
pub mod kmip;
pub mod units;
pub mod validation;

mod controller;
mod node;

pub use driver::Driver;
