//! Device and simulator discovery.
//!
//! Discovery runs an external listing tool in the background. Results are
//! exposed through [`LoadingList`]s: queries can be composed right away and
//! only block once they are enumerated.

#![warn(missing_docs)]

pub mod error;
pub mod loading;
pub mod query;
pub mod xml;
pub mod discovery;
pub mod simulators;
pub mod devices;
pub mod catalog;

pub use error::CatalogError;
pub use loading::LoadingList;
pub use query::Query;
pub use discovery::{CommandDiscoveryTool, DiscoveryTool};
pub use simulators::{SimulatorSelection, Simulators};
pub use devices::Devices;
pub use catalog::DeviceCatalog;
