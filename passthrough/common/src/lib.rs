extern crate toml;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_yaml;
#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod facts;
pub mod pci_device;
pub mod runner;
pub mod util;

pub use crate::error::ConfigurationError;
