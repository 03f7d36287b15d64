pub mod activation;

pub mod artifact;
pub use artifact::{ApexInfo, InstallRequest, ModuleArtifact};

pub mod command;
pub use command::run_cmd;

pub mod config;
pub use config::InstallConfig;

pub mod device;
pub use device::Device;

pub mod errors;
pub use errors::{Error, Result};

pub mod installer;
pub use installer::{ModuleInstaller, SetupReport};

pub mod introspect;

pub mod reconcile;

pub mod session;

pub mod utils;
pub use utils::fs::DEVICE_PATH_SEP;

#[cfg(test)]
pub mod testing;
