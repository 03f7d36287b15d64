//! Working out which requested modules are already on the device.
//!
//! Only modules that live under `/data` count as installed: anything served
//! from the system image is the preloaded version and always gets the
//! requested one installed on top.

use std::collections::{HashMap, HashSet};

use log::{self, log_enabled, Level::Debug};

use crate::artifact::{InstallRequest, ModuleArtifact};
use crate::device::{ActivationRecord, Device};

pub const APEX_DATA_DIR: &'static str = "/data/apex/active/";
pub const STAGING_DATA_DIR: &'static str = "/data/app-staging/";
pub const SESSION_DATA_DIR: &'static str = "/data/apex/sessions/";

/// Directories holding installed APEXes, also wiped by the staging cleanup
pub const APEX_DATA_DIRS: [&'static str; 3] = [APEX_DATA_DIR, STAGING_DATA_DIR, SESSION_DATA_DIR];

const APK_DATA_DIR: &'static str = "/data/app/";

/// The outcome of comparing a request against the device
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Modules that still have to go through the install flow
    pub to_install: Vec<ModuleArtifact>,
    /// Packages to uninstall before installing, sorted
    pub to_uninstall: Vec<String>,
    /// Requested packages already on the device at the right version
    pub already_installed: Vec<String>,
}

impl Reconciliation {
    /// Nothing to install and nothing to uninstall
    pub fn is_noop(&self) -> bool {
        self.to_install.is_empty() && self.to_uninstall.is_empty()
    }
}

/// Active APEXes installed under one of [APEX_DATA_DIRS] by name, with the
/// active version
pub fn apex_in_data(active: &HashSet<ActivationRecord>) -> HashMap<String, i64> {
    active
        .iter()
        .filter(|it| {
            APEX_DATA_DIRS
                .iter()
                .any(|dir| it.source_dir.starts_with(dir))
        })
        .map(|it| (it.package_name.clone(), it.version_code))
        .collect()
}

/// Mainline APK modules that have an update installed under `/data/app/`.
///
/// Devices that can't list their mainline modules have none.
pub fn apk_modules_in_data<D>(
    device: &D,
    active: &HashSet<ActivationRecord>,
) -> crate::Result<HashSet<String>>
where
    D: Device + ?Sized,
{
    let mainline = match device.mainline_module_packages()? {
        Some(v) => v,
        None => {
            log::warn!(
                "{} can't list its mainline modules, assuming no apk modules are installed",
                device.serial()
            );
            return Ok(HashSet::new());
        }
    };

    let apex_names: HashSet<&str> = active.iter().map(|it| it.package_name.as_str()).collect();

    let mut in_data = HashSet::new();
    for module in mainline.iter().filter(|it| !apex_names.contains(it.as_str())) {
        let paths = device.package_paths(module)?;
        for path in paths {
            log::debug!("apk module {} at {}", module, path);
            if path.starts_with(APK_DATA_DIR) {
                in_data.insert(module.clone());
            }
        }
    }
    Ok(in_data)
}

/// Splits the request into what has to be installed and what has to be
/// removed first.
///
/// - An APEX in data at the requested version is skipped, at any other
///   version it is uninstalled and then installed again.
/// - An APK module in data with the requested name is skipped.
/// - Anything in data that is not requested is uninstalled.
pub fn reconcile(
    request: &InstallRequest,
    apex_in_data: &HashMap<String, i64>,
    apk_in_data: &HashSet<String>,
) -> Reconciliation {
    let mut res = Reconciliation::default();
    let requested = request.package_name_set();

    for module in request.iter() {
        let name = &module.package_name;
        let installed = match &module.apex_info {
            Some(info) => match apex_in_data.get(name) {
                Some(version) if *version == info.version_code => true,
                Some(version) => {
                    log::info!(
                        "{} is installed at version {}, {} was requested",
                        name,
                        version,
                        info.version_code
                    );
                    res.to_uninstall.push(name.clone());
                    false
                }
                None => false,
            },
            None => apk_in_data.contains(name),
        };

        if installed {
            res.already_installed.push(name.clone());
        } else {
            res.to_install.push(module.clone());
        }
    }

    let unrequested = apex_in_data
        .keys()
        .chain(apk_in_data.iter())
        .filter(|it| !requested.contains(it.as_str()));
    res.to_uninstall.extend(unrequested.cloned());
    res.to_uninstall.sort();
    res.to_uninstall.dedup();

    if log_enabled!(Debug) {
        log::debug!(
            "reconciled: install {:?}, uninstall {:?}, already installed {:?}",
            res.to_install
                .iter()
                .map(|it| it.package_name.as_str())
                .collect::<Vec<_>>(),
            res.to_uninstall,
            res.already_installed
        );
    }

    res
}
