//! Installing a train of mainline modules and taking it back out.
//!
//! [ModuleInstaller::setup] stages every requested module in one atomic
//! install, reboots to activate it and checks the APEXes came up.
//! [ModuleInstaller::teardown] rolls the train back afterwards.
//!
//! With [InstallConfig::reuse_installed_modules] set, modules are left on the
//! device between runs and the next setup only touches what changed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use itertools::join;
use log::{self, log_enabled, Level::Debug};

use crate::activation::check_apex_activation;
use crate::artifact::{
    ApexInfo, ArtifactResolver, DirResolver, InstallRequest, Introspector, ModuleArtifact,
    SplitExtractor, SPLIT_APKS_SUFFIX,
};
use crate::config::InstallConfig;
use crate::device::{uninstall_succeeded, ActivationRecord, Device};
use crate::errors::{RuntimeFailure, SetupError};
use crate::introspect::HostIntrospector;
use crate::reconcile::{apex_in_data, apk_modules_in_data, reconcile, APEX_DATA_DIRS};
use crate::session::{push_modules, rollback_cmd, SessionOptions, SessionState, Transaction};
use crate::utils::list_files_with_suffix;

const MODULE_VERSION_PROP_SUFFIX: &'static str = "_version_used";

/// API level that needs to wait for the staged session before rebooting
const STAGING_WAIT_API: u32 = 29;

/// What teardown needs to know to undo a setup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackState {
    /// Sessions were created with `--enable-rollback`
    pub enabled: bool,
    /// Whether the train made it through commit
    pub committed: bool,
    /// Every APEX in the train, recorded before installing
    pub expected: Vec<ApexInfo>,
}

/// Summary of a [ModuleInstaller::setup] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// Packages that went through the install flow
    pub installed: Vec<String>,
    /// Requested packages that were already on the device
    pub already_installed: Vec<String>,
    /// Packages removed before installing
    pub uninstalled: Vec<String>,
    /// Expected versions of the installed APEXes
    pub apex_versions: Vec<ApexInfo>,
    pub rebooted: bool,
}

impl SetupReport {
    /// `<package>_version_used` attributes for every installed APEX
    pub fn version_attributes(&self) -> Vec<(String, String)> {
        self.apex_versions
            .iter()
            .map(|it| {
                (
                    format!("{}{}", it.package_name, MODULE_VERSION_PROP_SUFFIX),
                    it.version_code.to_string(),
                )
            })
            .collect()
    }
}

pub struct ModuleInstaller<D: Device> {
    device: D,
    config: InstallConfig,
    introspector: Box<dyn Introspector>,
    extractor: Option<Box<dyn SplitExtractor>>,
    resolver: Box<dyn ArtifactResolver>,
    rollback: RollbackState,
    installed: Vec<String>,
}

impl<D: Device> ModuleInstaller<D> {
    pub fn new(device: D, config: InstallConfig, introspector: Box<dyn Introspector>) -> Self {
        Self {
            device,
            config,
            introspector,
            extractor: None,
            resolver: Box::new(DirResolver::default()),
            rollback: RollbackState::default(),
            installed: Vec::new(),
        }
    }

    /// Installer reading module metadata with a [HostIntrospector]
    pub fn with_host_introspector(device: D, config: InstallConfig) -> Self {
        Self::new(device, config, Box::new(HostIntrospector::new()))
    }

    /// Needed to install `.apks` bundles
    pub fn with_split_extractor(mut self, extractor: Box<dyn SplitExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ArtifactResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    pub fn rollback_state(&self) -> &RollbackState {
        &self.rollback
    }

    /// Packages installed by the last successful setup
    pub fn installed_packages(&self) -> &[String] {
        &self.installed
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            enable_rollback: self.config.enable_rollback,
            staged_ready_timeout: self.config.staged_ready_timeout,
        }
    }

    /// Install `modules` on the device.
    ///
    /// Module names are resolved through the configured [ArtifactResolver].
    /// Any error is returned as is; call [ModuleInstaller::teardown] with it
    /// afterwards either way.
    pub fn setup(&mut self, modules: &[PathBuf]) -> crate::Result<SetupReport> {
        // Teardown only ever undoes what this setup staged
        self.rollback = RollbackState::default();
        self.installed.clear();

        let files = self.module_files(modules)?;
        if files.is_empty() {
            log::info!("No apk/apex module file to install. Skipping.");
            return Ok(SetupReport::default());
        }

        if !self.config.reuse_installed_modules {
            self.clean_up_staged_data()?;
        }

        let active = self.device.active_apexes()?;
        if log_enabled!(Debug) {
            log::debug!("Activated apex packages before installation:");
            for record in active.iter() {
                log::debug!("  {}", record);
            }
        }

        let request = self.build_request(&files, &active)?;
        if request.is_empty() {
            log::info!("No modules are preloaded on the device, so no modules will be installed.");
            return Ok(SetupReport::default());
        }

        let mut report = SetupReport::default();
        let request = if self.config.reuse_installed_modules {
            let apk_in_data = apk_modules_in_data(&self.device, &active)?;
            let rec = reconcile(&request, &apex_in_data(&active), &apk_in_data);

            for package in rec.to_uninstall.iter() {
                self.uninstall(package)?;
            }
            if !rec.to_uninstall.is_empty() {
                self.activate_staged_install()?;
                report.rebooted = true;
            }
            report.already_installed = rec.already_installed;
            report.uninstalled = rec.to_uninstall;

            if rec.to_install.is_empty() {
                log::info!("All required modules are installed");
                return Ok(report);
            }
            InstallRequest::from_modules(rec.to_install)?
        } else {
            request
        };

        self.rollback = RollbackState {
            enabled: self.config.enable_rollback,
            committed: false,
            expected: request.apex_infos(),
        };

        self.install(&request)?;

        self.installed = request.package_names();
        report.installed = self.installed.clone();
        report.apex_versions = request.apex_infos();
        report.rebooted = true;
        log::info!("Train activation succeeded.");
        Ok(report)
    }

    /// Undo the last setup.
    ///
    /// `setup_error` is whatever setup failed with, teardown is skipped when
    /// the device went away. A rollback that doesn't succeed is a
    /// [RuntimeFailure].
    pub fn teardown(&mut self, setup_error: Option<&crate::Error>) -> crate::Result<()> {
        if self.config.reuse_installed_modules {
            log::debug!("Skipping teardown as the installed modules may be used for the next run.");
            return Ok(());
        }
        if setup_error.map_or(false, |it| it.is_device_not_available()) {
            log::error!(
                "Device {} is not available. Teardown skipped.",
                self.device.serial()
            );
            return Ok(());
        }

        let rollback = std::mem::take(&mut self.rollback);
        let installed = std::mem::take(&mut self.installed);

        if rollback.expected.is_empty() {
            for package in installed.iter() {
                self.uninstall(package)?;
            }
            return Ok(());
        }

        if rollback.enabled && rollback.committed {
            self.roll_back(&rollback.expected)?;
            log::info!("Wait for rollback fully done.");
            sleep(self.config.rollback_wait);
        }

        log::info!("Clean up staged and active session.");
        self.clean_up_staged_data()?;
        self.device.reboot()
    }

    /// The given modules followed by every `.apks` file of the train
    /// directory, if configured
    fn module_files(&self, modules: &[PathBuf]) -> crate::Result<Vec<PathBuf>> {
        let mut files = modules.to_vec();
        if let Some(train) = &self.config.train_path {
            files.extend(list_files_with_suffix(train, SPLIT_APKS_SUFFIX)?);
        }
        Ok(files)
    }

    /// Inspect every file and keep the modules the device preloads
    fn build_request(
        &self,
        files: &[PathBuf],
        active: &HashSet<ActivationRecord>,
    ) -> crate::Result<InstallRequest> {
        let mut preloaded = self.device.installed_package_names()?;
        preloaded.extend(active.iter().map(|it| it.package_name.clone()));

        let mut request = InstallRequest::new();
        for name in files {
            let file = self.resolver.resolve(name)?;
            let extractor = self.extractor.as_deref();
            for module in ModuleArtifact::from_file(&file, &*self.introspector, extractor)? {
                if !preloaded.contains(&module.package_name) {
                    if !self.config.ignore_if_not_preloaded {
                        log::info!(
                            "The following modules are preloaded on the device: {}",
                            join(preloaded.iter(), ", ")
                        );
                        return Err(SetupError::NotPreloaded {
                            package: module.package_name,
                        }
                        .into());
                    }
                    log::info!(
                        "The module package {} is not preloaded on the device \
                         but is included in the train.",
                        module.package_name
                    );
                    continue;
                }

                log::info!("Found preloaded module for {}.", module.package_name);
                request.add(module)?;
            }
        }
        Ok(request)
    }

    fn install(&mut self, request: &InstallRequest) -> crate::Result<()> {
        let modules = request.modules();
        log::info!(
            "Staging install for {}",
            join(modules.iter().map(|it| it.package_name.as_str()), ", ")
        );

        push_modules(&self.device, modules)?;

        let mut txn = Transaction::new(&self.device, self.session_options());
        txn.stage(modules)?;
        self.rollback.committed = true;

        txn.advance(SessionState::Rebooting)?;
        let res = self.activate_staged_install();
        txn.track(res)?;

        let expected = request.apex_infos();
        if expected.is_empty() {
            return txn.advance(SessionState::Verified);
        }
        txn.advance(SessionState::Verifying)?;
        let res = check_apex_activation(&self.device, &expected);
        txn.track(res)?;
        txn.advance(SessionState::Verified)
    }

    /// Reboot the device so staged sessions get applied
    fn activate_staged_install(&self) -> crate::Result<()> {
        let staging_wait = self.config.apex_staging_wait;
        if !staging_wait.is_zero() && self.device.api_level()? == STAGING_WAIT_API {
            sleep(staging_wait);
        }

        log::info!("Rebooting {} to activate the staged install.", self.device.serial());
        self.device.reboot()?;
        self.device.wait_for_available()?;

        // Some devices need extra time after a reboot to be fully ready
        let extra_wait = self.config.extra_boot_wait;
        if !extra_wait.is_zero() {
            sleep(extra_wait);
            self.device.wait_for_available()?;
            self.device.post_boot_setup()?;
        }
        Ok(())
    }

    fn roll_back(&self, expected: &[ApexInfo]) -> crate::Result<()> {
        // Rolling back one module of the train rolls back all of them
        let first = match expected.first() {
            Some(v) => v,
            None => return Ok(()),
        };
        let output = self.device.shell(&rollback_cmd(&first.package_name))?;
        if !output.stdout.contains("Success") {
            return Err(RuntimeFailure::RollbackFailed {
                package: first.package_name.clone(),
                output: output.stdout,
            }
            .into());
        }
        log::info!("Rolled back the train through {}.", first.package_name);
        Ok(())
    }

    fn uninstall(&self, package: &str) -> crate::Result<()> {
        log::info!("Uninstalling module: {}", package);
        let output = self.device.uninstall_package(package)?;
        if !uninstall_succeeded(output.as_deref()) {
            log::warn!(
                "Failed to uninstall {}: {}",
                package,
                output.unwrap_or_default()
            );
        }
        Ok(())
    }

    /// Best effort removal of active and staged APEX data. Only a missing
    /// device stops it.
    fn clean_up_staged_data(&self) -> crate::Result<()> {
        for dir in APEX_DATA_DIRS {
            match self.device.delete_file(&format!("{}*", dir)) {
                Ok(()) => {}
                Err(e) if e.is_device_not_available() => return Err(e),
                Err(e) => log::warn!("Failed to clean up {}: {}", dir, e),
            }
        }
        Ok(())
    }
}

#[inline]
fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
