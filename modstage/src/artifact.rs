use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::errors::SetupError;
use crate::utils::{file_name_lossy, path_has_suffix};

pub const APEX_SUFFIX: &'static str = ".apex";
pub const APK_SUFFIX: &'static str = ".apk";
pub const SPLIT_APKS_SUFFIX: &'static str = ".apks";

/// What a local module file is, judged by its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Apex,
    Apk,
    SplitApks,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        // .apks has to be checked before .apk
        if path_has_suffix(path, SPLIT_APKS_SUFFIX) {
            Some(Self::SplitApks)
        } else if path_has_suffix(path, APEX_SUFFIX) {
            Some(Self::Apex)
        } else if path_has_suffix(path, APK_SUFFIX) {
            Some(Self::Apk)
        } else {
            None
        }
    }
}

/// Name and version of an APEX we expect to see active after install
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApexInfo {
    pub package_name: String,
    pub version_code: i64,
}

impl ApexInfo {
    pub fn new<S: Into<String>>(package_name: S, version_code: i64) -> Self {
        Self {
            package_name: package_name.into(),
            version_code,
        }
    }
}

impl Display for ApexInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "packageName: {}, versionCode: {}",
            self.package_name, self.version_code
        )
    }
}

/// Reads package metadata out of local module files
pub trait Introspector: Send + Sync {
    /// Package name of an APK or APEX file
    fn package_name(&self, file: &Path) -> crate::Result<String>;

    /// Package name and version of an APEX file
    fn apex_info(&self, file: &Path) -> crate::Result<ApexInfo>;
}

/// Extracts the splits matching the device out of an `.apks` bundle.
///
/// `Ok(None)` means the bundle holds nothing for this device.
pub trait SplitExtractor: Send + Sync {
    fn extract_splits(&self, apks: &Path) -> crate::Result<Option<Vec<PathBuf>>>;
}

/// Maps declared module names to files on the host
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, name: &Path) -> crate::Result<PathBuf>;
}

/// Resolves relative module names against a list of directories, absolute
/// names are used as they are.
#[derive(Debug, Clone, Default)]
pub struct DirResolver {
    search_dirs: Vec<PathBuf>,
}

impl DirResolver {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    pub fn with_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.search_dirs.push(dir.into());
        self
    }
}

impl ArtifactResolver for DirResolver {
    fn resolve(&self, name: &Path) -> crate::Result<PathBuf> {
        if name.is_absolute() {
            return Ok(name.to_path_buf());
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| SetupError::ArtifactNotFound(name.to_path_buf()).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Apex,
    Apk,
}

/// One package to install and the file(s) holding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArtifact {
    pub package_name: String,
    pub kind: ModuleKind,
    pub files: Vec<PathBuf>,
    /// Set for APEX modules
    pub apex_info: Option<ApexInfo>,
}

impl ModuleArtifact {
    pub fn apk<S: Into<String>>(package_name: S, files: Vec<PathBuf>) -> Self {
        Self {
            package_name: package_name.into(),
            kind: ModuleKind::Apk,
            files,
            apex_info: None,
        }
    }

    pub fn apex(info: ApexInfo, files: Vec<PathBuf>) -> Self {
        Self {
            package_name: info.package_name.clone(),
            kind: ModuleKind::Apex,
            files,
            apex_info: Some(info),
        }
    }

    #[inline]
    pub fn is_apex(&self) -> bool {
        self.kind == ModuleKind::Apex
    }

    /// Inspect a local module file.
    ///
    /// `.apks` bundles are split first and may yield several modules, an
    /// empty list is returned when the bundle has nothing for the device.
    pub fn from_file(
        file: &Path,
        introspector: &dyn Introspector,
        extractor: Option<&dyn SplitExtractor>,
    ) -> crate::Result<Vec<Self>> {
        let kind = ArtifactKind::from_path(file).ok_or_else(|| SetupError::InvalidArtifact {
            path: file.to_path_buf(),
            reason: String::from("not an .apex, .apk or .apks file"),
        })?;

        match kind {
            ArtifactKind::Apex => {
                let info = introspector.apex_info(file)?;
                Ok(vec![Self::apex(info, vec![file.to_path_buf()])])
            }
            ArtifactKind::Apk => {
                let name = introspector.package_name(file)?;
                Ok(vec![Self::apk(name, vec![file.to_path_buf()])])
            }
            ArtifactKind::SplitApks => Self::from_split_apks(file, introspector, extractor),
        }
    }

    /// Every extracted `.apex` split is its own module since an APEX session
    /// holds a single file. The `.apk` splits share one APK module.
    fn from_split_apks(
        file: &Path,
        introspector: &dyn Introspector,
        extractor: Option<&dyn SplitExtractor>,
    ) -> crate::Result<Vec<Self>> {
        let extractor = extractor.ok_or_else(|| SetupError::InvalidArtifact {
            path: file.to_path_buf(),
            reason: String::from("no split extractor configured for .apks bundles"),
        })?;

        let mut splits = match extractor.extract_splits(file)? {
            Some(v) => v,
            None => {
                log::warn!(
                    "{} has nothing for this device and will not be installed",
                    file.to_string_lossy()
                );
                return Ok(Vec::new());
            }
        };
        if splits.is_empty() {
            return Err(SetupError::ExtractionFailed(file.to_path_buf()).into());
        }
        splits.sort();

        let mut modules = Vec::new();
        let mut apks = Vec::new();
        for split in splits {
            match ArtifactKind::from_path(&split) {
                Some(ArtifactKind::Apex) => {
                    let info = introspector.apex_info(&split)?;
                    modules.push(Self::apex(info, vec![split]));
                }
                Some(ArtifactKind::Apk) => apks.push(split),
                _ => {
                    return Err(SetupError::InvalidArtifact {
                        path: split,
                        reason: format!("unexpected split in {}", file_name_lossy(file)),
                    }
                    .into())
                }
            }
        }

        if !apks.is_empty() {
            let name = introspector.package_name(&apks[0])?;
            if !modules.is_empty() {
                log::info!(
                    "{} mixes apex and apk splits, {} gets its own session",
                    file_name_lossy(file),
                    name
                );
            }
            modules.push(Self::apk(name, apks));
        }

        log::trace!(
            "{} extracted to {} module(s)",
            file_name_lossy(file),
            modules.len()
        );
        Ok(modules)
    }
}

/// The ordered set of modules a single setup installs.
///
/// Package names are unique and every module has at least one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    modules: Vec<ModuleArtifact>,
}

impl InstallRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_modules<I>(modules: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = ModuleArtifact>,
    {
        let mut req = Self::new();
        for m in modules {
            req.add(m)?;
        }
        Ok(req)
    }

    pub fn add(&mut self, module: ModuleArtifact) -> crate::Result<()> {
        if module.files.is_empty() {
            return Err(SetupError::InvalidArtifact {
                path: PathBuf::from(&module.package_name),
                reason: String::from("module has no files"),
            }
            .into());
        }
        if self.contains(&module.package_name) {
            return Err(SetupError::DuplicateModule {
                package: module.package_name,
            }
            .into());
        }
        self.modules.push(module);
        Ok(())
    }

    pub fn contains(&self, package: &str) -> bool {
        self.modules.iter().any(|it| it.package_name == package)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn modules(&self) -> &[ModuleArtifact] {
        &self.modules
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleArtifact> {
        self.modules.iter()
    }

    pub fn package_names(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|it| it.package_name.clone())
            .collect()
    }

    pub fn package_name_set(&self) -> HashSet<&str> {
        self.modules
            .iter()
            .map(|it| it.package_name.as_str())
            .collect()
    }

    /// Expected activation info for every APEX in the request
    pub fn apex_infos(&self) -> Vec<ApexInfo> {
        self.modules
            .iter()
            .filter_map(|it| it.apex_info.clone())
            .collect()
    }
}

impl IntoIterator for InstallRequest {
    type Item = ModuleArtifact;
    type IntoIter = std::vec::IntoIter<ModuleArtifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.modules.into_iter()
    }
}
