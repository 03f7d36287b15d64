use std::borrow::Cow;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use toml::{Table, Value};

use crate::utils::read_file;

#[derive(Debug)]
pub enum Error {
    InvalidType,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidType => write!(f, "InvalidType"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Knobs for a [crate::installer::ModuleInstaller].
///
/// In a config file these live under an `[install]` table, durations are
/// given in milliseconds:
///
/// ```toml
/// [install]
/// enable-rollback = true
/// staged-ready-timeout-ms = 60000
/// rollback-wait-ms = 60000
/// ignore-if-module-not-preloaded = false
/// skip-apex-teardown = false
/// train-path = "/path/to/train"
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
    /// Add `--enable-rollback` to every session and roll back on teardown
    pub enable_rollback: bool,

    /// Passed along as `--staged-ready-timeout` when creating sessions
    pub staged_ready_timeout: Option<Duration>,

    /// How long to wait for the staged session before rebooting, only used
    /// on API level 29
    pub apex_staging_wait: Duration,

    /// How long to wait for a rollback to complete on teardown
    pub rollback_wait: Duration,

    /// Extra time to wait after the activation reboot for slow devices
    pub extra_boot_wait: Duration,

    /// Skip modules that are not preloaded instead of failing
    pub ignore_if_not_preloaded: bool,

    /// Keep modules installed after teardown and only install what changed
    /// on the next setup
    pub reuse_installed_modules: bool,

    /// Every `.apks` file directly in this directory is added to the modules
    pub train_path: Option<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            enable_rollback: true,
            staged_ready_timeout: None,
            apex_staging_wait: Duration::ZERO,
            rollback_wait: Duration::from_secs(60),
            extra_boot_wait: Duration::ZERO,
            ignore_if_not_preloaded: false,
            reuse_installed_modules: false,
            train_path: None,
        }
    }
}

impl InstallConfig {
    pub const TABLE: &'static str = "install";

    /// Load from the `[install]` table of a TOML file, missing keys keep
    /// their defaults
    pub fn from_toml_file(path: &Path) -> crate::Result<Self> {
        parse_config(path, |cfg| match cfg.maybe_get_map_typecheck(Self::TABLE)? {
            Some(install) => Self::from_config_map(&install),
            None => Ok(Self::default()),
        })
    }

    pub fn from_config_map(cfg: &ConfigMap) -> crate::Result<Self> {
        let mut it = Self::default();

        if let Some(v) = cfg.maybe_get_bool_typecheck("enable-rollback")? {
            it.enable_rollback = v;
        }
        if let Some(v) = cfg.maybe_get_bool_typecheck("ignore-if-module-not-preloaded")? {
            it.ignore_if_not_preloaded = v;
        }
        if let Some(v) = cfg.maybe_get_bool_typecheck("skip-apex-teardown")? {
            it.reuse_installed_modules = v;
        }
        if let Some(v) = cfg.maybe_get_millis("staged-ready-timeout-ms")? {
            it.staged_ready_timeout = if v.is_zero() { None } else { Some(v) };
        }
        if let Some(v) = cfg.maybe_get_millis("apex-staging-wait-ms")? {
            it.apex_staging_wait = v;
        }
        if let Some(v) = cfg.maybe_get_millis("rollback-wait-ms")? {
            it.rollback_wait = v;
        }
        if let Some(v) = cfg.maybe_get_millis("extra-booting-wait-ms")? {
            it.extra_boot_wait = v;
        }
        if let Some(v) = cfg.maybe_get_str_typecheck("train-path")? {
            it.train_path = Some(PathBuf::from(v));
        }

        Ok(it)
    }
}

pub struct ConfigMap<'c> {
    path: &'c Path,
    name: Option<Cow<'c, str>>,
    table: &'c Table,
}

pub fn parse_config<R, F>(file: &Path, f: F) -> crate::Result<R>
where
    F: FnOnce(&ConfigMap) -> crate::Result<R>,
{
    let as_str = read_file(file)?;

    let table: Table = match toml::from_str(&as_str) {
        Ok(v) => v,
        Err(e) => return Err(crate::Error::new_cfg(file, &e)),
    };

    let base = ConfigMap {
        name: None,
        path: file,
        table: &table,
    };

    f(&base)
}

impl<'c> ConfigMap<'c> {
    fn get_full_path<'a>(&'a self) -> Option<&'a str> {
        self.name.as_ref().map(|it| it.as_ref())
    }

    fn key_path<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match self.get_full_path() {
            None => Cow::Borrowed(key),
            Some(v) => Cow::Owned(format!("{}.{}", v, key)),
        }
    }

    /// Helper to create a crate::Error for an invalid key
    pub fn invalid_key(&self, key: &str, expected: &str) -> crate::Error {
        let path = self.key_path(key);
        crate::Error::InvalidConfig(
            self.path.to_string_lossy().into(),
            format!(
                "invalid value for key: {} (expected type: {})",
                path, expected
            ),
        )
    }

    fn get(&self, key: &str) -> Option<&'c Value> {
        self.table.get(key)
    }

    pub fn maybe_get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            Some(v) => match v.as_integer() {
                Some(v) => Ok(Some(v)),
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_int_typecheck(&self, key: &str) -> crate::Result<Option<i64>> {
        self.maybe_get_int(key)
            .map_err(|_| self.invalid_key(key, "int"))
    }

    /// Non negative integer milliseconds as a [Duration]
    pub fn maybe_get_millis(&self, key: &str) -> crate::Result<Option<Duration>> {
        match self.maybe_get_int_typecheck(key)? {
            Some(v) if v < 0 => Err(self.invalid_key(key, "non negative int")),
            Some(v) => Ok(Some(Duration::from_millis(v as u64))),
            None => Ok(None),
        }
    }

    pub fn maybe_get_str(&self, key: &str) -> Result<Option<&'c str>> {
        match self.get(key) {
            Some(v) => match v.as_str() {
                Some(v) => Ok(Some(v)),
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_str_typecheck(&self, key: &str) -> crate::Result<Option<&'c str>> {
        self.maybe_get_str(key)
            .map_err(|_| self.invalid_key(key, "string"))
    }

    pub fn maybe_get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            Some(v) => match v.as_bool() {
                Some(v) => Ok(Some(v)),
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_bool_typecheck(&self, key: &str) -> crate::Result<Option<bool>> {
        self.maybe_get_bool(key)
            .map_err(|_| self.invalid_key(key, "bool"))
    }

    pub fn maybe_get_map(&'c self, key: &'c str) -> Result<Option<ConfigMap<'c>>> {
        match self.get(key) {
            Some(v) => match v.as_table() {
                Some(table) => {
                    let name = match &self.get_full_path() {
                        Some(parents) => Cow::Owned(format!("{parents}.{key}")),
                        None => Cow::Borrowed(key),
                    };
                    Ok(Some(Self {
                        name: Some(name),
                        path: self.path,
                        table,
                    }))
                }
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_map_typecheck(&'c self, key: &'c str) -> crate::Result<Option<ConfigMap<'c>>> {
        self.maybe_get_map(key)
            .map_err(|_| self.invalid_key(key, "table"))
    }
}

#[cfg(test)]
mod test {
    use crate::testing::{tmp_dir, TmpDir};

    use super::*;
    use rstest::*;

    #[rstest]
    fn test_install_config(tmp_dir: TmpDir) {
        let content = r#"
[install]
enable-rollback = false
staged-ready-timeout-ms = 120000
rollback-wait-ms = 0
skip-apex-teardown = true
train-path = "/tmp/train"
"#;
        let file = tmp_dir.create_file_name("config.toml", Some(content));

        let cfg = InstallConfig::from_toml_file(&file).unwrap();
        assert!(!cfg.enable_rollback);
        assert_eq!(cfg.staged_ready_timeout, Some(Duration::from_secs(120)));
        assert_eq!(cfg.rollback_wait, Duration::ZERO);
        assert!(cfg.reuse_installed_modules);
        assert!(!cfg.ignore_if_not_preloaded);
        assert_eq!(cfg.train_path, Some(PathBuf::from("/tmp/train")));
    }

    #[rstest]
    fn test_install_config_defaults(tmp_dir: TmpDir) {
        let file = tmp_dir.create_file_name("empty.toml", Some("other = 1\n"));
        assert_eq!(
            InstallConfig::from_toml_file(&file).unwrap(),
            InstallConfig::default()
        );
    }

    #[rstest]
    #[case("[install]\nenable-rollback = \"yes\"\n", "install.enable-rollback")]
    #[case("[install]\nrollback-wait-ms = -5\n", "install.rollback-wait-ms")]
    #[case("install = 3\n", "install")]
    fn test_install_config_invalid(tmp_dir: TmpDir, #[case] content: &str, #[case] key: &str) {
        let file = tmp_dir.create_file_name("bad.toml", Some(content));
        match InstallConfig::from_toml_file(&file) {
            Err(crate::Error::InvalidConfig(_, msg)) => assert!(msg.contains(key), "{}", msg),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("expected {} to be rejected", content),
        }
    }

    #[rstest]
    fn test_config_map(tmp_dir: TmpDir) {
        let content = r#"
base = 12

[foo]
bar = "baz"
quux = { neato = true }
"#;
        let file = tmp_dir.create_file_name("config.toml", Some(content));

        let f = |cfg: &ConfigMap| -> crate::Result<()> {
            assert_eq!(cfg.maybe_get_int("base").expect("getting base"), Some(12));
            let foo = cfg.maybe_get_map("foo").expect("getting foo").unwrap();
            assert_eq!(foo.maybe_get_str("bar").expect("getting bar"), Some("baz"));
            assert!(foo.maybe_get_int("bar").is_err());
            let quux = foo.maybe_get_map("quux").expect("getting foo.quux").unwrap();
            assert_eq!(quux.maybe_get_bool("neato").expect("getting neato"), Some(true));
            assert_eq!(quux.maybe_get_bool("ohno").expect("getting ohno"), None);
            let err = quux.maybe_get_int_typecheck("neato").unwrap_err();
            assert!(err.to_string().contains("foo.quux.neato"), "{}", err);
            Ok(())
        };

        parse_config(&file, f).unwrap();
    }
}
