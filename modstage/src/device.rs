use std::collections::HashSet;
use std::fmt::Display;
use std::path::Path;

use blanket::blanket;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PACKAGE_PATH_REGEX: Regex = Regex::new(r"package:(.*)").unwrap();
}

/// Completion status of a shell command run on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failed,
}

/// Captured result of a device shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn new<O, E>(status: CommandStatus, stdout: O, stderr: E) -> Self
    where
        O: Into<String>,
        E: Into<String>,
    {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success<O: Into<String>>(stdout: O) -> Self {
        Self::new(CommandStatus::Success, stdout, "")
    }

    pub fn failed<E: Into<String>>(stderr: E) -> Self {
        Self::new(CommandStatus::Failed, "", stderr)
    }

    #[inline]
    pub fn ok(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// An APEX as reported active by the device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivationRecord {
    pub package_name: String,
    pub version_code: i64,
    pub source_dir: String,
}

impl ActivationRecord {
    pub fn new<N, S>(package_name: N, version_code: i64, source_dir: S) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            package_name: package_name.into(),
            version_code,
            source_dir: source_dir.into(),
        }
    }

    /// Whether the APEX is served from `/data` rather than a stale system image
    pub fn is_in_data(&self) -> bool {
        self.source_dir
            .get(1..)
            .map_or(false, |it| it.starts_with("data"))
    }
}

impl Display for ActivationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "packageName: {}, versionCode: {}, sourceDir: {}",
            self.package_name, self.version_code, self.source_dir
        )
    }
}

/// The command channel to a device under test.
///
/// Implementations are expected to block until the device answers; nothing in
/// this crate issues two calls at once.
#[blanket(derive(Ref, Box))]
pub trait Device: Send + Sync {
    /// Serial number used in diagnostics
    fn serial(&self) -> String;

    fn api_level(&self) -> crate::Result<u32>;

    /// Essentially `adb shell '...'` keeping the status and both streams
    fn shell(&self, cmd: &str) -> crate::Result<ShellOutput>;

    /// Push a local file, returning whether the push succeeded
    fn push_file(&self, local: &Path, remote: &str) -> crate::Result<bool>;

    /// Same as `rm -rf` on the device, globs are allowed
    fn delete_file(&self, remote: &str) -> crate::Result<()>;

    /// Reboot and block until the device is back online
    fn reboot(&self) -> crate::Result<()>;

    fn wait_for_available(&self) -> crate::Result<()>;

    /// Run whatever setup normally follows a boot (`adb root` and friends)
    fn post_boot_setup(&self) -> crate::Result<()> {
        Ok(())
    }

    fn active_apexes(&self) -> crate::Result<HashSet<ActivationRecord>>;

    fn installed_package_names(&self) -> crate::Result<HashSet<String>>;

    /// Packages backing mainline modules, `None` if the device can't say
    fn mainline_module_packages(&self) -> crate::Result<Option<HashSet<String>>> {
        Ok(None)
    }

    /// Uninstall the given package. `None` or an output starting with
    /// `Success` means the uninstall worked, anything else is the failure
    /// message.
    fn uninstall_package(&self, package: &str) -> crate::Result<Option<String>>;

    /// Convenience wrapper around `pm path` returning the paths of the
    /// package's files on the device
    fn package_paths(&self, package: &str) -> crate::Result<Vec<String>> {
        let output = self.shell(&format!("pm path {}", package))?;
        Ok(parse_package_paths(&output.stdout))
    }
}

/// Parses `pm path` output into the listed paths
pub fn parse_package_paths(output: &str) -> Vec<String> {
    PACKAGE_PATH_REGEX
        .captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Whether an uninstall output means the package is gone
pub fn uninstall_succeeded(output: Option<&str>) -> bool {
    output.map_or(true, |it| it.starts_with("Success"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{mock_device, MockDevice};
    use rstest::*;

    #[rstest]
    #[case("/data/apex/active/com.android.foo@2.apex", true)]
    #[case("/data/apex/decompressed/com.android.foo@2.apex", true)]
    #[case("/system/apex/com.android.foo.apex", false)]
    #[case("", false)]
    fn test_record_in_data(#[case] source_dir: &str, #[case] expected: bool) {
        let record = ActivationRecord::new("com.android.foo", 2, source_dir);
        assert_eq!(record.is_in_data(), expected, "{}", source_dir);
    }

    #[rstest]
    fn test_parse_package_paths() {
        let output = "package:/data/app/~~abc==/com.google.android.foo-xyz==/base.apk\n\
package:/data/app/~~abc==/com.google.android.foo-xyz==/split_config.en.apk\n";
        assert_eq!(
            parse_package_paths(output),
            vec![
                "/data/app/~~abc==/com.google.android.foo-xyz==/base.apk",
                "/data/app/~~abc==/com.google.android.foo-xyz==/split_config.en.apk",
            ]
        );
        assert!(parse_package_paths("").is_empty());
    }

    #[rstest]
    fn test_package_paths_uses_pm_path(mut mock_device: MockDevice) {
        mock_device
            .expect_shell()
            .withf(|cmd| cmd == "pm path com.google.android.foo")
            .times(1)
            .returning(|_| Ok(ShellOutput::success("package:/system/app/Foo/Foo.apk\n")));

        let paths = mock_device
            .package_paths("com.google.android.foo")
            .unwrap();
        assert_eq!(paths, vec!["/system/app/Foo/Foo.apk"]);
    }

    #[rstest]
    #[case(None, true)]
    #[case(Some("Success"), true)]
    #[case(Some("Failure [DELETE_FAILED_INTERNAL_ERROR]"), false)]
    fn test_uninstall_succeeded(#[case] output: Option<&str>, #[case] expected: bool) {
        assert_eq!(uninstall_succeeded(output), expected);
    }
}
