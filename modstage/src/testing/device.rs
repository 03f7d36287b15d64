use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mockall::mock;
use rstest::fixture;

use crate::artifact::ApexInfo;
use crate::device::{ActivationRecord, ShellOutput};

mock! {
    pub Device {

    }

    impl crate::device::Device for Device {
        fn serial(&self) -> String;
        fn api_level(&self) -> crate::Result<u32>;
        fn shell(&self, cmd: &str) -> crate::Result<ShellOutput>;
        fn push_file(&self, local: &Path, remote: &str) -> crate::Result<bool>;
        fn delete_file(&self, remote: &str) -> crate::Result<()>;
        fn reboot(&self) -> crate::Result<()>;
        fn wait_for_available(&self) -> crate::Result<()>;
        fn post_boot_setup(&self) -> crate::Result<()>;
        fn active_apexes(&self) -> crate::Result<HashSet<ActivationRecord>>;
        fn installed_package_names(&self) -> crate::Result<HashSet<String>>;
        fn mainline_module_packages(&self) -> crate::Result<Option<HashSet<String>>>;
        fn uninstall_package(&self, package: &str) -> crate::Result<Option<String>>;
    }
}

mock! {
    pub Introspector {

    }

    impl crate::artifact::Introspector for Introspector {
        fn package_name(&self, file: &Path) -> crate::Result<String>;
        fn apex_info(&self, file: &Path) -> crate::Result<ApexInfo>;
    }
}

mock! {
    pub SplitExtractor {

    }

    impl crate::artifact::SplitExtractor for SplitExtractor {
        fn extract_splits(&self, apks: &Path) -> crate::Result<Option<Vec<PathBuf>>>;
    }
}

#[fixture]
pub fn mock_device() -> MockDevice {
    MockDevice::new()
}

#[fixture]
pub fn mock_introspector() -> MockIntrospector {
    MockIntrospector::new()
}

#[fixture]
pub fn mock_split_extractor() -> MockSplitExtractor {
    MockSplitExtractor::new()
}
