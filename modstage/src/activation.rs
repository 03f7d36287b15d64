use std::collections::{HashMap, HashSet};

use crate::artifact::ApexInfo;
use crate::device::{ActivationRecord, Device};
use crate::errors::SetupError;

/// APEXes whose reported version and path can't be trusted, only their
/// presence is checked
pub const PACKAGES_WITH_INVALID_DUMP_INFO: [&'static str; 1] = ["com.google.mainline.primary.libs"];

/// Source dirs are only reliably under `/data` from this API level on
pub const SOURCE_DIR_CHECK_MIN_API: u32 = 30;

/// Returns the expected APEXes that are not active as expected, in the
/// order they were given.
///
/// An APEX fails when it is missing, when the active version differs, or
/// when `check_source_dir` is set and it is not served from `/data`.
pub fn modules_failed_to_activate(
    expected: &[ApexInfo],
    active: &HashSet<ActivationRecord>,
    check_source_dir: bool,
) -> Vec<ApexInfo> {
    let by_name: HashMap<&str, &ActivationRecord> = active
        .iter()
        .map(|it| (it.package_name.as_str(), it))
        .collect();

    expected
        .iter()
        .filter(|info| {
            let record = match by_name.get(info.package_name.as_str()) {
                None => return true,
                Some(v) => v,
            };
            if PACKAGES_WITH_INVALID_DUMP_INFO.contains(&info.package_name.as_str()) {
                return false;
            }
            if record.version_code != info.version_code {
                return true;
            }
            check_source_dir && !record.is_in_data()
        })
        .cloned()
        .collect()
}

/// Verify every expected APEX is active on the device after the reboot
pub fn check_apex_activation<D>(device: &D, expected: &[ApexInfo]) -> crate::Result<()>
where
    D: Device + ?Sized,
{
    if expected.is_empty() {
        return Ok(());
    }

    let active = device.active_apexes()?;
    if active.is_empty() {
        return Err(SetupError::EmptyActivation {
            serial: device.serial(),
        }
        .into());
    }

    let check_source_dir = device.api_level()? >= SOURCE_DIR_CHECK_MIN_API;
    let failed = modules_failed_to_activate(expected, &active, check_source_dir);
    if !failed.is_empty() {
        log::error!("Failed to activate modules:");
        for info in failed.iter() {
            log::error!("  {}", info);
        }
        log::info!("Active modules:");
        for record in active.iter() {
            log::info!("  {}", record);
        }
        return Err(SetupError::ActivationFailed {
            serial: device.serial(),
            failed,
        }
        .into());
    }

    log::info!("Train activated successfully on {}.", device.serial());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{mock_device, MockDevice};
    use rstest::*;

    fn active_at(source_dir: &str, version: i64) -> HashSet<ActivationRecord> {
        HashSet::from([ActivationRecord::new("com.android.a", version, source_dir)])
    }

    #[rstest]
    #[case(active_at("/data/apex/active/com.android.a@1.apex", 1), true, 0)]
    #[case(active_at("/data/apex/active/com.android.a@2.apex", 2), true, 1)]
    #[case(active_at("/system/apex/com.android.a.apex", 1), true, 1)]
    #[case(active_at("/system/apex/com.android.a.apex", 1), false, 0)]
    #[case(HashSet::new(), false, 1)]
    fn test_failed_to_activate(
        #[case] active: HashSet<ActivationRecord>,
        #[case] check_source_dir: bool,
        #[case] nfailed: usize,
    ) {
        let expected = vec![ApexInfo::new("com.android.a", 1)];
        assert_eq!(
            modules_failed_to_activate(&expected, &active, check_source_dir).len(),
            nfailed
        );
    }

    #[rstest]
    fn test_invalid_dump_info_only_checks_presence() {
        let expected = vec![ApexInfo::new("com.google.mainline.primary.libs", 5)];
        let active = HashSet::from([ActivationRecord::new(
            "com.google.mainline.primary.libs",
            0,
            "/system/apex/primary.libs.apex",
        )]);
        assert!(modules_failed_to_activate(&expected, &active, true).is_empty());
        assert_eq!(
            modules_failed_to_activate(&expected, &HashSet::new(), true),
            expected
        );
    }

    #[rstest]
    fn test_check_activation_success(mut mock_device: MockDevice) {
        mock_device
            .expect_active_apexes()
            .times(1)
            .returning(|| Ok(active_at("/data/apex/active/com.android.a@1.apex", 1)));
        mock_device.expect_api_level().returning(|| Ok(33));
        mock_device
            .expect_serial()
            .returning(|| String::from("serial"));

        check_apex_activation(&mock_device, &[ApexInfo::new("com.android.a", 1)]).unwrap();
    }

    #[rstest]
    fn test_check_activation_system_path(mut mock_device: MockDevice) {
        mock_device
            .expect_active_apexes()
            .returning(|| Ok(active_at("/system/apex/com.android.a.apex", 1)));
        mock_device.expect_api_level().returning(|| Ok(30));
        mock_device
            .expect_serial()
            .returning(|| String::from("serial"));

        let err = check_apex_activation(&mock_device, &[ApexInfo::new("com.android.a", 1)])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("packageName: com.android.a"), "{}", msg);
        assert!(msg.contains("versionCode: 1"), "{}", msg);
    }

    #[rstest]
    fn test_check_activation_old_api_ignores_path(mut mock_device: MockDevice) {
        mock_device
            .expect_active_apexes()
            .returning(|| Ok(active_at("/system/apex/com.android.a.apex", 1)));
        mock_device.expect_api_level().returning(|| Ok(29));
        mock_device
            .expect_serial()
            .returning(|| String::from("serial"));

        check_apex_activation(&mock_device, &[ApexInfo::new("com.android.a", 1)]).unwrap();
    }

    #[rstest]
    fn test_check_activation_empty(mut mock_device: MockDevice) {
        mock_device
            .expect_active_apexes()
            .returning(|| Ok(HashSet::new()));
        mock_device
            .expect_serial()
            .returning(|| String::from("serial"));

        let err = check_apex_activation(&mock_device, &[ApexInfo::new("com.android.a", 1)])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to retrieve activated apex on device serial. Empty set returned."
        );
    }

    #[rstest]
    fn test_check_activation_nothing_expected(mut mock_device: MockDevice) {
        mock_device.expect_active_apexes().never();
        check_apex_activation(&mock_device, &[]).unwrap();
    }
}
