use std::borrow::Cow;
use std::fs::{self, read_dir, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEVICE_PATH_SEP: &'static str = "/";

/// Checks the file name suffix. The suffix includes the dot so `.apk` does
/// not match `foo.apks`
pub fn path_has_suffix<P: AsRef<Path> + ?Sized>(p: &P, suffix: &str) -> bool {
    p.as_ref()
        .file_name()
        .map_or(false, |it| it.to_string_lossy().ends_with(suffix))
}

/// Returns the file name of the path, or an empty string if there is none
pub fn file_name_lossy(path: &Path) -> Cow<'_, str> {
    path.file_name()
        .map(|it| it.to_string_lossy())
        .unwrap_or(Cow::Borrowed(""))
}

/// Returns the file name without its last extension
pub fn file_stem_lossy(path: &Path) -> Cow<'_, str> {
    path.file_stem()
        .map(|it| it.to_string_lossy())
        .unwrap_or(Cow::Borrowed(""))
}

/// Joins a device directory and a file name
pub fn device_join(dir: &str, name: &str) -> String {
    if dir.ends_with(DEVICE_PATH_SEP) {
        format!("{}{}", dir, name)
    } else {
        format!("{}{}{}", dir, DEVICE_PATH_SEP, name)
    }
}

/// Files directly inside `dir` whose name ends with `suffix`, sorted by name
pub fn list_files_with_suffix(dir: &Path, suffix: &str) -> crate::Result<Vec<PathBuf>> {
    let entries = match read_dir(dir) {
        Ok(v) => v,
        Err(e) => match e.kind() {
            ErrorKind::NotFound => {
                return Err(crate::Error::MissingFile(dir.to_string_lossy().into()))
            }
            _ => return Err(e.into()),
        },
    };

    let mut found = Vec::new();
    for ent in entries {
        let path = ent?.path();
        if path.is_file() && path_has_suffix(&path, suffix) {
            found.push(path);
        }
    }
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(found)
}

pub fn open_file(path: &Path) -> crate::Result<File> {
    match File::open(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path.to_string_lossy().into())),
            _ => Err(e.into()),
        },
    }
}

pub fn read_file(path: &Path) -> crate::Result<String> {
    match fs::read_to_string(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path.to_string_lossy().into())),
            _ => Err(e.into()),
        },
    }
}

/// Size of a local file in bytes
pub fn file_size(path: &Path) -> crate::Result<u64> {
    match fs::metadata(path) {
        Ok(v) => Ok(v.len()),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path.to_string_lossy().into())),
            _ => Err(e.into()),
        },
    }
}
