use std::fs;
use std::path::{Path, PathBuf};

use rstest::fixture;
use tempfile::TempDir;

pub struct TmpDir {
    temp_dir: TempDir,
}

impl TmpDir {
    pub fn get_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn create_dir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::create_dir_all(&path).expect("failed to make temp directory");
        path
    }

    /// Create a file relative to the temp dir, parents are created as needed
    pub fn create_file_name(&self, name: &str, content: Option<&str>) -> PathBuf {
        let path = self.temp_dir.path().join(name);

        let parent = path.parent().unwrap();

        if !parent.exists() {
            fs::create_dir_all(parent).expect("failed to create directories for new file");
        }

        fs::write(&path, content.unwrap_or("")).expect("failed to make temp file");
        path
    }

    /// Create a file with exactly `size` bytes
    pub fn create_sized_file(&self, name: &str, size: usize) -> PathBuf {
        let content = "x".repeat(size);
        self.create_file_name(name, Some(&content))
    }
}

#[fixture]
pub fn tmp_dir() -> TmpDir {
    let temp_dir = tempfile::Builder::new()
        .prefix("modstage_test_")
        .tempdir()
        .expect("failed to create temp dir");
    TmpDir { temp_dir }
}
