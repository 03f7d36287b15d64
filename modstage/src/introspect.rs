use std::fs::File;
use std::io::Read;
use std::path::Path;

use lazy_static::lazy_static;
use log::{self, log_enabled, Level::Trace};
use protobuf::CodedInputStream;
use regex::Regex;
use serde::Deserialize;
use which::which;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::artifact::{ApexInfo, ArtifactKind, Introspector};
use crate::command::run_cmd;
use crate::errors::SetupError;
use crate::utils::open_file;

const APEX_MANIFEST_PB: &'static str = "apex_manifest.pb";
const APEX_MANIFEST_JSON: &'static str = "apex_manifest.json";

// apex_manifest.proto: `string name = 1; int64 version = 2;`
const MANIFEST_NAME_TAG: u32 = (1 << 3) | 2;
const MANIFEST_VERSION_TAG: u32 = 2 << 3;

lazy_static! {
    static ref BADGING_PACKAGE_REGEX: Regex =
        Regex::new(r"package: name='([^']+)'(?:\s+versionCode='(\d+)')?").unwrap();
}

/// Reads package metadata straight off the host: APEX manifests out of the
/// APEX zip and APK package names through `aapt2 dump badging`.
#[derive(Clone, Default)]
pub struct HostIntrospector {
    aapt: Option<String>,
}

impl HostIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aapt(mut self, bin: String) -> Self {
        self.aapt = Some(bin);
        self
    }

    fn get_aapt(&self) -> crate::Result<String> {
        if let Some(bin) = &self.aapt {
            return Ok(bin.clone());
        }
        which("aapt2")
            .map(|it| it.to_string_lossy().into_owned())
            .map_err(|_| crate::Error::MissingBin("aapt2".into()))
    }

    fn badging_package_name(&self, file: &Path) -> crate::Result<String> {
        let aapt = self.get_aapt()?;
        let file_str = file.to_string_lossy();
        let output = run_cmd(&aapt, &["dump", "badging", &*file_str])?.err_on_status()?;
        let stdout = output.stdout_utf8_lossy();
        match parse_badging(&stdout) {
            Some((name, _)) => Ok(name),
            None => Err(SetupError::InvalidArtifact {
                path: file.to_path_buf(),
                reason: String::from("no package line in aapt2 badging output"),
            }
            .into()),
        }
    }
}

impl Introspector for HostIntrospector {
    fn package_name(&self, file: &Path) -> crate::Result<String> {
        if ArtifactKind::from_path(file) == Some(ArtifactKind::Apex) {
            return self.apex_info(file).map(|it| it.package_name);
        }
        self.badging_package_name(file)
    }

    fn apex_info(&self, file: &Path) -> crate::Result<ApexInfo> {
        read_apex_manifest(file)
    }
}

/// Parses the `package:` line of `aapt2 dump badging` output into the package
/// name and, if present, the version code
pub fn parse_badging(output: &str) -> Option<(String, Option<i64>)> {
    let caps = BADGING_PACKAGE_REGEX.captures(output)?;
    let name = caps.get(1)?.as_str().to_string();
    let version = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some((name, version))
}

#[derive(Deserialize)]
struct JsonApexManifest {
    name: String,
    #[serde(default)]
    version: i64,
}

/// Reads the name and version out of an APEX file's manifest, preferring the
/// protobuf manifest and falling back to the older JSON one
pub fn read_apex_manifest(apex: &Path) -> crate::Result<ApexInfo> {
    let opened = open_file(apex)?;
    let mut archive = ZipArchive::new(opened)?;

    if log_enabled!(Trace) {
        log::trace!("reading apex manifest from {}", apex.to_string_lossy());
    }

    if let Some(bytes) = read_zip_entry(&mut archive, APEX_MANIFEST_PB)? {
        return parse_manifest_pb(&bytes).map_err(|reason| invalid_apex(apex, reason));
    }
    if let Some(bytes) = read_zip_entry(&mut archive, APEX_MANIFEST_JSON)? {
        return parse_manifest_json(&bytes).map_err(|reason| invalid_apex(apex, reason));
    }
    Err(invalid_apex(apex, String::from("no apex manifest")))
}

fn invalid_apex(apex: &Path, reason: String) -> crate::Error {
    SetupError::InvalidArtifact {
        path: apex.to_path_buf(),
        reason,
    }
    .into()
}

fn read_zip_entry(archive: &mut ZipArchive<File>, name: &str) -> crate::Result<Option<Vec<u8>>> {
    let mut entry = match archive.by_name(name) {
        Ok(v) => v,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut into = Vec::new();
    entry.read_to_end(&mut into)?;
    Ok(Some(into))
}

fn parse_manifest_pb(bytes: &[u8]) -> Result<ApexInfo, String> {
    let mut input = CodedInputStream::from_bytes(bytes);
    let mut unknown = protobuf::UnknownFields::new();
    let mut name = None;
    let mut version = 0;

    let pb_err = |e: protobuf::Error| format!("bad apex_manifest.pb: {}", e);

    while let Some(tag) = input.read_raw_tag_or_eof().map_err(pb_err)? {
        match tag {
            MANIFEST_NAME_TAG => name = Some(input.read_string().map_err(pb_err)?),
            MANIFEST_VERSION_TAG => version = input.read_int64().map_err(pb_err)?,
            tag => protobuf::rt::read_unknown_or_skip_group(tag, &mut input, &mut unknown)
                .map_err(pb_err)?,
        }
    }

    match name {
        Some(name) if !name.is_empty() => Ok(ApexInfo::new(name, version)),
        _ => Err(String::from("apex_manifest.pb has no name")),
    }
}

fn parse_manifest_json(bytes: &[u8]) -> Result<ApexInfo, String> {
    let manifest: JsonApexManifest = serde_json::from_slice(bytes)
        .map_err(|e| format!("bad apex_manifest.json: {}", e))?;
    Ok(ApexInfo::new(manifest.name, manifest.version))
}
