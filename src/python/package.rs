//! A single Python distribution.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::index::PackageIndex;
use crate::version::LooseVersion;

/// Metadata file names, in lookup order.
const METADATA_FILES: [&str; 2] = ["METADATA", "PKG-INFO"];

/// Normalises a distribution name for lookups (`Typing_Extensions` -> `typing-extensions`).
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_dash {
                out.push('-');
            }
            last_dash = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        }
    }
    out
}

/// Where a package record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PackageSource {
    /// Installed package, read from its metadata directory.
    Local {
        /// `*.dist-info` or `*.egg-info` directory.
        metadata_dir: PathBuf,
    },
    /// Parsed from a `name==version` requirement.
    Requirement,
}

/// A Python package with an optional version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonPackage {
    /// Distribution name as written.
    pub name: String,
    /// Version, `None` for a bare request.
    pub version: Option<LooseVersion>,
    /// Raw version text.
    pub version_text: Option<String>,
    /// One-line summary.
    pub summary: Option<String>,
    /// Origin of the record.
    pub source: PackageSource,
}

impl PythonPackage {
    /// Creates a requirement-style package.
    pub fn requirement(name: impl Into<String>, version_text: Option<&str>) -> Self {
        Self {
            name: name.into(),
            version: version_text.and_then(LooseVersion::parse),
            version_text: version_text.map(str::to_string),
            summary: None,
            source: PackageSource::Requirement,
        }
    }

    /// Parses `name==version` or a bare `name`.
    ///
    /// Returns `None` for anything else (other specifiers, URLs, options).
    #[must_use]
    pub fn parse_requirement(line: &str) -> Option<Self> {
        let line = line.trim();
        if let Some((name, version)) = line.split_once("==") {
            let (name, version) = (name.trim(), version.trim());
            if is_distribution_name(name) && !version.is_empty() && !version.contains(' ') {
                return Some(Self::requirement(name, Some(version)));
            }
            return None;
        }
        is_distribution_name(line).then(|| Self::requirement(line, None))
    }

    /// Reads a `*.dist-info` or `*.egg-info` directory.
    ///
    /// Only the first occurrence of each header is used.
    #[must_use]
    pub fn from_metadata_dir(dir: &Path) -> Option<Self> {
        let content = METADATA_FILES
            .iter()
            .map(|f| dir.join(f))
            .find(|p| p.is_file())
            .and_then(|p| fs::read(p).ok())?;
        let content = String::from_utf8_lossy(&content);

        let mut name = None;
        let mut version_text = None;
        let mut summary = None;
        for line in content.lines() {
            if line.is_empty() {
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Name" if name.is_none() => name = Some(value.to_string()),
                "Version" if version_text.is_none() => version_text = Some(value.to_string()),
                "Summary" if summary.is_none() && !value.is_empty() && value != "UNKNOWN" => {
                    summary = Some(value.to_string());
                }
                _ => {}
            }
        }

        Some(Self {
            version: version_text.as_deref().and_then(LooseVersion::parse),
            name: name?,
            version_text,
            summary,
            source: PackageSource::Local {
                metadata_dir: dir.to_path_buf(),
            },
        })
    }

    /// Lookup key.
    #[must_use]
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// `name==version`, or `name` when unversioned.
    #[must_use]
    pub fn requirement_string(&self) -> String {
        match &self.version_text {
            Some(v) => format!("{}=={}", self.name, v),
            None => self.name.clone(),
        }
    }

    /// Orders by version; an unknown version is lowest.
    #[must_use]
    pub fn cmp_version(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }

    /// True if this package's version is strictly newer than `other`'s.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.cmp_version(other) == Ordering::Greater
    }

    /// Fills in the summary from `index`. Failures only log.
    pub fn enrich(&mut self, index: &dyn PackageIndex) -> bool {
        if self.summary.is_some() {
            return true;
        }
        match index.lookup(&self.name) {
            Ok(record) => {
                self.summary = record.summary;
                self.summary.is_some()
            }
            Err(e) => {
                tracing::debug!("No index data for {}: {}", self.name, e);
                false
            }
        }
    }
}

impl fmt::Display for PythonPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.requirement_string())
    }
}

fn is_distribution_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::index::{IndexError, IndexRecord};

    struct StaticIndex;

    impl PackageIndex for StaticIndex {
        fn lookup(&self, name: &str) -> Result<IndexRecord, IndexError> {
            if name == "numpy" {
                Ok(IndexRecord {
                    name: "numpy".into(),
                    latest_version: Some("2.0.0".into()),
                    summary: Some("Arrays".into()),
                })
            } else {
                Err(IndexError::NotFound(name.into()))
            }
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Typing_Extensions"), "typing-extensions");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("a__b"), "a-b");
    }

    #[test]
    fn test_parse_requirement() {
        let pinned = PythonPackage::parse_requirement("numpy==1.26.2").unwrap();
        assert_eq!(pinned.version, LooseVersion::parse("1.26.2"));
        assert_eq!(pinned.requirement_string(), "numpy==1.26.2");

        let bare = PythonPackage::parse_requirement("requests").unwrap();
        assert!(bare.version.is_none());
        assert_eq!(bare.requirement_string(), "requests");

        assert!(PythonPackage::parse_requirement("foo @ file:///tmp/foo").is_none());
        assert!(PythonPackage::parse_requirement("foo>=1.0").is_none());
        assert!(PythonPackage::parse_requirement("-e .").is_none());
    }

    #[test]
    fn test_from_metadata_dir_first_field_wins() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("numpy-1.26.2.dist-info");
        fs::create_dir_all(&meta).unwrap();
        fs::write(
            meta.join("METADATA"),
            "Metadata-Version: 2.1\nName: numpy\nVersion: 1.26.2\nSummary: Fundamental package\n\
             Summary: Shadowed\n\nName: body-text\n",
        )
        .unwrap();

        let pkg = PythonPackage::from_metadata_dir(&meta).unwrap();
        assert_eq!(pkg.name, "numpy");
        assert_eq!(pkg.version, LooseVersion::parse("1.26.2"));
        assert_eq!(pkg.summary.as_deref(), Some("Fundamental package"));
    }

    #[test]
    fn test_pkg_info_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("legacy.egg-info");
        fs::create_dir_all(&meta).unwrap();
        fs::write(meta.join("PKG-INFO"), "Name: legacy\nVersion: 0.3\nSummary: UNKNOWN\n").unwrap();

        let pkg = PythonPackage::from_metadata_dir(&meta).unwrap();
        assert_eq!(pkg.version, LooseVersion::parse("0.3"));
        assert!(pkg.summary.is_none());
    }

    #[test]
    fn test_unknown_version_orders_lowest() {
        let bare = PythonPackage::requirement("numpy", None);
        let pinned = PythonPackage::requirement("numpy", Some("0.1"));
        assert!(pinned.is_newer_than(&bare));
        assert!(!bare.is_newer_than(&pinned));
    }

    #[test]
    fn test_pre_and_post_releases_order_around_final() {
        let rc = PythonPackage::requirement("foo", Some("1.0rc1"));
        let final_release = PythonPackage::requirement("foo", Some("1.0"));
        let post = PythonPackage::requirement("foo", Some("1.0.post1"));
        assert!(final_release.is_newer_than(&rc));
        assert!(post.is_newer_than(&final_release));
        assert_eq!(post.requirement_string(), "foo==1.0.post1");
    }

    #[test]
    fn test_enrich() {
        let mut numpy = PythonPackage::requirement("numpy", Some("1.0"));
        assert!(numpy.enrich(&StaticIndex));
        assert_eq!(numpy.summary.as_deref(), Some("Arrays"));

        let mut missing = PythonPackage::requirement("nothing", None);
        assert!(!missing.enrich(&StaticIndex));
        assert!(missing.summary.is_none());
    }
}
