//! Package set algebra.
//!
//! Union keeps the newer version of each package; difference keeps what the
//! left side has beyond the right side, upgrades included. This is "latest
//! wins", not dependency resolution.

use std::collections::BTreeMap;
use std::fs;
use std::ops::{Add, Sub};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::index::PackageIndex;
use super::package::{PythonPackage, normalize_name};
use crate::error::{IoContext, Result};

/// Mapping from normalised package name to package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSet {
    packages: BTreeMap<String, PythonPackage>,
}

impl PackageSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a package, replacing any package with the same name.
    pub fn insert(&mut self, package: PythonPackage) {
        self.packages.insert(package.key(), package);
    }

    /// Looks up a package by (unnormalised) name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PythonPackage> {
        self.packages.get(&normalize_name(name))
    }

    /// Returns true if a package with this name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterates packages in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PythonPackage> {
        self.packages.values()
    }

    /// Packages in both sets, keeping the newer version; ties keep `self`'s.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut packages = self.packages.clone();
        for (key, theirs) in &other.packages {
            match packages.get(key) {
                Some(ours) if !theirs.is_newer_than(ours) => {}
                _ => {
                    packages.insert(key.clone(), theirs.clone());
                }
            }
        }
        Self { packages }
    }

    /// Packages only in `self`, plus those newer in `self` than in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let packages = self
            .packages
            .iter()
            .filter(|(key, ours)| {
                other
                    .packages
                    .get(*key)
                    .is_none_or(|theirs| ours.is_newer_than(theirs))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { packages }
    }

    /// Parses `pip freeze` style text.
    ///
    /// Accepts `name==version` and bare `name` lines. Comments, options and
    /// blank lines are ignored; local references (`name @ file://...`) and
    /// other specifiers are skipped with a warning.
    #[must_use]
    pub fn from_freeze_text(text: &str) -> Self {
        let mut set = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
                continue;
            }
            if line.contains(" @ ") {
                tracing::warn!("Skipping unsupported local package reference: {}", line);
                continue;
            }
            match PythonPackage::parse_requirement(line) {
                Some(package) => set.insert(package),
                None => tracing::warn!("Skipping unsupported requirement: {}", line),
            }
        }
        set
    }

    /// Scans a site-packages directory for installed distributions.
    ///
    /// # Errors
    /// Returns an I/O error if the directory cannot be read.
    pub fn from_site_packages(dir: &Path) -> Result<Self> {
        let mut set = Self::new();
        let mut entries: Vec<_> = fs::read_dir(dir)
            .at("Error reading", dir)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .collect();
        entries.sort();

        for path in entries {
            let is_metadata_dir = path.is_dir()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "dist-info" || e == "egg-info");
            if !is_metadata_dir {
                continue;
            }
            match PythonPackage::from_metadata_dir(&path) {
                Some(package) => set.insert(package),
                None => tracing::debug!("No package metadata in {}", path.display()),
            }
        }
        Ok(set)
    }

    /// Space separated requirement strings, suitable for `pip install`.
    #[must_use]
    pub fn install_string(&self) -> String {
        self.iter()
            .map(PythonPackage::requirement_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Enriches every package from `index`; returns how many have summaries.
    pub fn enrich(&mut self, index: &dyn PackageIndex) -> usize {
        self.packages
            .values_mut()
            .map(|p| p.enrich(index))
            .filter(|found| *found)
            .count()
    }
}

impl FromIterator<PythonPackage> for PackageSet {
    fn from_iter<I: IntoIterator<Item = PythonPackage>>(iter: I) -> Self {
        let mut set = Self::new();
        for package in iter {
            set.insert(package);
        }
        set
    }
}

impl Add for &PackageSet {
    type Output = PackageSet;

    fn add(self, rhs: Self) -> PackageSet {
        self.union(rhs)
    }
}

impl Sub for &PackageSet {
    type Output = PackageSet;

    fn sub(self, rhs: Self) -> PackageSet {
        self.difference(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::version::LooseVersion;

    #[test]
    fn test_union_prefers_newer() {
        let old = PackageSet::from_freeze_text("numpy==1.21.2\nrequests==2.31.0\n");
        let new = PackageSet::from_freeze_text("numpy==1.26.2\n");
        let union = &old + &new;
        assert_eq!(union.len(), 2);
        assert_eq!(
            union.get("numpy").unwrap().version,
            LooseVersion::parse("1.26.2")
        );
        assert_eq!(union, &new + &old);
    }

    #[test]
    fn test_difference_keeps_upgrades() {
        let old = PackageSet::from_freeze_text("numpy==1.21.2\nrequests==2.31.0\n");
        let new = PackageSet::from_freeze_text("numpy==1.26.2\nrequests==2.31.0\nzstandard==0.22.0\n");
        let diff = &new - &old;
        let names: Vec<_> = diff.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["numpy", "zstandard"]);
        assert!((&old - &new).is_empty());
    }

    #[test]
    fn test_freeze_skips_unsupported_lines() {
        let set = PackageSet::from_freeze_text(
            "# comment\n-e git+https://example.com/x.git\nlocal @ file:///tmp/local\nfoo>=1\nbar\n",
        );
        assert_eq!(set.len(), 1);
        assert!(set.contains("bar"));
    }

    #[test]
    fn test_from_site_packages() {
        let dir = tempfile::tempdir().unwrap();
        for (folder, file, body) in [
            ("numpy-1.26.2.dist-info", "METADATA", "Name: numpy\nVersion: 1.26.2\n"),
            ("legacy-0.1.egg-info", "PKG-INFO", "Name: legacy\nVersion: 0.1\n"),
            ("numpy", "__init__.py", ""),
        ] {
            fs::create_dir_all(dir.path().join(folder)).unwrap();
            fs::write(dir.path().join(folder).join(file), body).unwrap();
        }

        let set = PackageSet::from_site_packages(dir.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.install_string(), "legacy==0.1 numpy==1.26.2");
    }

    fn arb_set() -> impl Strategy<Value = PackageSet> {
        prop::collection::btree_map("[a-e]", (0u64..4, 0u64..4), 0..5).prop_map(|m| {
            m.into_iter()
                .map(|(name, (major, minor))| {
                    PythonPackage::requirement(name, Some(format!("{}.{}.0", major, minor).as_str()))
                })
                .collect::<PackageSet>()
        })
    }

    proptest! {
        #[test]
        fn prop_union_is_idempotent(a in arb_set()) {
            prop_assert_eq!(a.union(&a), a);
        }

        #[test]
        fn prop_union_then_difference(a in arb_set(), b in arb_set()) {
            prop_assert_eq!(a.union(&b).difference(&b), a.difference(&b));
        }

        #[test]
        fn prop_difference_is_subset(a in arb_set(), b in arb_set()) {
            let diff = a.difference(&b);
            for package in diff.iter() {
                prop_assert!(a.contains(&package.name));
            }
        }
    }
}
