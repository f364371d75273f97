//! Integration tests for package set algebra over `pip freeze` output.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use blender_depot::python::PackageSet;
use blender_depot::version::LooseVersion;

const OLDER: &str = "\
# bundled with Blender 3.6
numpy==1.21.2
requests==2.27.1
zstandard==0.16.0
";

const NEWER: &str = "\
numpy==1.26.2
requests==2.27.1
certifi==2023.11.17
-e git+https://example.invalid/repo.git#egg=local_tool
";

#[test]
fn test_union_keeps_newest_numpy() {
    let older = PackageSet::from_freeze_text(OLDER);
    let newer = PackageSet::from_freeze_text(NEWER);

    let union = older.union(&newer);
    let numpy = union.get("numpy").unwrap();
    assert_eq!(numpy.version, LooseVersion::parse("1.26.2"));
    assert_eq!(union.len(), 4);
    assert_eq!(newer.union(&older), union);
}

#[test]
fn test_difference_lists_new_and_upgraded() {
    let older = PackageSet::from_freeze_text(OLDER);
    let newer = PackageSet::from_freeze_text(NEWER);

    let diff = newer.difference(&older);
    let mut names: Vec<&str> = diff.iter().map(|p| p.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["certifi", "numpy"]);
    assert_eq!(diff.install_string(), "certifi==2023.11.17 numpy==1.26.2");

    let reverse = older.difference(&newer);
    let names: Vec<&str> = reverse.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["zstandard"]);
}

#[test]
fn test_operators_match_methods() {
    let older = PackageSet::from_freeze_text(OLDER);
    let newer = PackageSet::from_freeze_text(NEWER);
    assert_eq!(&older + &newer, older.union(&newer));
    assert_eq!(&newer - &older, newer.difference(&older));
}

#[test]
fn test_post_release_is_an_upgrade() {
    let base = PackageSet::from_freeze_text("foo==2.0.0\n");
    let patched = PackageSet::from_freeze_text("foo==2.0.0.post1\n");

    let diff = &patched - &base;
    assert_eq!(diff.install_string(), "foo==2.0.0.post1");
    assert!((&base - &patched).is_empty());
}

#[test]
fn test_final_release_beats_candidate() {
    let candidate = PackageSet::from_freeze_text("foo==1.0rc1\n");
    let released = PackageSet::from_freeze_text("foo==1.0\n");

    assert_eq!((&candidate + &released).install_string(), "foo==1.0");
    assert_eq!((&released + &candidate).install_string(), "foo==1.0");
    assert_eq!((&released - &candidate).len(), 1);
}

#[test]
fn test_fourth_release_component_counts() {
    let older = PackageSet::from_freeze_text("pywin32==1.2.3.4\n");
    let newer = PackageSet::from_freeze_text("pywin32==1.2.3.5\n");
    assert_eq!((&newer - &older).len(), 1);
    assert_eq!(
        older.union(&newer).get("pywin32").unwrap().version,
        LooseVersion::parse("1.2.3.5")
    );
}
