//! Integration tests for setups backed by a repository.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::fs;

use blender_depot::addon::Addon;
use blender_depot::component::{Component, ComponentKind, Entity};
use blender_depot::error::DepotError;
use blender_depot::repository::Repository;
use blender_depot::setup::BlenderSetup;

use common::{bl_info, write_file, write_zip};

fn setup(repo: &Repository, uuid: uuid::Uuid) -> BlenderSetup {
    repo.setups.get(uuid).cloned().unwrap()
}

#[test]
fn test_deploy_released_and_dev_addons() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let mut repo = Repository::open(root.path()).unwrap();

    let zip = src.path().join("foo.zip");
    write_zip(&zip, &[("foo/__init__.py", &bl_info("Foo", (1, 0, 0)))]);
    let released = repo
        .add_component(Addon::from_path(&zip, None).unwrap().into(), true, false)
        .unwrap();
    let live_dir = src.path().join("live");
    write_file(&live_dir.join("__init__.py"), &bl_info("Live", (0, 1, 0)));
    let dev = repo
        .add_component(Addon::dev_from_path(&live_dir).unwrap().into(), false, false)
        .unwrap();

    let uuid = repo.create_setup("studio").unwrap();
    let mut studio = setup(&repo, uuid);
    let foo = studio
        .add_component(&repo.get(ComponentKind::ReleasedAddon, released).unwrap(), false)
        .unwrap();
    let live = studio
        .add_component(&repo.get(ComponentKind::DevAddon, dev).unwrap(), false)
        .unwrap();
    repo.setups.update(studio).unwrap();

    assert!(foo.join("__init__.py").is_file());
    assert!(foo.ends_with("scripts/addons/foo"));
    assert!(fs::symlink_metadata(&live).unwrap().file_type().is_symlink());

    let reopened = Repository::open(root.path()).unwrap();
    let studio = setup(&reopened, uuid);
    assert_eq!(studio.members().len(), 2);
    assert_eq!(studio.members_of(ComponentKind::DevAddon).count(), 1);
    assert!(reopened.setups.is_verified(uuid));
}

#[test]
fn test_member_removed_from_disk_fails_verification() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let mut repo = Repository::open(root.path()).unwrap();
    let tool = write_file(&src.path().join("tool.py"), &bl_info("Tool", (1, 0, 0)));
    let addon: Component = Addon::from_path(&tool, None).unwrap().into();

    let uuid = repo.create_setup("studio").unwrap();
    let mut studio = setup(&repo, uuid);
    let deployed = studio.add_component(&addon, false).unwrap();
    assert!(matches!(
        studio.add_component(&addon, false),
        Err(DepotError::Duplicate(..))
    ));
    studio.add_component(&addon, true).unwrap();
    assert_eq!(studio.members().len(), 1);

    fs::remove_file(&deployed).unwrap();
    assert!(studio.verify().is_err());
}

#[test]
fn test_rename_rewrites_record() {
    let root = tempfile::tempdir().unwrap();
    let mut repo = Repository::open(root.path()).unwrap();
    let uuid = repo.create_setup("studio").unwrap();
    let mut studio = setup(&repo, uuid);
    let old_record = repo.setups.record_path(&studio);

    studio.rename("render", Some(repo.root())).unwrap();
    let new_record = repo.setups.record_path(&studio);
    repo.setups.update(studio).unwrap();

    assert_ne!(old_record, new_record);
    assert!(!old_record.exists());
    assert!(new_record.is_file());
    assert!(root.path().join("Setups/render/setup.json").is_file());

    let reopened = Repository::open(root.path()).unwrap();
    assert_eq!(reopened.find_by_name(ComponentKind::Setup, "render").len(), 1);
    assert!(reopened.find_by_name(ComponentKind::Setup, "studio").is_empty());
}

#[test]
fn test_duplicate_keeps_dev_links() {
    let src = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let mut repo = Repository::open(root.path()).unwrap();
    let live_dir = src.path().join("live");
    write_file(&live_dir.join("__init__.py"), &bl_info("Live", (0, 1, 0)));
    let live: Component = Addon::dev_from_path(&live_dir).unwrap().into();

    let uuid = repo.create_setup("studio").unwrap();
    let mut studio = setup(&repo, uuid);
    studio.add_component(&live, false).unwrap();
    repo.setups.update(studio.clone()).unwrap();

    let copy = studio.duplicate("studio_copy", Some(repo.root())).unwrap();
    let copy_uuid = repo.add_component(copy.into(), false, false).unwrap();
    let copy = setup(&repo, copy_uuid);

    let member = &copy.members()[0];
    let link = copy.setup_dir().unwrap().join(&member.deployed_path);
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert!(copy.verify().is_ok());
    assert_eq!(repo.setups.len(), 2);
}
