//! Every workspace crate takes its version from the workspace.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn manifest(path: &Path) -> toml::Value {
    let text = std::fs::read_to_string(path.join("Cargo.toml"))
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
    text.parse().unwrap()
}

#[test]
fn all_members_use_workspace_version() {
    let root = workspace_root();
    let doc = manifest(&root);
    let members = doc["workspace"]["members"].as_array().unwrap();
    assert!(!members.is_empty());

    for member in members {
        let member = member.as_str().unwrap();
        let pkg = manifest(&root.join(member));
        let inherited = pkg["package"]["version"]
            .get("workspace")
            .and_then(|v| v.as_bool());
        assert_eq!(
            inherited,
            Some(true),
            "{} should use version.workspace = true",
            member
        );
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    let doc = manifest(&workspace_root());
    let ws_version = doc["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(ws_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(simbridge_core::VERSION, ws_version);
}
