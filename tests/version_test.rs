// SPDX-License-Identifier: Apache-2.0

//! Member crates are released together, so their versions and their
//! path-dependency version requirements must match the root package.

use std::path::Path;

fn manifest(path: &Path) -> toml::Value {
    let text = std::fs::read_to_string(path).unwrap();
    toml::from_str(&text).unwrap()
}

#[test]
fn test_member_versions_match_root() {
    let root_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let root = manifest(&root_dir.join("Cargo.toml"));
    let version = root["package"]["version"].as_str().unwrap().to_string();
    assert_eq!(version, env!("CARGO_PKG_VERSION"));

    let members = root["workspace"]["members"].as_array().unwrap();
    for member in members.iter().filter_map(|m| m.as_str()) {
        let member_toml = manifest(&root_dir.join(member).join("Cargo.toml"));
        let name = member_toml["package"]["name"].as_str().unwrap();
        assert_eq!(
            member_toml["package"]["version"].as_str(),
            Some(version.as_str()),
            "version of {}",
            name
        );
        let Some(deps) = member_toml.get("dependencies").and_then(|d| d.as_table()) else {
            continue;
        };
        for (dep, spec) in deps {
            if spec.get("path").is_none() {
                continue;
            }
            if let Some(req) = spec.get("version").and_then(|v| v.as_str()) {
                assert_eq!(req, version, "{} -> {}", name, dep);
            }
        }
    }
}
