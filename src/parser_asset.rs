//! Structured-asset parser for JSON and YAML files.
//!
//! Produces one `asset` entity per file with a capped content preview and
//! up to 25 top-level keys recorded as metadata. Dependency manifests
//! (`package.json`) additionally emit one `DEPENDS_ON_PACKAGE` edge per
//! declared dependency, carrying the version string as an edge property.

use anyhow::{Context, Result};

use crate::models::{
    preview, EntityKind, Extraction, ParsedEntity, ParsedRelationship, RelationKind,
};

/// Content preview cap for `asset` entities.
const ASSET_PREVIEW_CHARS: usize = 1000;

/// At most this many top-level keys are recorded as metadata.
const MAX_TOP_LEVEL_KEYS: usize = 25;

pub fn supports(path: &str) -> bool {
    path.ends_with(".json") || path.ends_with(".yaml") || path.ends_with(".yml")
}

pub fn parse_asset_file(path: &str, source: &str) -> Result<Extraction> {
    let value: serde_json::Value = if path.ends_with(".json") {
        serde_json::from_str(source).with_context(|| format!("Invalid JSON in {}", path))?
    } else {
        serde_yaml::from_str(source).with_context(|| format!("Invalid YAML in {}", path))?
    };

    let file_name = path.rsplit('/').next().unwrap_or(path);
    let top_level_keys: Vec<&String> = match &value {
        serde_json::Value::Object(map) => map.keys().take(MAX_TOP_LEVEL_KEYS).collect(),
        _ => Vec::new(),
    };

    let mut entity = ParsedEntity::new(EntityKind::Asset, file_name, path);
    entity.content = Some(preview(source, ASSET_PREVIEW_CHARS));
    entity.metadata = serde_json::json!({
        "format": if path.ends_with(".json") { "json" } else { "yaml" },
        "top_level_keys": top_level_keys,
    });
    let asset_id = entity.id.clone();

    let mut out = Extraction::default();
    out.entities.push(entity);

    if file_name == "package.json" {
        extract_package_dependencies(&value, &asset_id, &mut out);
    }

    Ok(out)
}

fn extract_package_dependencies(
    manifest: &serde_json::Value,
    asset_id: &str,
    out: &mut Extraction,
) {
    for section in ["dependencies", "devDependencies"] {
        let Some(deps) = manifest.get(section).and_then(|d| d.as_object()) else {
            continue;
        };
        for (name, version) in deps {
            let version = version.as_str().unwrap_or_default();
            out.relationships.push(
                ParsedRelationship::new(
                    RelationKind::DependsOnPackage,
                    asset_id,
                    &format!("package:{}", name),
                )
                .with_properties(serde_json::json!({
                    "version": version,
                    "dev": section == "devDependencies",
                })),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_asset_entity_with_top_level_keys() {
        let src = r#"{"name": "demo", "level": 3, "spawn": {"x": 1, "y": 2}}"#;
        let out = parse_asset_file("assets/level.json", src).unwrap();
        let asset = &out.entities[0];
        assert_eq!(asset.kind, EntityKind::Asset);
        assert_eq!(asset.id, "asset:assets/level.json");
        let keys = asset.metadata["top_level_keys"].as_array().unwrap();
        assert_eq!(keys.len(), 3);
        assert!(out.relationships.is_empty());
    }

    #[test]
    fn yaml_asset_is_supported() {
        let src = "name: pipeline\nsteps:\n  - build\n  - test\n";
        let out = parse_asset_file("ci/workflow.yaml", src).unwrap();
        assert_eq!(out.entities[0].metadata["format"], "yaml");
    }

    #[test]
    fn top_level_keys_are_capped() {
        let mut map = serde_json::Map::new();
        for i in 0..40 {
            map.insert(format!("key{:02}", i), serde_json::json!(i));
        }
        let src = serde_json::to_string(&serde_json::Value::Object(map)).unwrap();
        let out = parse_asset_file("assets/big.json", &src).unwrap();
        let keys = out.entities[0].metadata["top_level_keys"].as_array().unwrap();
        assert_eq!(keys.len(), MAX_TOP_LEVEL_KEYS);
    }

    #[test]
    fn package_manifest_emits_dependency_edges() {
        let src = r#"{
            "name": "game",
            "dependencies": {"phaser": "^3.80.0", "eventemitter3": "5.0.1"},
            "devDependencies": {"typescript": "~5.4.0"}
        }"#;
        let out = parse_asset_file("package.json", src).unwrap();
        let deps: Vec<_> = out
            .relationships
            .iter()
            .filter(|r| r.kind == RelationKind::DependsOnPackage)
            .collect();
        assert_eq!(deps.len(), 3);

        let phaser = deps
            .iter()
            .find(|r| r.target == "package:phaser")
            .unwrap();
        assert_eq!(phaser.properties["version"], "^3.80.0");
        assert_eq!(phaser.properties["dev"], false);

        let ts = deps
            .iter()
            .find(|r| r.target == "package:typescript")
            .unwrap();
        assert_eq!(ts.properties["dev"], true);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_asset_file("assets/broken.json", "{not json").is_err());
    }
}
