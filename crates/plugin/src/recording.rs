//! Captured resources that let a provider answer queries without a live target.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use inquest_engine::{Args, Connection, EngineError, Resource, ResourceSnapshot, Runtime};
use inquest_types::{Asset, FieldResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PluginError;

/// Everything captured from one asset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAsset {
    pub asset: Asset,
    #[serde(default)]
    pub resources: Vec<ResourceSnapshot>,
}

/// A document of recorded assets, as stored on disk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    #[serde(default)]
    pub assets: Vec<RecordedAsset>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let content = fs::read_to_string(path)
            .map_err(|error| PluginError::recording(format!("failed to read {}: {error}", path.display())))?;
        serde_json::from_str(&content).map_err(|error| PluginError::recording(format!("failed to parse {}: {error}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), PluginError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| PluginError::recording(error.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|error| PluginError::recording(error.to_string()))?;
        fs::write(path, content).map_err(|error| PluginError::recording(format!("failed to write {}: {error}", path.display())))
    }

    /// Find the recorded asset that describes `asset`.
    ///
    /// Matches by asset id first, then by any shared platform id, then by name.
    pub fn find_asset(&self, asset: &Asset) -> Option<&RecordedAsset> {
        let by_id = || {
            (!asset.id.is_empty())
                .then(|| self.assets.iter().find(|recorded| recorded.asset.id == asset.id))
                .flatten()
        };
        let by_platform_id = || {
            self.assets.iter().find(|recorded| {
                recorded
                    .asset
                    .platform_ids
                    .iter()
                    .any(|platform_id| asset.platform_ids.contains(platform_id))
            })
        };
        let by_name = || {
            (!asset.name.is_empty())
                .then(|| self.assets.iter().find(|recorded| recorded.asset.name == asset.name))
                .flatten()
        };
        by_id().or_else(by_platform_id).or_else(by_name)
    }

    /// Add or replace the entry for the runtime's asset with its settled resources.
    pub fn capture<C: Connection>(&mut self, runtime: &Runtime<C>) {
        let mut asset = runtime.asset();
        for config in &mut asset.connections {
            config.id = None;
            config.credentials.clear();
        }
        let recorded = RecordedAsset {
            resources: runtime.snapshot(),
            asset,
        };
        match self.assets.iter_mut().find(|existing| same_asset(&existing.asset, &recorded.asset)) {
            Some(existing) => *existing = recorded,
            None => self.assets.push(recorded),
        }
    }
}

impl RecordedAsset {
    /// Recreate every recorded resource inside `runtime`.
    pub async fn seed<C: Connection>(&self, runtime: &Arc<Runtime<C>>) -> Result<usize, PluginError> {
        for snapshot in &self.resources {
            restore(runtime, snapshot.clone()).await?;
        }
        debug!(
            connection_id = runtime.connection().id(),
            asset = %self.asset.name,
            resources = self.resources.len(),
            "recording seeded"
        );
        Ok(self.resources.len())
    }
}

fn same_asset(left: &Asset, right: &Asset) -> bool {
    if !left.id.is_empty() || !right.id.is_empty() {
        return left.id == right.id;
    }
    left.name == right.name
}

/// Create the instance described by `snapshot`, seeding its recorded fields.
///
/// Successful fields become creation arguments; recorded failures are stored
/// as field errors afterwards. Fields already settled on a deduplicated
/// instance are left untouched.
pub(crate) async fn restore<C: Connection>(runtime: &Arc<Runtime<C>>, snapshot: ResourceSnapshot) -> Result<Arc<Resource<C>>, PluginError> {
    let mut args = Args::new();
    let mut failures = Vec::new();
    for (field, result) in snapshot.fields {
        match result {
            FieldResult::Data(data) => {
                args.insert(field, data);
            }
            FieldResult::Error { error } => failures.push((field, error)),
        }
    }

    let resource = runtime.create(&snapshot.resource, args).await?;
    for (field, error) in failures {
        match resource.set_error(&field, anyhow!(error)) {
            Ok(()) | Err(EngineError::AlreadySet { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }
    Ok(resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use inquest_types::RawData;
    use tempfile::tempdir;

    fn recorded(id: &str, name: &str, platform_ids: &[&str]) -> RecordedAsset {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldResult::Data(RawData::string("root")));
        RecordedAsset {
            asset: Asset {
                id: id.into(),
                name: name.into(),
                platform_ids: platform_ids.iter().map(|id| id.to_string()).collect(),
                ..Asset::default()
            },
            resources: vec![ResourceSnapshot {
                resource: "user".into(),
                id: "root".into(),
                fields,
            }],
        }
    }

    #[test]
    fn assets_match_by_id_then_platform_id_then_name() {
        let recording = Recording {
            assets: vec![
                recorded("a-1", "alpha", &["//platform/host/alpha"]),
                recorded("", "beta", &["//platform/host/beta"]),
            ],
        };

        let by_id = Asset {
            id: "a-1".into(),
            ..Asset::default()
        };
        assert_eq!(recording.find_asset(&by_id).map(|found| found.asset.name.as_str()), Some("alpha"));

        let by_platform_id = Asset {
            platform_ids: vec!["//platform/host/beta".into()],
            ..Asset::default()
        };
        assert_eq!(
            recording.find_asset(&by_platform_id).map(|found| found.asset.name.as_str()),
            Some("beta")
        );

        assert_eq!(recording.find_asset(&Asset::new("beta")).map(|found| found.asset.name.as_str()), Some("beta"));
        assert!(recording.find_asset(&Asset::new("gamma")).is_none());
    }

    #[test]
    fn recordings_survive_the_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("recording.json");
        let mut recording = Recording::default();
        recording.assets.push(recorded("a-1", "alpha", &[]));
        recording.assets[0].resources[0]
            .fields
            .insert("shell".into(), FieldResult::Error { error: "permission denied".into() });

        recording.save(&path).expect("save");
        assert_eq!(Recording::load(&path).expect("load"), recording);
    }

    #[test]
    fn missing_recordings_are_reported() {
        let dir = tempdir().expect("tempdir");
        let error = Recording::load(&dir.path().join("absent.json")).expect_err("missing file");
        assert!(matches!(error, PluginError::Recording { .. }));
    }
}
