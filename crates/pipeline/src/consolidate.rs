use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walletscan_core_types::KeySet;
use walletscan_storage::{load_key_set, merge_into_file, MergeReport};

use crate::elimination::HOLDERS_FILE_NAME;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConsolidation {
    pub group: String,
    pub path: PathBuf,
    pub collections: usize,
    pub merge: MergeReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub groups: Vec<GroupConsolidation>,
    /// `None` when no collection held any key, in which case the master list
    /// is left untouched.
    pub master: Option<MergeReport>,
}

/// `<wallets_dir>/<group>/<group>.csv`
pub fn group_list_path(wallets_dir: &Path, group: &str) -> PathBuf {
    wallets_dir.join(group).join(format!("{group}.csv"))
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        if entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Merges every `<group>/<collection>/holders.csv` under `wallets_dir` into
/// its group list, then all collection holders into the master list. Both
/// merges are union-only: re-running with the same holder files changes
/// nothing, and keys already in a target list are never dropped.
pub fn consolidate_holder_lists(
    wallets_dir: &Path,
    master_path: &Path,
) -> Result<ConsolidationReport> {
    let mut report = ConsolidationReport::default();
    let mut all_holders = KeySet::new();

    for group_dir in sorted_subdirs(wallets_dir)? {
        let Some(group) = group_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
        else {
            continue;
        };

        let mut group_holders = KeySet::new();
        let mut collections = 0usize;
        for collection_dir in sorted_subdirs(&group_dir)? {
            let holders_path = collection_dir.join(HOLDERS_FILE_NAME);
            if !holders_path.is_file() {
                continue;
            }
            collections += 1;
            let holders = load_key_set(&holders_path);
            debug!(
                group = %group,
                path = %holders_path.display(),
                holders = holders.len(),
                "read collection holders"
            );
            for key in &holders {
                group_holders.insert(key.clone());
            }
        }
        if group_holders.is_empty() {
            debug!(group = %group, collections, "no holders to consolidate");
            continue;
        }

        let path = group_list_path(wallets_dir, &group);
        let merge = merge_into_file(&path, &group_holders)
            .with_context(|| format!("failed to consolidate group list {}", path.display()))?;
        info!(
            group = %group,
            collections,
            holders = merge.merged,
            added = merge.added,
            path = %path.display(),
            "group list consolidated"
        );
        for key in &group_holders {
            all_holders.insert(key.clone());
        }
        report.groups.push(GroupConsolidation {
            group,
            path,
            collections,
            merge,
        });
    }

    if !all_holders.is_empty() {
        let merge = merge_into_file(master_path, &all_holders).with_context(|| {
            format!("failed to consolidate master list {}", master_path.display())
        })?;
        info!(
            groups = report.groups.len(),
            holders = merge.merged,
            added = merge.added,
            path = %master_path.display(),
            "master list consolidated"
        );
        report.master = Some(merge);
    }
    Ok(report)
}
