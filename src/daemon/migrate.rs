// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Detects a legacy single-beacon on-disk layout and migrates it, atomically
//! and with rollback on failure, under `multibeacon/<default>/` (`spec.md §6`).

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

const LEGACY_ENTRIES: [&str; 3] = ["groups", "key", "db"];
const MULTIBEACON_ROOT: &str = "multibeacon";

/// A legacy layout is a base folder containing `groups/`, `key/`, and
/// `db/` directly, with no `multibeacon/` root yet.
pub fn is_legacy_layout(base: &Path) -> bool {
    if base.join(MULTIBEACON_ROOT).exists() {
        return false;
    }
    LEGACY_ENTRIES.iter().all(|entry| base.join(entry).exists())
}

/// Moves the legacy `groups/`, `key/`, `db/` subtrees into
/// `multibeacon/<default_beacon_id>/`, atomically: everything is staged in
/// a temporary sibling directory and only renamed into place once every
/// entry has been staged, with the staging directory removed on any
/// failure so a half-migrated layout is never left behind.
pub fn migrate(base: &Path, default_beacon_id: &str) -> Result<PathBuf> {
    if !is_legacy_layout(base) {
        return Err(Error::Migration("no legacy layout present".to_string()));
    }

    let staging = base.join(format!(".{}-migrating", MULTIBEACON_ROOT));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let result = (|| -> Result<()> {
        for entry in LEGACY_ENTRIES {
            std::fs::rename(base.join(entry), staging.join(entry))?;
        }
        Ok(())
    })();

    if let Err(err) = result {
        for entry in LEGACY_ENTRIES {
            let staged = staging.join(entry);
            if staged.exists() {
                let _ = std::fs::rename(&staged, base.join(entry));
            }
        }
        let _ = std::fs::remove_dir_all(&staging);
        return Err(Error::Migration(format!("rolled back: {}", err)));
    }

    let multibeacon = base.join(MULTIBEACON_ROOT);
    std::fs::create_dir_all(&multibeacon)?;
    let destination = multibeacon.join(default_beacon_id);
    std::fs::rename(&staging, &destination)?;
    Ok(destination)
}

/// Recursively copies `src` into `dst`, creating `dst` and any missing
/// intermediate directories. Used for `BackupDatabase`, where the `sled`
/// files under a beacon directory must be duplicated rather than moved.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let destination = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &destination)?;
        } else {
            std::fs::copy(entry.path(), destination)?;
        }
    }
    Ok(())
}
