// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Post-query side effects for INSERTs: move staged files into place and
//! surface the written partitions to the catalog.

use std::collections::{BTreeMap, BTreeSet};

use opendal::Operator;

use crate::common::status::{Status, StatusCode};
use crate::fs::local::{delete_file, path_exists, rename_file};
use crate::novacoord_logging::{debug, info};
use crate::plan::FinalizeParams;
use crate::service::backend_client::FileMove;

/// Catalog changes the FE applies once the query commits.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CatalogUpdate {
    pub db_name: String,
    pub target_table: String,
    /// Partition keys that received rows; empty string is the whole table.
    pub created_partitions: BTreeSet<String>,
}

/// Apply `files_to_move` in report order. An empty `dest` deletes `src`.
/// A move whose `src` is gone but whose `dest` exists is treated as already
/// applied, so a replay within the same query is harmless; a pre-existing
/// `dest` with `src` still present is a conflict unless the plan flags
/// overwrite.
pub fn move_insert_files(
    op: &Operator,
    params: &FinalizeParams,
    files_to_move: &[FileMove],
) -> Result<(), Status> {
    for file_move in files_to_move {
        if file_move.dest.is_empty() {
            debug!(src = %file_move.src, "finalize: deleting staging file");
            delete_file(op, &file_move.src)
                .map_err(|e| Status::new(StatusCode::FinalizeFailed, format!("{e:#}")))?;
            continue;
        }
        let src_exists = path_exists(op, &file_move.src)
            .map_err(|e| Status::new(StatusCode::FinalizeFailed, format!("{e:#}")))?;
        let dest_exists = path_exists(op, &file_move.dest)
            .map_err(|e| Status::new(StatusCode::FinalizeFailed, format!("{e:#}")))?;
        if !src_exists && dest_exists {
            debug!(src = %file_move.src, dest = %file_move.dest, "finalize: move already applied");
            continue;
        }
        if dest_exists {
            if !params.is_overwrite {
                return Err(Status::new(
                    StatusCode::FinalizeFailed,
                    format!(
                        "destination file already exists: {} (table {}.{})",
                        file_move.dest, params.table_db, params.table_name
                    ),
                ));
            }
            delete_file(op, &file_move.dest)
                .map_err(|e| Status::new(StatusCode::FinalizeFailed, format!("{e:#}")))?;
        }
        debug!(src = %file_move.src, dest = %file_move.dest, "finalize: moving file");
        rename_file(op, &file_move.src, &file_move.dest)
            .map_err(|e| Status::new(StatusCode::FinalizeFailed, format!("{e:#}")))?;
    }
    info!(
        table_db = %params.table_db,
        table_name = %params.table_name,
        num_moves = files_to_move.len(),
        "finalize: file moves complete"
    );
    Ok(())
}

/// Catalog update derived from the accumulated partition row counts; `None`
/// when nothing was written.
pub fn build_catalog_update(
    params: &FinalizeParams,
    partition_row_counts: &BTreeMap<String, i64>,
) -> Option<CatalogUpdate> {
    if partition_row_counts.is_empty() {
        return None;
    }
    Some(CatalogUpdate {
        db_name: params.table_db.clone(),
        target_table: params.table_name.clone(),
        created_partitions: partition_row_counts.keys().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::local::build_fs_operator;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_root(tag: &str) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "novacoord-finalize-test-{}-{}-{}",
            tag,
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).expect("create temp root");
        dir
    }

    fn finalize_params(overwrite: bool) -> FinalizeParams {
        FinalizeParams {
            table_db: "ssb".to_string(),
            table_name: "lineorder".to_string(),
            base_dir: "warehouse/ssb/lineorder".to_string(),
            is_overwrite: overwrite,
        }
    }

    fn mv(src: &str, dest: &str) -> FileMove {
        FileMove {
            src: src.to_string(),
            dest: dest.to_string(),
        }
    }

    #[test]
    fn moves_and_deletes_run_in_order() {
        let root = temp_root("order");
        std::fs::write(root.join("staging1.dat"), b"a").expect("write");
        std::fs::write(root.join("staging2.dat"), b"b").expect("write");
        let op = build_fs_operator(&root.to_string_lossy()).expect("operator");

        move_insert_files(
            &op,
            &finalize_params(false),
            &[mv("staging1.dat", "final1.dat"), mv("staging2.dat", "")],
        )
        .expect("finalize");

        assert!(root.join("final1.dat").exists());
        assert!(!root.join("staging1.dat").exists());
        assert!(!root.join("staging2.dat").exists());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn pre_existing_dest_conflicts_without_overwrite() {
        let root = temp_root("conflict");
        std::fs::write(root.join("staging.dat"), b"new").expect("write");
        std::fs::write(root.join("final.dat"), b"old").expect("write");
        let op = build_fs_operator(&root.to_string_lossy()).expect("operator");

        let err = move_insert_files(
            &op,
            &finalize_params(false),
            &[mv("staging.dat", "final.dat")],
        )
        .expect_err("conflict");
        assert_eq!(err.code(), StatusCode::FinalizeFailed);
        // The old file is untouched.
        assert_eq!(std::fs::read(root.join("final.dat")).expect("read"), b"old");

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn overwrite_replaces_pre_existing_dest() {
        let root = temp_root("overwrite");
        std::fs::write(root.join("staging.dat"), b"new").expect("write");
        std::fs::write(root.join("final.dat"), b"old").expect("write");
        let op = build_fs_operator(&root.to_string_lossy()).expect("operator");

        move_insert_files(
            &op,
            &finalize_params(true),
            &[mv("staging.dat", "final.dat")],
        )
        .expect("finalize");
        assert_eq!(std::fs::read(root.join("final.dat")).expect("read"), b"new");

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn replayed_move_is_skipped() {
        let root = temp_root("replay");
        std::fs::write(root.join("final.dat"), b"rows").expect("write");
        let op = build_fs_operator(&root.to_string_lossy()).expect("operator");

        // src already moved to dest by a previous attempt of the same query.
        move_insert_files(
            &op,
            &finalize_params(false),
            &[mv("staging.dat", "final.dat")],
        )
        .expect("replay tolerated");
        assert_eq!(std::fs::read(root.join("final.dat")).expect("read"), b"rows");

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn catalog_update_requires_written_partitions() {
        let params = finalize_params(false);
        assert!(build_catalog_update(&params, &BTreeMap::new()).is_none());

        let mut counts = BTreeMap::new();
        counts.insert("p=1".to_string(), 125i64);
        counts.insert("p=2".to_string(), 50i64);
        let update = build_catalog_update(&params, &counts).expect("update");
        assert_eq!(update.target_table, "lineorder");
        assert_eq!(
            update.created_partitions.iter().cloned().collect::<Vec<_>>(),
            vec!["p=1".to_string(), "p=2".to_string()]
        );
    }
}
