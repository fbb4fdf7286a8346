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
use anyhow::{anyhow, Context, Result};
use opendal::{ErrorKind, Operator};

use crate::runtime::io::io_block_on;

/// Filesystem operator anchored at `root`. Paths handed to the helpers below
/// are relative to it.
pub fn build_fs_operator(root: &str) -> Result<Operator> {
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)
        .context("init opendal fs operator")?
        .finish();
    Ok(op)
}

pub fn path_exists(op: &Operator, path: &str) -> Result<bool> {
    let stat = io_block_on(op.stat(path)).map_err(|e| anyhow!(e))?;
    match stat {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("stat {path}")),
    }
}

pub fn rename_file(op: &Operator, src: &str, dest: &str) -> Result<()> {
    io_block_on(op.rename(src, dest))
        .map_err(|e| anyhow!(e))?
        .with_context(|| format!("rename {src} -> {dest}"))
}

pub fn delete_file(op: &Operator, path: &str) -> Result<()> {
    io_block_on(op.delete(path))
        .map_err(|e| anyhow!(e))?
        .with_context(|| format!("delete {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_root(tag: &str) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "novacoord-fs-test-{}-{}-{}",
            tag,
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).expect("create temp root");
        dir
    }

    #[test]
    fn rename_moves_file_within_root() {
        let root = temp_root("rename");
        std::fs::write(root.join("staging.dat"), b"rows").expect("write");
        let op = build_fs_operator(&root.to_string_lossy()).expect("operator");

        rename_file(&op, "staging.dat", "final.dat").expect("rename");
        assert!(!root.join("staging.dat").exists());
        assert_eq!(std::fs::read(root.join("final.dat")).expect("read"), b"rows");

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn delete_and_exists() {
        let root = temp_root("delete");
        std::fs::write(root.join("tmp.dat"), b"x").expect("write");
        let op = build_fs_operator(&root.to_string_lossy()).expect("operator");

        assert!(path_exists(&op, "tmp.dat").expect("exists"));
        delete_file(&op, "tmp.dat").expect("delete");
        assert!(!path_exists(&op, "tmp.dat").expect("exists"));

        std::fs::remove_dir_all(&root).ok();
    }
}
