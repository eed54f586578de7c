// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Filesystem facade: write, read, delete, and rename wrappers over
//! `std::fs` (sync) and `tokio::fs` (async).
//!
//! Effects are emitted only after the underlying call returns success, so
//! the signature describes writes that happened rather than attempts that
//! failed. A rename emits a delete of the source and a write of the
//! destination; when the primitive fails, neither is emitted.
//!
//! Reads of paths matching `policy.sensitive.block_file_globs` emit an
//! additional `sensitive_access` event. Only reads routed through this
//! facade are observed; library reads that bypass it are a documented
//! coverage gap.

use std::path::Path;
use std::sync::Arc;

use crate::canonicalize::resolve_path_best_effort;
use crate::patches::PatchContext;
use crate::policy::globs;
use crate::trace::{EffectCategory, EffectData, FsEffect, SensitiveEffect, SensitiveType};

/// Recorded filesystem operations.
pub struct RecordedFs {
    ctx: Arc<PatchContext>,
}

impl RecordedFs {
    pub fn new(ctx: Arc<PatchContext>) -> Self {
        Self { ctx }
    }

    fn record(&self, category: EffectCategory, requested: &Path) {
        let resolved = resolve_path_best_effort(requested, &self.ctx.workspace_root);
        if self.ctx.is_own_path(&resolved.resolved_abs) {
            return;
        }
        let resolved_str = resolved.resolved_abs.to_string_lossy().into_owned();
        self.ctx.emit(EffectData::fs(
            category,
            FsEffect {
                path_requested: requested.to_string_lossy().into_owned(),
                path_resolved: resolved_str.clone(),
                is_workspace_local: resolved.is_workspace_local,
            },
        ));

        if category == EffectCategory::FsRead {
            let blocked = &self.ctx.config.policy.sensitive.block_file_globs;
            if blocked
                .iter()
                .any(|pattern| globs::path_glob_match(pattern, &resolved_str))
            {
                self.ctx.emit(EffectData::sensitive(SensitiveEffect {
                    access_type: SensitiveType::FileRead,
                    key_name: Some(resolved_str),
                }));
            }
        }
    }

    fn record_if_active(&self, category: EffectCategory, requested: &Path) {
        if !self.ctx.bypassed() {
            self.record(category, requested);
        }
    }

    // ── Sync writes ─────────────────────────────────────────────────────

    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
        let path = path.as_ref();
        let result = std::fs::write(path, contents);
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsWrite, path);
        }
        result
    }

    pub fn append(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> std::io::Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(contents.as_ref()));
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsWrite, path);
        }
        result
    }

    pub fn truncate(&self, path: impl AsRef<Path>, len: u64) -> std::io::Result<()> {
        let path = path.as_ref();
        let result = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_len(len));
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsWrite, path);
        }
        result
    }

    pub fn create_dir(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let result = std::fs::create_dir(path);
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsWrite, path);
        }
        result
    }

    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let result = std::fs::create_dir_all(path);
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsWrite, path);
        }
        result
    }

    // ── Sync reads ──────────────────────────────────────────────────────

    pub fn read(&self, path: impl AsRef<Path>) -> std::io::Result<Vec<u8>> {
        let path = path.as_ref();
        let result = std::fs::read(path);
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsRead, path);
        }
        result
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> std::io::Result<String> {
        let path = path.as_ref();
        let result = std::fs::read_to_string(path);
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsRead, path);
        }
        result
    }

    // ── Sync deletes ────────────────────────────────────────────────────

    pub fn remove_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        // Resolve before the unlink removes the target.
        let resolved = resolve_path_best_effort(path, &self.ctx.workspace_root);
        let result = std::fs::remove_file(path);
        if result.is_ok() && !self.ctx.bypassed() && !self.ctx.is_own_path(&resolved.resolved_abs)
        {
            self.ctx.emit(EffectData::fs(
                EffectCategory::FsDelete,
                FsEffect {
                    path_requested: path.to_string_lossy().into_owned(),
                    path_resolved: resolved.resolved_abs.to_string_lossy().into_owned(),
                    is_workspace_local: resolved.is_workspace_local,
                },
            ));
        }
        result
    }

    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let resolved = resolve_path_best_effort(path, &self.ctx.workspace_root);
        let result = std::fs::remove_dir_all(path);
        if result.is_ok() && !self.ctx.bypassed() && !self.ctx.is_own_path(&resolved.resolved_abs)
        {
            self.ctx.emit(EffectData::fs(
                EffectCategory::FsDelete,
                FsEffect {
                    path_requested: path.to_string_lossy().into_owned(),
                    path_resolved: resolved.resolved_abs.to_string_lossy().into_owned(),
                    is_workspace_local: resolved.is_workspace_local,
                },
            ));
        }
        result
    }

    /// Rename: on success, a delete of the source and a write of the
    /// destination.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> std::io::Result<()> {
        let from = from.as_ref();
        let to = to.as_ref();
        let from_resolved = resolve_path_best_effort(from, &self.ctx.workspace_root);
        let result = std::fs::rename(from, to);
        if result.is_ok() && !self.ctx.bypassed() {
            if !self.ctx.is_own_path(&from_resolved.resolved_abs) {
                self.ctx.emit(EffectData::fs(
                    EffectCategory::FsDelete,
                    FsEffect {
                        path_requested: from.to_string_lossy().into_owned(),
                        path_resolved: from_resolved.resolved_abs.to_string_lossy().into_owned(),
                        is_workspace_local: from_resolved.is_workspace_local,
                    },
                ));
            }
            self.record(EffectCategory::FsWrite, to);
        }
        result
    }

    // ── Async variants (emit on resolve only) ───────────────────────────

    pub async fn write_async(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        let result = tokio::fs::write(path, contents.as_ref()).await;
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsWrite, path);
        }
        result
    }

    pub async fn append_async(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        let path = path.as_ref();
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(contents.as_ref()).await
        }
        .await;
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsWrite, path);
        }
        result
    }

    pub async fn read_async(&self, path: impl AsRef<Path>) -> std::io::Result<Vec<u8>> {
        let path = path.as_ref();
        let result = tokio::fs::read(path).await;
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsRead, path);
        }
        result
    }

    pub async fn read_to_string_async(&self, path: impl AsRef<Path>) -> std::io::Result<String> {
        let path = path.as_ref();
        let result = tokio::fs::read_to_string(path).await;
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsRead, path);
        }
        result
    }

    pub async fn create_dir_all_async(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let result = tokio::fs::create_dir_all(path).await;
        if result.is_ok() {
            self.record_if_active(EffectCategory::FsWrite, path);
        }
        result
    }

    pub async fn remove_file_async(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let resolved = resolve_path_best_effort(path, &self.ctx.workspace_root);
        let result = tokio::fs::remove_file(path).await;
        if result.is_ok() && !self.ctx.bypassed() && !self.ctx.is_own_path(&resolved.resolved_abs)
        {
            self.ctx.emit(EffectData::fs(
                EffectCategory::FsDelete,
                FsEffect {
                    path_requested: path.to_string_lossy().into_owned(),
                    path_resolved: resolved.resolved_abs.to_string_lossy().into_owned(),
                    is_workspace_local: resolved.is_workspace_local,
                },
            ));
        }
        result
    }

    pub async fn rename_async(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> std::io::Result<()> {
        let from = from.as_ref();
        let to = to.as_ref();
        let from_resolved = resolve_path_best_effort(from, &self.ctx.workspace_root);
        let result = tokio::fs::rename(from, to).await;
        if result.is_ok() && !self.ctx.bypassed() {
            if !self.ctx.is_own_path(&from_resolved.resolved_abs) {
                self.ctx.emit(EffectData::fs(
                    EffectCategory::FsDelete,
                    FsEffect {
                        path_requested: from.to_string_lossy().into_owned(),
                        path_resolved: from_resolved.resolved_abs.to_string_lossy().into_owned(),
                        is_workspace_local: from_resolved.is_workspace_local,
                    },
                ));
            }
            self.record(EffectCategory::FsWrite, to);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patches::test_support::{recorded_effects, test_context, test_context_with_config};
    use crate::config::PolicyConfig;

    #[test]
    fn test_write_emits_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        fs.write(dir.path().join("out.txt"), b"hello").unwrap();

        let effects = recorded_effects(&ctx);
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].category, EffectCategory::FsWrite);
        let fs_effect = effects[0].fs.as_ref().unwrap();
        assert!(fs_effect.is_workspace_local);
        assert!(fs_effect.path_resolved.ends_with("out.txt"));
    }

    #[test]
    fn test_failed_write_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        let result = fs.write(dir.path().join("missing-dir/out.txt"), b"x");
        assert!(result.is_err());
        assert!(recorded_effects(&ctx).is_empty());
    }

    #[test]
    fn test_read_emits_on_success_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        assert!(fs.read(dir.path().join("absent.txt")).is_err());
        assert!(recorded_effects(&ctx).is_empty());

        std::fs::write(dir.path().join("present.txt"), "x").unwrap();
        fs.read(dir.path().join("present.txt")).unwrap();
        let effects = recorded_effects(&ctx);
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].category, EffectCategory::FsRead);
    }

    #[test]
    fn test_rename_emits_delete_then_write() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        let src = dir.path().join("old.txt");
        std::fs::write(&src, "x").unwrap();
        fs.rename(&src, dir.path().join("new.txt")).unwrap();

        let effects = recorded_effects(&ctx);
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].category, EffectCategory::FsDelete);
        assert!(effects[0].fs.as_ref().unwrap().path_resolved.ends_with("old.txt"));
        assert_eq!(effects[1].category, EffectCategory::FsWrite);
        assert!(effects[1].fs.as_ref().unwrap().path_resolved.ends_with("new.txt"));
    }

    #[test]
    fn test_failed_rename_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        let result = fs.rename(dir.path().join("absent.txt"), dir.path().join("new.txt"));
        assert!(result.is_err());
        assert!(recorded_effects(&ctx).is_empty());
    }

    #[test]
    fn test_remove_file_emits_delete() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        let target = dir.path().join("junk.txt");
        std::fs::write(&target, "x").unwrap();
        fs.remove_file(&target).unwrap();

        let effects = recorded_effects(&ctx);
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].category, EffectCategory::FsDelete);
    }

    #[test]
    fn test_own_agentci_io_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        let own = dir.path().join(".agentci/notes.txt");
        std::fs::create_dir_all(own.parent().unwrap()).unwrap();
        fs.write(&own, b"internal").unwrap();

        assert!(recorded_effects(&ctx).is_empty());
    }

    #[test]
    fn test_sensitive_file_read_escalates() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PolicyConfig::default();
        config.workspace_root = dir.path().to_string_lossy().into_owned();
        config.policy.sensitive.block_file_globs = vec!["**/credentials.json".to_string()];
        let ctx = test_context_with_config(dir.path(), config);
        let fs = RecordedFs::new(Arc::clone(&ctx));

        let secret = dir.path().join("credentials.json");
        std::fs::write(&secret, "{}").unwrap();
        fs.read(&secret).unwrap();

        let effects = recorded_effects(&ctx);
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].category, EffectCategory::FsRead);
        assert_eq!(effects[1].category, EffectCategory::SensitiveAccess);
        let sensitive = effects[1].sensitive.as_ref().unwrap();
        assert_eq!(sensitive.access_type, SensitiveType::FileRead);
        assert!(sensitive.key_name.as_ref().unwrap().ends_with("credentials.json"));
    }

    #[test]
    fn test_create_dir_all_emits_write() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        fs.create_dir_all(dir.path().join("a/b/c")).unwrap();
        let effects = recorded_effects(&ctx);
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].category, EffectCategory::FsWrite);
    }

    #[tokio::test]
    async fn test_async_write_emits_on_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        fs.write_async(dir.path().join("out.txt"), b"async").await.unwrap();
        let effects = recorded_effects(&ctx);
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].category, EffectCategory::FsWrite);
    }

    #[tokio::test]
    async fn test_async_failure_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        assert!(fs.read_async(dir.path().join("absent.txt")).await.is_err());
        assert!(recorded_effects(&ctx).is_empty());
    }

    #[tokio::test]
    async fn test_async_rename() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let fs = RecordedFs::new(Arc::clone(&ctx));

        let src = dir.path().join("a.txt");
        tokio::fs::write(&src, "x").await.unwrap();
        fs.rename_async(&src, dir.path().join("b.txt")).await.unwrap();

        let effects = recorded_effects(&ctx);
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].category, EffectCategory::FsDelete);
        assert_eq!(effects[1].category, EffectCategory::FsWrite);
    }
}
