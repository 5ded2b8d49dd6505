use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use switchboard_core::{Result, SwitchboardError};

/// Deterministic backup location for a module.
pub fn backup_path(backup_dir: &Path, module: &str) -> PathBuf {
    backup_dir.join(module)
}

/// Copy `module_dir` into its backup slot, replacing any earlier backup.
pub async fn backup_module(module_dir: &Path, backup_dir: &Path, module: &str) -> Result<PathBuf> {
    let src = module_dir.to_path_buf();
    let dst = backup_path(backup_dir, module);
    let dst_for_task = dst.clone();
    run_blocking(module, move || {
        if !src.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("module directory {} does not exist", src.display()),
            ));
        }
        remove_if_present(&dst_for_task)?;
        copy_dir_recursive(&src, &dst_for_task)
    })
    .await?;
    info!(module, backup = %dst.display(), "module backed up");
    Ok(dst)
}

/// Replace `module_dir` with the last backup. Files created since the
/// backup do not survive.
pub async fn restore_module(module_dir: &Path, backup_dir: &Path, module: &str) -> Result<()> {
    let src = backup_path(backup_dir, module);
    let dst = module_dir.to_path_buf();
    run_blocking(module, move || {
        if !src.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no backup at {}", src.display()),
            ));
        }
        remove_if_present(&dst)?;
        copy_dir_recursive(&src, &dst)
    })
    .await?;
    info!(module, dir = %module_dir.display(), "module restored from backup");
    Ok(())
}

async fn run_blocking<F>(module: &str, f: F) -> Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    let backup_err = |reason: String| SwitchboardError::Backup {
        module: module.to_string(),
        reason,
    };
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| backup_err(e.to_string()))?
        .map_err(|e| backup_err(e.to_string()))
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
