//! Host directories backing container volumes.

use crate::types::VolumeMount;
use dockerkit::Mount;
use std::path::{Path, PathBuf};

/// Host path of a volume; relative paths resolve under `root`.
pub fn host_path(root: &Path, volume: &VolumeMount) -> PathBuf {
    if volume.host_path.is_absolute() {
        volume.host_path.clone()
    } else {
        root.join(&volume.host_path)
    }
}

/// Create every volume directory that does not exist yet and return the mounts.
pub fn ensure_volumes(root: &Path, volumes: &[VolumeMount]) -> std::io::Result<Vec<Mount>> {
    let mut mounts = Vec::with_capacity(volumes.len());
    for volume in volumes {
        let path = host_path(root, volume);
        if !path.is_dir() {
            log::debug!("Creating volume directory {}", path.display());
            std::fs::create_dir_all(&path)?;
        }
        mounts.push(Mount {
            host_path: path,
            container_path: volume.container_path.clone(),
            read_only: volume.read_only,
        });
    }
    Ok(mounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn volume(host: &str) -> VolumeMount {
        VolumeMount {
            host_path: host.into(),
            container_path: "/data".to_string(),
            read_only: false,
        }
    }

    #[test]
    fn test_relative_volume_created_under_root() {
        let tmp = TempDir::new().unwrap();
        let mounts = ensure_volumes(tmp.path(), &[volume("db/data")]).unwrap();

        assert_eq!(mounts[0].host_path, tmp.path().join("db/data"));
        assert!(tmp.path().join("db/data").is_dir());
    }

    #[test]
    fn test_existing_directory_is_kept() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("keep");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("file"), "x").unwrap();

        let absolute = volume(dir.to_str().unwrap());
        ensure_volumes(tmp.path(), &[absolute.clone()]).unwrap();
        ensure_volumes(tmp.path(), &[absolute]).unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("file")).unwrap(), "x");
    }
}
