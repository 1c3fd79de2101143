//! Build-context materialization and fingerprinting.
//!
//! The fingerprint is a blake3 hash over the instructions and every context
//! file, sorted by path. It is stored as an image label at build time, so a
//! changed context is detected by comparing labels instead of rebuilding.

use crate::types::{BuildContext, FileSource};
use dockerkit::ContextFile;
use std::path::Path;
use walkdir::WalkDir;

/// Resolve every build file to bytes, sorted by context path.
///
/// A host directory contributes every regular file below it.
pub fn materialize(context: &BuildContext) -> std::io::Result<Vec<ContextFile>> {
    let mut files = Vec::new();
    for entry in &context.files {
        match &entry.source {
            FileSource::Inline(content) => files.push(ContextFile {
                path: entry.path.clone(),
                content: content.clone(),
            }),
            FileSource::Host(path) if path.is_dir() => {
                collect_dir(path, &entry.path, &mut files)?;
            }
            FileSource::Host(path) => files.push(ContextFile {
                path: entry.path.clone(),
                content: std::fs::read(path)?,
            }),
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|later, earlier| later.path == earlier.path);
    Ok(files)
}

fn collect_dir(root: &Path, prefix: &str, files: &mut Vec<ContextFile>) -> std::io::Result<()> {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        files.push(ContextFile {
            path: format!("{}/{relative}", prefix.trim_end_matches('/')),
            content: std::fs::read(entry.path())?,
        });
    }
    Ok(())
}

/// Fingerprint of instructions plus materialized files.
///
/// Each field is length-prefixed so that moving bytes between a path and its
/// content changes the hash.
pub fn fingerprint(instructions: &str, files: &[ContextFile]) -> String {
    let mut hasher = blake3::Hasher::new();
    update(&mut hasher, instructions.as_bytes());
    for file in files {
        update(&mut hasher, file.path.as_bytes());
        update(&mut hasher, &file.content);
    }
    hasher.finalize().to_hex().to_string()
}

fn update(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildFile;
    use tempfile::TempDir;

    fn inline(path: &str, content: &str) -> BuildFile {
        BuildFile {
            path: path.to_string(),
            source: FileSource::Inline(content.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_fingerprint_ignores_declaration_order() {
        let a = BuildContext {
            instructions: "FROM alpine".to_string(),
            files: vec![inline("a", "1"), inline("b", "2")],
        };
        let b = BuildContext {
            instructions: "FROM alpine".to_string(),
            files: vec![inline("b", "2"), inline("a", "1")],
        };

        let fa = fingerprint(&a.instructions, &materialize(&a).unwrap());
        let fb = fingerprint(&b.instructions, &materialize(&b).unwrap());
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let files = vec![ContextFile {
            path: "run.sh".to_string(),
            content: b"echo a".to_vec(),
        }];
        let mut changed = files.clone();
        changed[0].content = b"echo b".to_vec();

        assert_ne!(fingerprint("FROM alpine", &files), fingerprint("FROM alpine", &changed));
        assert_ne!(fingerprint("FROM alpine", &files), fingerprint("FROM debian", &files));
    }

    #[test]
    fn test_host_directory_is_walked() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("conf/sub")).unwrap();
        std::fs::write(tmp.path().join("conf/b.conf"), "b").unwrap();
        std::fs::write(tmp.path().join("conf/sub/a.conf"), "a").unwrap();

        let context = BuildContext {
            instructions: String::new(),
            files: vec![BuildFile {
                path: "etc/app".to_string(),
                source: FileSource::Host(tmp.path().join("conf")),
            }],
        };
        let files = materialize(&context).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["etc/app/b.conf", "etc/app/sub/a.conf"]);
    }

    #[test]
    fn test_missing_host_file_is_an_error() {
        let context = BuildContext {
            instructions: String::new(),
            files: vec![BuildFile {
                path: "x".to_string(),
                source: FileSource::Host("/nonexistent/infragraph/x".into()),
            }],
        };
        assert!(materialize(&context).is_err());
    }
}
