//! Workspace file management: storing uploads, zip expansion, and pip
//! requirement resolution.

use std::{
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

use bytes::Bytes;

use crate::{models::DaemonID, JinadResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const REQUIREMENTS_FILENAME: &str = "requirements.txt";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A file received through the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// The client-supplied file name.
    pub filename: String,

    /// Raw file contents.
    pub content: Bytes,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The on-disk directory of a workspace.
pub fn workspace_path(root: &Path, workspace_id: &DaemonID) -> PathBuf {
    root.join(workspace_id.to_string())
}

/// Stores uploaded files under the workspace directory.
///
/// The directory is created if needed. Zip archives are expanded in place and
/// not kept; an uploaded `requirements.txt` is merged with an existing one;
/// any other name collision overwrites with a warning. Per-file atomicity is
/// not promised; callers recover by re-uploading.
pub fn store_files(workdir: &Path, files: &[UploadedFile]) -> JinadResult<()> {
    std::fs::create_dir_all(workdir)?;

    if files.is_empty() {
        tracing::warn!("couldn't find any files to upload!");
        return Ok(());
    }

    for file in files {
        if file.filename.ends_with(".zip") {
            extract_zip(workdir, file)?;
            continue;
        }

        let dest = workdir.join(&file.filename);
        if dest.is_file() {
            if file.filename == REQUIREMENTS_FILENAME {
                merge_requirements(&dest, &file.content)?;
                continue;
            }
            tracing::warn!(
                "file {} already exists in workspace, will be replaced",
                file.filename
            );
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &file.content)?;
        tracing::debug!("saved upload to {}", dest.display());
    }

    Ok(())
}

/// Pip packages mentioned across every `*requirements*.txt` in the workspace,
/// whitespace-joined. Empty when none exist.
pub fn requirements(workdir: &Path) -> String {
    let mut matches: Vec<PathBuf> = walkdir::WalkDir::new(workdir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.file_type().is_file()
                && name.contains("requirements")
                && name.ends_with(".txt")
        })
        .map(|entry| entry.into_path())
        .collect();
    matches.sort();

    if matches.is_empty() {
        tracing::warn!(
            "please add a requirements.txt file to manage python dependencies in the workspace"
        );
        return String::new();
    }

    matches
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .flat_map(|contents| {
            contents
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Expands a zip upload into the workspace; the archive itself is not kept.
fn extract_zip(workdir: &Path, file: &UploadedFile) -> JinadResult<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(file.content.as_ref()))
        .map_err(crate::JinadError::custom)?;

    tracing::info!(
        "extracting archive {} ({} entries) into {}",
        file.filename,
        archive.len(),
        workdir.display()
    );

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(crate::JinadError::custom)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };
        let dest = workdir.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        std::fs::write(&dest, contents)?;
    }

    Ok(())
}

/// Merges a newly uploaded `requirements.txt` into an existing one: packages
/// keep one entry each, with the new upload winning on conflicts.
fn merge_requirements(dest: &Path, uploaded: &Bytes) -> JinadResult<()> {
    let existing = std::fs::read_to_string(dest)?;
    let uploaded = String::from_utf8_lossy(uploaded);

    let mut merged: Vec<(String, String)> = Vec::new();
    for line in existing.lines().chain(uploaded.lines()) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let name = requirement_name(line);
        if let Some(slot) = merged.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = line.to_string();
        } else {
            merged.push((name, line.to_string()));
        }
    }

    let contents = merged
        .into_iter()
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(dest, contents)?;
    Ok(())
}

/// The package-name part of a requirement line.
fn requirement_name(line: &str) -> String {
    line.split(['=', '<', '>', '~', '!', '['])
        .next()
        .unwrap_or(line)
        .trim()
        .to_string()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn upload(name: &str, contents: &str) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            content: Bytes::from(contents.to_string()),
        }
    }

    #[test]
    fn test_store_and_overwrite() {
        let dir = tempdir().unwrap();
        store_files(dir.path(), &[upload("flow.yml", "jtype: Flow\n")]).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("flow.yml")).unwrap(),
            "jtype: Flow\n"
        );

        store_files(dir.path(), &[upload("flow.yml", "jtype: Flow2\n")]).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("flow.yml")).unwrap(),
            "jtype: Flow2\n"
        );
    }

    #[test]
    fn test_requirements_are_merged_not_replaced() {
        let dir = tempdir().unwrap();
        store_files(
            dir.path(),
            &[upload("requirements.txt", "numpy==1.22\nscipy==1.8\n")],
        )
        .unwrap();
        store_files(
            dir.path(),
            &[upload("requirements.txt", "numpy==1.23\ntorch==2.0\n")],
        )
        .unwrap();

        let merged = std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
        let lines: Vec<_> = merged.lines().collect();
        assert_eq!(lines, vec!["numpy==1.23", "scipy==1.8", "torch==2.0"]);
    }

    #[test]
    fn test_zip_upload_is_expanded_in_place() {
        let dir = tempdir().unwrap();

        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("flow.yml", options).unwrap();
            writer.write_all(b"jtype: Flow\n").unwrap();
            writer.start_file("nested/config.yml", options).unwrap();
            writer.write_all(b"a: 1\n").unwrap();
            writer.finish().unwrap();
        }

        store_files(
            dir.path(),
            &[UploadedFile {
                filename: "bundle.zip".to_string(),
                content: Bytes::from(buf),
            }],
        )
        .unwrap();

        assert!(dir.path().join("flow.yml").is_file());
        assert!(dir.path().join("nested/config.yml").is_file());
        assert!(!dir.path().join("bundle.zip").exists());
    }

    #[test]
    fn test_requirements_concatenation() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "numpy==1.23\nscipy\n").unwrap();
        std::fs::write(dir.path().join("extra-requirements.txt"), "torch\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not requirements\n").unwrap();

        let reqs = requirements(dir.path());
        assert_eq!(reqs, "torch numpy==1.23 scipy");
    }

    #[test]
    fn test_requirements_empty_when_none() {
        let dir = tempdir().unwrap();
        assert_eq!(requirements(dir.path()), "");
    }
}
