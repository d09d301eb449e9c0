//! Library placement.
//!
//! Finished titles move into the canonical library layout:
//! `Title (Year)/Title (Year).mkv`, extras under an `extras/` subfolder,
//! cover art beside the feature. Moves are all-or-nothing per title: the
//! file is written to a hidden temp name on the destination filesystem and
//! only then renamed, so the library never sees a partial file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for finalization.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Destination path had no parent directory or no file name.
    #[error("invalid destination path: {0}")]
    InvalidDestination(PathBuf),
}

/// Strips filesystem-hostile characters from a display title.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Canonical "Title (Year)" label; just the title when the year is unknown.
pub fn library_label(title: &str, year: Option<u16>) -> String {
    let clean = sanitize_filename(title);
    match year {
        Some(year) => format!("{} ({})", clean, year),
        None => clean,
    }
}

/// Directory for one movie under the library root.
pub fn movie_dir(output_root: &Path, title: &str, year: Option<u16>) -> PathBuf {
    output_root.join(library_label(title, year))
}

/// Destination path for the main feature.
pub fn main_feature_dest(movie_dir: &Path, title: &str, year: Option<u16>) -> PathBuf {
    movie_dir.join(format!("{}.mkv", library_label(title, year)))
}

/// Destination path for an extra, under the extras subfolder.
pub fn extra_dest(movie_dir: &Path, extra_name: &str, title_index: u32) -> PathBuf {
    let clean = sanitize_filename(extra_name);
    let stem = if clean.is_empty() {
        format!("Extra {:02}", title_index)
    } else {
        clean
    };
    movie_dir.join("extras").join(format!("{}.mkv", stem))
}

/// Moves a finished file into the library without ever exposing a partial
/// destination. The temp name lives in the destination directory so the
/// final step is a same-filesystem rename.
pub fn atomic_move(src: &Path, dest: &Path) -> Result<(), FinalizeError> {
    let parent = dest
        .parent()
        .ok_or_else(|| FinalizeError::InvalidDestination(dest.to_path_buf()))?;
    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FinalizeError::InvalidDestination(dest.to_path_buf()))?;

    fs::create_dir_all(parent)?;
    let temp = parent.join(format!(".{}.part", file_name));

    // Fast path: same filesystem. Otherwise copy across and delete the
    // source once the copy is complete.
    if fs::rename(src, &temp).is_err() {
        fs::copy(src, &temp)?;
        fs::remove_file(src)?;
    }

    fs::rename(&temp, dest)?;
    Ok(())
}

/// Writes fetched cover art beside the feature under its canonical name.
pub fn place_cover_art(movie_dir: &Path, bytes: &[u8]) -> Result<PathBuf, FinalizeError> {
    fs::create_dir_all(movie_dir)?;
    let dest = movie_dir.join("poster.jpg");
    let temp = movie_dir.join(".poster.jpg.part");
    fs::write(&temp, bytes)?;
    fs::rename(&temp, &dest)?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Movie: The Sequel?"), "Movie The Sequel");
        assert_eq!(sanitize_filename("  A/B\\C  "), "ABC");
        assert_eq!(sanitize_filename("Plain Name"), "Plain Name");
    }

    #[test]
    fn test_library_label_with_and_without_year() {
        assert_eq!(library_label("Dark City", Some(1998)), "Dark City (1998)");
        assert_eq!(library_label("Dark City", None), "Dark City");
        assert_eq!(
            library_label("Movie: Uncut", Some(2001)),
            "Movie Uncut (2001)"
        );
    }

    #[test]
    fn test_canonical_layout_paths() {
        let root = Path::new("/library");
        let dir = movie_dir(root, "Dark City", Some(1998));
        assert_eq!(dir, Path::new("/library/Dark City (1998)"));
        assert_eq!(
            main_feature_dest(&dir, "Dark City", Some(1998)),
            Path::new("/library/Dark City (1998)/Dark City (1998).mkv")
        );
        assert_eq!(
            extra_dest(&dir, "Deleted Scenes", 4),
            Path::new("/library/Dark City (1998)/extras/Deleted Scenes.mkv")
        );
        assert_eq!(
            extra_dest(&dir, "", 4),
            Path::new("/library/Dark City (1998)/extras/Extra 04.mkv")
        );
    }

    #[test]
    fn test_atomic_move_creates_parents_and_moves() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("work/title.mkv");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, b"encoded movie").unwrap();

        let dest = tmp.path().join("library/Dark City (1998)/Dark City (1998).mkv");
        atomic_move(&src, &dest).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"encoded movie");
    }

    #[test]
    fn test_atomic_move_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("title.mkv");
        fs::write(&src, b"data").unwrap();

        let dest_dir = tmp.path().join("out");
        let dest = dest_dir.join("title.mkv");
        atomic_move(&src, &dest).unwrap();

        let leftovers: Vec<_> = fs::read_dir(&dest_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
        assert!(dest.exists());
    }

    #[test]
    fn test_atomic_move_overwrites_existing_destination() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("new.mkv");
        fs::write(&src, b"new encode").unwrap();
        let dest = tmp.path().join("final.mkv");
        fs::write(&dest, b"old encode").unwrap();

        atomic_move(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new encode");
    }

    #[test]
    fn test_place_cover_art() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("Dark City (1998)");

        let dest = place_cover_art(&dir, b"jpeg bytes").unwrap();
        assert_eq!(dest, dir.join("poster.jpg"));
        assert_eq!(fs::read(dest).unwrap(), b"jpeg bytes");
        assert!(!dir.join(".poster.jpg.part").exists());
    }
}
