//! Track discovery

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Extensions the decoder is expected to handle
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "wav", "ogg"];

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Pick up to `max_tracks` tracks from `dir` in a seeded random order
///
/// Only the top level of `dir` is scanned.
pub fn discover_tracks(dir: &Path, seed: u64, max_tracks: usize) -> Result<Vec<PathBuf>> {
    let mut tracks: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory: {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_audio_file(path))
        // Cache keys are absolute paths
        .map(|path| path.canonicalize().unwrap_or(path))
        .collect();
    let found = tracks.len();

    // Sorted first so the shuffle only depends on the seed
    tracks.sort();
    tracks.shuffle(&mut StdRng::seed_from_u64(seed));
    tracks.truncate(max_tracks);

    log::info!(
        "discover_tracks: {} audio files in {:?}, using {}",
        found,
        dir,
        tracks.len()
    );
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_only_audio_files() {
        let dir = folder(&["a.mp3", "b.FLAC", "c.txt", "d.wav", "cover.jpg", "e.ogg", "f.m4a"]);
        std::fs::create_dir(dir.path().join("sub.wav")).unwrap();
        let mut tracks = discover_tracks(dir.path(), 1, 100).unwrap();
        tracks.sort();
        let names: Vec<String> = tracks
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.mp3", "b.FLAC", "d.wav", "e.ogg", "f.m4a"]);
    }

    #[test]
    fn test_seeded_order_and_limit() {
        let names: Vec<String> = (0..20).map(|i| format!("{:02}.wav", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = folder(&refs);

        let first = discover_tracks(dir.path(), 5, 8).unwrap();
        let second = discover_tracks(dir.path(), 5, 8).unwrap();
        assert_eq!(first.len(), 8);
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_directory_fails() {
        assert!(discover_tracks(Path::new("/nonexistent/tracks"), 1, 10).is_err());
    }
}
