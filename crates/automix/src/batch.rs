//! Parallel batch analysis
//!
//! Track paths go into a shared work queue; a fixed pool of scoped worker
//! threads pops them one at a time and sends each result back over a
//! channel. A failing track is recorded as failed and never stops the pool.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use automix_core::analysis::{AnalysisFailure, AnalysisResult};
use crossbeam::channel;

use crate::cache::AnalysisCache;

/// Workers for `jobs` tracks: one per core but one, at least one
pub fn worker_count(multithreaded: bool, jobs: usize) -> usize {
    if !multithreaded {
        return 1;
    }
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.saturating_sub(1).max(1).min(jobs.max(1))
}

/// Analyze every track in `tracks` with `workers` threads
///
/// Results come back in completion order. Tracks whose worker died are
/// reported as failed.
pub fn analyze_tracks<F>(tracks: &[PathBuf], workers: usize, analyze: F) -> Vec<(PathBuf, AnalysisResult)>
where
    F: Fn(&Path) -> Result<AnalysisResult, AnalysisFailure> + Sync,
{
    let total = tracks.len();
    if total == 0 {
        return Vec::new();
    }
    log::info!("analyze_tracks: {} tracks on {} workers", total, workers);

    let (job_tx, job_rx) = channel::bounded::<PathBuf>(total);
    let (result_tx, result_rx) = channel::unbounded();
    for track in tracks {
        // Sized to hold every job; the receiver lives until the end of this function
        let _ = job_tx.send(track.clone());
    }
    drop(job_tx);

    let done = AtomicUsize::new(0);
    let analyze = &analyze;
    let done = &done;
    let outcome = crossbeam::scope(|scope| {
        for _ in 0..workers.max(1) {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            scope.spawn(move |_| {
                for path in jobs.iter() {
                    let result = analyze_one(&path, analyze);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    log::info!(
                        "analyze_tracks: [{}/{}] {:?} {}",
                        finished,
                        total,
                        path.file_name().unwrap_or_default(),
                        if result.success { "ok" } else { "failed" }
                    );
                    if results.send((path, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);
    if outcome.is_err() {
        log::error!("analyze_tracks: an analysis worker panicked");
    }

    let mut results: Vec<(PathBuf, AnalysisResult)> = result_rx.iter().collect();
    for track in tracks {
        if !results.iter().any(|(path, _)| path == track) {
            results.push((track.clone(), AnalysisResult::failed()));
        }
    }
    results
}

fn analyze_one<F>(path: &Path, analyze: &F) -> AnalysisResult
where
    F: Fn(&Path) -> Result<AnalysisResult, AnalysisFailure>,
{
    match analyze(path) {
        Ok(result) => result,
        Err(e) => {
            log::warn!("analyze_one: {:?}: {}", path, e);
            AnalysisResult::failed()
        }
    }
}

/// Analysis results for `tracks` in their order, using the cache
///
/// Tracks missing from the cache, or all of them with `reanalyze`, are
/// analyzed and written back to the cache.
pub fn analyze_with_cache<F>(
    tracks: &[PathBuf],
    cache: &mut AnalysisCache,
    reanalyze: bool,
    workers: usize,
    analyze: F,
) -> Vec<(PathBuf, AnalysisResult)>
where
    F: Fn(&Path) -> Result<AnalysisResult, AnalysisFailure> + Sync,
{
    let missing: Vec<PathBuf> = tracks
        .iter()
        .filter(|track| reanalyze || cache.get(track).is_none())
        .cloned()
        .collect();
    log::info!(
        "analyze_with_cache: {} cached, {} to analyze",
        tracks.len() - missing.len(),
        missing.len()
    );

    for (path, result) in analyze_tracks(&missing, workers, analyze) {
        cache.insert(path, result);
    }

    tracks
        .iter()
        .map(|track| {
            let result = cache.get(track).cloned().unwrap_or_else(AnalysisResult::failed);
            (track.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ok_result(tempo: f64) -> AnalysisResult {
        AnalysisResult {
            tempo,
            first_beat_time: 0.0,
            drop_intervals: Vec::new(),
            drum_density: Vec::new(),
            loudness_db: None,
            success: true,
        }
    }

    fn fake_analyze(path: &Path) -> Result<AnalysisResult, AnalysisFailure> {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        match name.parse::<f64>() {
            Ok(tempo) => Ok(ok_result(tempo)),
            Err(_) => Err(AnalysisFailure::NoBeats),
        }
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(false, 50), 1);
        assert!(worker_count(true, 50) >= 1);
        assert_eq!(worker_count(true, 1), 1);
    }

    #[test]
    fn test_every_track_gets_a_result() {
        let tracks: Vec<PathBuf> = ["120.wav", "bad.wav", "174.flac", "87.5.mp3"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let mut results = analyze_tracks(&tracks, 3, fake_analyze);
        assert_eq!(results.len(), 4);

        results.sort_by(|a, b| a.0.cmp(&b.0));
        let tempos: Vec<(bool, f64)> = results.iter().map(|(_, r)| (r.success, r.tempo)).collect();
        assert_eq!(tempos, [(true, 120.0), (true, 174.0), (true, 87.5), (false, 0.0)]);
    }

    #[test]
    fn test_cache_skips_known_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = AnalysisCache::load(&dir.path().join("analysis.json"));
        cache.insert(PathBuf::from("120.wav"), ok_result(999.0));

        let tracks = vec![PathBuf::from("120.wav"), PathBuf::from("140.wav")];
        let seen = Mutex::new(Vec::new());
        let counting = |path: &Path| {
            seen.lock().unwrap().push(path.to_path_buf());
            fake_analyze(path)
        };

        let results = analyze_with_cache(&tracks, &mut cache, false, 2, &counting);
        assert_eq!(results[0].1.tempo, 999.0);
        assert_eq!(results[1].1.tempo, 140.0);
        assert_eq!(*seen.lock().unwrap(), vec![PathBuf::from("140.wav")]);
        assert_eq!(cache.len(), 2);

        let results = analyze_with_cache(&tracks, &mut cache, true, 2, &counting);
        assert_eq!(results[0].1.tempo, 120.0);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
