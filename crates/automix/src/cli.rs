//! Command line
//!
//! Every option except the two paths overrides the matching value of
//! `$AUTOMIX_HOME/config.yaml`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "automix", version, about = "Generates a continuous DJ mix from a folder of tracks")]
pub struct Cli {
    /// Folder containing the tracks to mix
    pub input_dir: PathBuf,

    /// Output file (.wav or .flac)
    pub output: PathBuf,

    /// Output tempo in BPM
    #[arg(short, long)]
    pub tempo: Option<f64>,

    /// Expected tempo of the input tracks in BPM
    #[arg(long)]
    pub tempo_hint: Option<f64>,

    /// Chance of a double drop per transition, in percent
    #[arg(long)]
    pub double_drop: Option<f64>,

    /// Share of tracks brought in through a breakdown, in percent
    #[arg(long)]
    pub breakdown: Option<f64>,

    /// Random seed for track order and transition choice
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Maximum number of tracks in the mix
    #[arg(short = 'n', long)]
    pub max_tracks: Option<usize>,

    /// Analyze tracks one at a time
    #[arg(long)]
    pub single_threaded: bool,

    /// Ignore cached analysis results
    #[arg(long)]
    pub reanalyze: bool,

    /// Config file to use instead of $AUTOMIX_HOME/config.yaml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides() {
        let cli = Cli::try_parse_from([
            "automix", "tracks", "mix.flac", "--tempo", "174", "--seed", "9", "-n", "12",
            "--single-threaded",
        ])
        .unwrap();
        assert_eq!(cli.input_dir, PathBuf::from("tracks"));
        assert_eq!(cli.output, PathBuf::from("mix.flac"));
        assert_eq!(cli.tempo, Some(174.0));
        assert_eq!(cli.seed, Some(9));
        assert_eq!(cli.max_tracks, Some(12));
        assert!(cli.single_threaded);
        assert!(!cli.reanalyze);
        assert_eq!(cli.double_drop, None);
    }

    #[test]
    fn test_paths_are_required() {
        assert!(Cli::try_parse_from(["automix", "tracks"]).is_err());
    }
}
