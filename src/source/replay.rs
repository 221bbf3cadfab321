//! Replay of recorded sample streams.
//!
//! Recordings are JSON Lines files with one [`SensorSample`] per line.
//! Blank lines and lines starting with `#` are skipped.

use crate::source::types::SensorSample;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Errors raised while reading or writing recordings.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Load every sample from a JSON Lines recording.
pub fn load_samples(path: &Path) -> Result<Vec<SensorSample>, SourceError> {
    let reader = BufReader::new(File::open(path)?);
    let mut samples = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let sample = serde_json::from_str(trimmed).map_err(|source| SourceError::Parse {
            line: index + 1,
            source,
        })?;
        samples.push(sample);
    }

    Ok(samples)
}

/// Write samples as a JSON Lines recording.
pub fn save_samples(path: &Path, samples: &[SensorSample]) -> Result<(), SourceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for sample in samples {
        let line = serde_json::to_string(sample).map_err(std::io::Error::other)?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::simulated::Scenario;
    use chrono::Utc;

    #[test]
    fn test_recording_survives_save_and_load() {
        let path = std::env::temp_dir().join(format!("fall-guard-replay-{}.jsonl", uuid::Uuid::new_v4()));
        let samples = Scenario::Stumble.builder().build(50.0, Utc::now());

        save_samples(&path, &samples).unwrap();
        let loaded = load_samples(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.len(), samples.len());
        assert_eq!(loaded[10].timestamp, samples[10].timestamp);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let path = std::env::temp_dir().join(format!("fall-guard-bad-{}.jsonl", uuid::Uuid::new_v4()));
        std::fs::write(&path, "# header\n\n{not json}\n").unwrap();
        let err = load_samples(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);

        match err {
            SourceError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }
}
