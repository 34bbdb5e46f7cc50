//! Narrowing a configured local source down to one clip.

use std::path::{Path, PathBuf};

use rand::{Rng, seq::SliceRandom};
use walkdir::WalkDir;

use crate::error::PrerollError;

/// Lists the candidates for `source`: the immediate files of a directory
/// (sorted, so a seeded RNG picks reproducibly) or the path itself.
pub fn candidates(source: &Path) -> Result<Vec<PathBuf>, PrerollError> {
    if source.is_dir() {
        let files: Vec<PathBuf> = WalkDir::new(source)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        if files.is_empty() {
            return Err(PrerollError::NoCandidates(source.to_path_buf()));
        }
        return Ok(files);
    }

    if source.exists() {
        Ok(vec![source.to_path_buf()])
    } else {
        Err(PrerollError::NoCandidates(source.to_path_buf()))
    }
}

/// Picks one file from `source` uniformly at random.
pub fn resolve_local<R: Rng + ?Sized>(source: &Path, rng: &mut R) -> Result<PathBuf, PrerollError> {
    let options = candidates(source)?;
    options
        .choose(rng)
        .cloned()
        .ok_or_else(|| PrerollError::NoCandidates(source.to_path_buf()))
}
