//! Merges the records of several Feature Extraction files into one [`Dataset`].
//!
//! Each file is extracted independently, so extraction may run across threads;
//! the batches are always rejoined in input order before being folded into the
//! final dataset.

use crate::extract::{ExtractError, extract_file};
use crate::panel::SpikeInPanel;
use crate::types::{Dataset, FeatureRecord};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// File suffixes removed before a filename is shortened into a label.
const STRIPPED_SUFFIXES: [&str; 4] = [".gz", ".txt", ".tsv", ".csv"];

/// Extracts every file and concatenates the results in input order.
///
/// Any file that fails to parse fails the whole aggregation.
pub fn aggregate(
    paths: &[PathBuf],
    panel: &SpikeInPanel,
    parallel: bool,
) -> Result<Dataset, ExtractError> {
    let batches: Vec<Vec<FeatureRecord>> = if parallel {
        paths
            .par_iter()
            .map(|path| labelled_batch(path, panel))
            .collect::<Result<_, _>>()?
    } else {
        paths
            .iter()
            .map(|path| labelled_batch(path, panel))
            .collect::<Result<_, _>>()?
    };

    let dataset = Dataset::from_batches(batches);
    log::info!(
        "Aggregated {} spike-in rows from {} FE file(s)",
        dataset.len(),
        paths.len()
    );
    Ok(dataset)
}

fn labelled_batch(path: &Path, panel: &SpikeInPanel) -> Result<Vec<FeatureRecord>, ExtractError> {
    let label = pretty_label(&path.to_string_lossy());
    let records = extract_file(path, panel)?
        .into_iter()
        .map(|record| FeatureRecord {
            source: label.clone(),
            ..record
        })
        .collect();
    Ok(records)
}

/// Shortens an FE file path into a readable sample label.
///
/// The directory and any `.gz`/`.txt`/`.tsv`/`.csv` suffixes are removed, then the
/// name keeps its first underscore-delimited field and its last three, e.g.
/// `258503010103_S01_Guys121919_CGH_1100_Jul11_2_1_3.txt` becomes
/// `258503010103_2_1_3`. Names with fewer than four fields are returned without
/// their suffix. Applying the function to its own output returns it unchanged.
pub fn pretty_label(path: &str) -> String {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem = strip_known_suffixes(base);

    let fields: Vec<&str> = stem.split('_').collect();
    if fields.len() < 4 {
        return stem.to_string();
    }
    format!("{}_{}", fields[0], fields[fields.len() - 3..].join("_"))
}

fn strip_known_suffixes(name: &str) -> &str {
    let mut stem = name;
    loop {
        let stripped = STRIPPED_SUFFIXES.iter().find_map(|suffix| {
            let cut = stem.len().checked_sub(suffix.len())?;
            let tail = stem.get(cut..)?;
            (cut > 0 && tail.eq_ignore_ascii_case(suffix)).then(|| &stem[..cut])
        });
        match stripped {
            Some(shorter) => stem = shorter,
            None => return stem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortens_scanner_filename() {
        assert_eq!(
            pretty_label("258503010103_S01_Guys121919_CGH_1100_Jul11_2_1_3.txt"),
            "258503010103_2_1_3"
        );
    }

    #[test]
    fn drops_directories_and_compression_suffix() {
        assert_eq!(
            pretty_label("/runs/slide/258503010103_S01_Guys121919_CGH_1100_Jul11_2_2_4.txt.gz"),
            "258503010103_2_2_4"
        );
    }

    #[test]
    fn short_names_keep_their_stem() {
        assert_eq!(pretty_label("sample_a.txt"), "sample_a");
    }

    #[test]
    fn labelling_is_idempotent() {
        let inputs = [
            "258503010103_S01_Guys121919_CGH_1100_Jul11_2_1_3.txt",
            "dir/run.1_S01_x_2_1_3.TXT",
            "a_b_c_d.e.txt",
            "a_b.txt.txt",
            "_x_y_z.csv",
            "plain",
        ];
        for input in inputs {
            let once = pretty_label(input);
            assert_eq!(pretty_label(&once), once, "label of '{input}' changed on reapplication");
        }
    }
}
