// output.rs

use crate::coordinator::ScanResults;
use crate::error::{Result, ScanError};
use crate::queue::ResultRow;
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

fn create_output_file(prefix: &str, suffix: &str) -> Result<(PathBuf, BufWriter<File>)> {
    let path = PathBuf::from(format!("{}.{}", prefix, suffix));
    let file = File::create(&path).map_err(|e| ScanError::io(&path, e))?;
    Ok((path, BufWriter::new(file)))
}

fn format_z_score(z: f64) -> String {
    if z.is_nan() {
        "NaN".to_string()
    } else {
        format!("{:.6}", z)
    }
}

/// Writes one z-score table: `locus_index`, `locus_id`, one column per
/// covariate.
pub fn write_table<W: Write>(writer: &mut W, covariates: &[String], rows: &[ResultRow]) -> std::io::Result<()> {
    write!(writer, "locus_index\tlocus_id")?;
    for cov in covariates {
        write!(writer, "\t{}", cov)?;
    }
    writeln!(writer)?;

    for row in rows {
        write!(writer, "{}\t{}", row.locus_index, row.locus_id)?;
        for &z in &row.z_scores {
            write!(writer, "\t{}", format_z_score(z))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Writes `<prefix>.default.tsv` and, when permutations ran,
/// `<prefix>.adjusted.tsv`. Returns the paths written.
pub fn write_results(prefix: &str, results: &ScanResults) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let tables = [
        ("default.tsv", &results.default_rows, true),
        ("adjusted.tsv", &results.adjusted_rows, !results.adjusted_rows.is_empty()),
    ];
    for (suffix, rows, wanted) in tables {
        if !wanted {
            continue;
        }
        let (path, mut writer) = create_output_file(prefix, suffix)?;
        info!("Writing {} rows to {}", rows.len(), path.display());
        write_table(&mut writer, &results.covariates, rows)
            .and_then(|_| writer.flush())
            .map_err(|e| ScanError::io(&path, e))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_layout_and_nan_rendering() {
        let rows = vec![ResultRow {
            locus_index: 7,
            locus_id: "rs7".into(),
            z_scores: vec![1.5, f64::NAN],
        }];
        let mut buf = Vec::new();
        write_table(&mut buf, &["CT1".to_string(), "CT2".to_string()], &rows).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "locus_index\tlocus_id\tCT1\tCT2\n7\trs7\t1.500000\tNaN\n");
    }
}
