// matrix.rs
//
// Tab-separated genotype / expression / covariate tables. Every table has a
// header row of sample names and a first column of row labels.

use crate::error::{Result, ScanError};
use log::{debug, warn};
use ndarray::{s, Array2};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Genotype cells holding this value are no-calls.
pub const GENOTYPE_MISSING_SENTINEL: f64 = -1.0;

const MISSING_TOKENS: [&str; 4] = ["NA", "NaN", "nan", "-"];

/// Row-labelled matrix, rows x samples.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub row_names: Vec<String>,
    pub sample_names: Vec<String>,
    pub values: Array2<f64>,
}

impl LabeledMatrix {
    pub fn new(row_names: Vec<String>, sample_names: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != row_names.len() || values.ncols() != sample_names.len() {
            return Err(ScanError::ShapeMismatch {
                rows: values.nrows(),
                cols: values.ncols(),
                row_names: row_names.len(),
                sample_names: sample_names.len(),
            });
        }
        Ok(Self {
            row_names,
            sample_names,
            values,
        })
    }

    pub fn nrows(&self) -> usize {
        self.row_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_names.is_empty()
    }

    pub fn row_index(&self, name: &str) -> Option<usize> {
        self.row_names.iter().position(|r| r == name)
    }

    /// Rows `[start, start + len)`, clipped to the end of the matrix.
    pub fn slice_rows(&self, start: usize, len: usize) -> LabeledMatrix {
        let begin = start.min(self.nrows());
        let end = start.saturating_add(len).min(self.nrows());
        LabeledMatrix {
            row_names: self.row_names[begin..end].to_vec(),
            sample_names: self.sample_names.clone(),
            values: self.values.slice(s![begin..end, ..]).to_owned(),
        }
    }

    /// Replaces the genotype no-call sentinel with NaN.
    pub fn normalize_missing_genotypes(&mut self) {
        self.values.mapv_inplace(|v| {
            if v == GENOTYPE_MISSING_SENTINEL {
                f64::NAN
            } else {
                v
            }
        });
    }
}

/// One block of consecutive loci, genotype and expression rows side by side.
#[derive(Debug, Clone)]
pub struct LocusChunk {
    pub start: usize,
    pub genotype: LabeledMatrix,
    pub expression: LabeledMatrix,
}

impl LocusChunk {
    pub fn len(&self) -> usize {
        self.genotype.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.genotype.is_empty()
    }
}

/// Where workers get their matrices from.
///
/// Implementations must tolerate concurrent calls from several workers;
/// nothing read through this trait is cached between chunks.
pub trait MatrixSource: Sync {
    /// Sample axis shared by all three tables.
    fn sample_names(&self) -> &[String];

    /// Number of loci (genotype rows) available.
    fn locus_count(&self) -> Result<usize>;

    fn load_covariates(&self) -> Result<LabeledMatrix>;

    /// Up to `size` loci starting at row `start`. `Ok(None)` once the data is
    /// exhausted.
    fn load_chunk(&self, start: usize, size: usize) -> Result<Option<LocusChunk>>;
}

// --- TSV-backed source ---

#[derive(Debug, Clone)]
pub struct TsvMatrixSource {
    genotype_path: PathBuf,
    expression_path: PathBuf,
    covariate_path: PathBuf,
    sample_names: Vec<String>,
}

impl TsvMatrixSource {
    /// Opens the three tables and checks they share one sample axis.
    pub fn open(
        genotype_path: impl Into<PathBuf>,
        expression_path: impl Into<PathBuf>,
        covariate_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let genotype_path = genotype_path.into();
        let expression_path = expression_path.into();
        let covariate_path = covariate_path.into();

        let geno_samples = read_header(&genotype_path)?;
        let expr_samples = read_header(&expression_path)?;
        let cov_samples = read_header(&covariate_path)?;

        ensure_same_samples(&genotype_path, &geno_samples, &expression_path, &expr_samples)?;
        ensure_same_samples(&genotype_path, &geno_samples, &covariate_path, &cov_samples)?;

        debug!(
            "Opened tables with {} samples (first 5): {:?}",
            geno_samples.len(),
            geno_samples.iter().take(5).collect::<Vec<_>>()
        );

        Ok(Self {
            genotype_path,
            expression_path,
            covariate_path,
            sample_names: geno_samples,
        })
    }

    fn check_chunk_samples(&self, path: &Path, matrix: &LabeledMatrix) -> Result<()> {
        if matrix.sample_names != self.sample_names {
            return Err(ScanError::SampleMismatch {
                left: self.genotype_path.display().to_string(),
                right: path.display().to_string(),
                detail: "sample header changed since the tables were opened".into(),
            });
        }
        Ok(())
    }
}

impl MatrixSource for TsvMatrixSource {
    fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    fn locus_count(&self) -> Result<usize> {
        let geno_rows = count_data_rows(&self.genotype_path)?;
        let expr_rows = count_data_rows(&self.expression_path)?;
        if geno_rows != expr_rows {
            warn!(
                "Genotype table has {} rows but expression table has {}; loci without a partner row will be skipped.",
                geno_rows, expr_rows
            );
        }
        Ok(geno_rows)
    }

    fn load_covariates(&self) -> Result<LabeledMatrix> {
        read_table(&self.covariate_path)
    }

    fn load_chunk(&self, start: usize, size: usize) -> Result<Option<LocusChunk>> {
        let mut genotype = read_rows(&self.genotype_path, start, size)?;
        if genotype.is_empty() {
            return Ok(None);
        }
        genotype.normalize_missing_genotypes();
        let expression = read_rows(&self.expression_path, start, size)?;
        self.check_chunk_samples(&self.genotype_path, &genotype)?;
        self.check_chunk_samples(&self.expression_path, &expression)?;
        Ok(Some(LocusChunk {
            start,
            genotype,
            expression,
        }))
    }
}

// --- In-memory source ---

/// Serves matrices that are already in memory.
#[derive(Debug, Clone)]
pub struct InMemoryMatrixSource {
    genotype: LabeledMatrix,
    expression: LabeledMatrix,
    covariates: LabeledMatrix,
}

impl InMemoryMatrixSource {
    /// `genotype` may still carry the `-1` sentinel; it is normalized here.
    pub fn new(mut genotype: LabeledMatrix, expression: LabeledMatrix, covariates: LabeledMatrix) -> Result<Self> {
        ensure_same_samples(
            Path::new("genotype"),
            &genotype.sample_names,
            Path::new("expression"),
            &expression.sample_names,
        )?;
        ensure_same_samples(
            Path::new("genotype"),
            &genotype.sample_names,
            Path::new("covariates"),
            &covariates.sample_names,
        )?;
        genotype.normalize_missing_genotypes();
        Ok(Self {
            genotype,
            expression,
            covariates,
        })
    }
}

impl MatrixSource for InMemoryMatrixSource {
    fn sample_names(&self) -> &[String] {
        &self.genotype.sample_names
    }

    fn locus_count(&self) -> Result<usize> {
        Ok(self.genotype.nrows())
    }

    fn load_covariates(&self) -> Result<LabeledMatrix> {
        Ok(self.covariates.clone())
    }

    fn load_chunk(&self, start: usize, size: usize) -> Result<Option<LocusChunk>> {
        let genotype = self.genotype.slice_rows(start, size);
        if genotype.is_empty() {
            return Ok(None);
        }
        Ok(Some(LocusChunk {
            start,
            genotype,
            expression: self.expression.slice_rows(start, size),
        }))
    }
}

// --- TSV parsing ---

fn open_reader(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ScanError::io(path, e))
}

fn split_header(line: &str) -> Vec<String> {
    line.trim_end_matches(['\n', '\r'])
        .split('\t')
        .skip(1)
        .map(|s| s.trim().to_string())
        .collect()
}

fn read_header_from(reader: &mut impl BufRead, path: &Path) -> Result<Vec<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).map_err(|e| ScanError::io(path, e))?;
    if n == 0 {
        return Err(ScanError::parse(path, 1, "file is empty, expected a header row"));
    }
    let samples = split_header(&line);
    if samples.is_empty() {
        return Err(ScanError::parse(path, 1, "header row has no sample columns"));
    }
    Ok(samples)
}

/// Sample names from the header row.
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = open_reader(path)?;
    read_header_from(&mut reader, path)
}

fn parse_cell(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() || MISSING_TOKENS.contains(&token) {
        return Some(f64::NAN);
    }
    token.parse::<f64>().ok()
}

fn parse_row(path: &Path, line_no: usize, line: &str, n_samples: usize) -> Result<(String, Vec<f64>)> {
    let mut fields = line.trim_end_matches(['\n', '\r']).split('\t');
    let label = fields
        .next()
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let mut values = Vec::with_capacity(n_samples);
    for (col, token) in fields.enumerate() {
        let value = parse_cell(token).ok_or_else(|| {
            ScanError::parse(
                path,
                line_no,
                format!("cannot parse '{}' in column {} of row '{}'", token, col + 2, label),
            )
        })?;
        values.push(value);
    }
    if values.len() != n_samples {
        return Err(ScanError::parse(
            path,
            line_no,
            format!("row '{}' has {} values, header has {} samples", label, values.len(), n_samples),
        ));
    }
    Ok((label, values))
}

fn assemble(path: &Path, sample_names: Vec<String>, first_line_no: usize, lines: Vec<String>) -> Result<LabeledMatrix> {
    let n_samples = sample_names.len();
    let parsed: Vec<(String, Vec<f64>)> = lines
        .par_iter()
        .enumerate()
        .map(|(i, line)| parse_row(path, first_line_no + i, line, n_samples))
        .collect::<Result<_>>()?;

    let mut row_names = Vec::with_capacity(parsed.len());
    let mut flat = Vec::with_capacity(parsed.len() * n_samples);
    for (label, values) in parsed {
        row_names.push(label);
        flat.extend(values);
    }
    let values = Array2::from_shape_vec((row_names.len(), n_samples), flat)
        .map_err(|e| ScanError::parse(path, first_line_no, e.to_string()))?;
    LabeledMatrix::new(row_names, sample_names, values)
}

/// Reads up to `n_rows` data rows starting at data row `start` (0-based,
/// header excluded). Blank lines are ignored.
pub fn read_rows(path: &Path, start: usize, n_rows: usize) -> Result<LabeledMatrix> {
    let mut reader = open_reader(path)?;
    let sample_names = read_header_from(&mut reader, path)?;

    let mut lines = Vec::with_capacity(n_rows.min(4096));
    let mut first_line_no = 0;
    let mut data_row = 0usize;
    for (i, line) in reader.lines().enumerate() {
        if lines.len() >= n_rows {
            break;
        }
        let line = line.map_err(|e| ScanError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        if data_row >= start {
            if lines.is_empty() {
                // +2: 1-based and the header line.
                first_line_no = i + 2;
            }
            lines.push(line);
        }
        data_row += 1;
    }
    assemble(path, sample_names, first_line_no, lines)
}

/// Reads the whole table.
pub fn read_table(path: &Path) -> Result<LabeledMatrix> {
    read_rows(path, 0, usize::MAX)
}

fn count_data_rows(path: &Path) -> Result<usize> {
    let mut reader = open_reader(path)?;
    read_header_from(&mut reader, path)?;
    let mut count = 0;
    for line in reader.lines() {
        let line = line.map_err(|e| ScanError::io(path, e))?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

fn ensure_same_samples(left: &Path, left_samples: &[String], right: &Path, right_samples: &[String]) -> Result<()> {
    if left_samples.len() != right_samples.len() {
        return Err(ScanError::SampleMismatch {
            left: left.display().to_string(),
            right: right.display().to_string(),
            detail: format!("{} vs {} samples", left_samples.len(), right_samples.len()),
        });
    }
    if let Some((i, (a, b))) = left_samples
        .iter()
        .zip(right_samples)
        .enumerate()
        .find(|(_, (a, b))| a != b)
    {
        return Err(ScanError::SampleMismatch {
            left: left.display().to_string(),
            right: right.display().to_string(),
            detail: format!("column {} is '{}' vs '{}'", i + 1, a, b),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tsv(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn labels_must_match_matrix_shape() {
        let values = Array2::zeros((2, 3));
        match LabeledMatrix::new(vec!["rs1".into()], vec!["S1".into(); 3], values) {
            Err(ScanError::ShapeMismatch {
                rows,
                cols,
                row_names,
                sample_names,
            }) => assert_eq!((rows, cols, row_names, sample_names), (2, 3, 1, 3)),
            other => panic!("expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn reads_chunks_by_offset_and_reports_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let geno = write_tsv(
            dir.path(),
            "geno.txt",
            "-\tS1\tS2\nrs1\t0\t1\nrs2\t2\t-1\nrs3\t1\t1\n",
        );
        let expr = write_tsv(
            dir.path(),
            "expr.txt",
            "-\tS1\tS2\nrs1\t0.5\t1.5\nrs2\t2.5\t3.5\nrs3\t1.0\tNA\n",
        );
        let cov = write_tsv(dir.path(), "cov.txt", "-\tS1\tS2\nSEX\t1\t2\nCT1\t0.1\t0.2\n");

        let source = TsvMatrixSource::open(&geno, &expr, &cov).unwrap();
        assert_eq!(source.sample_names(), &["S1".to_string(), "S2".to_string()]);
        assert_eq!(source.locus_count().unwrap(), 3);

        let chunk = source.load_chunk(1, 2).unwrap().unwrap();
        assert_eq!(chunk.start, 1);
        assert_eq!(chunk.genotype.row_names, vec!["rs2", "rs3"]);
        assert!(chunk.genotype.values[[0, 1]].is_nan());
        assert_eq!(chunk.genotype.values[[0, 0]], 2.0);
        assert!(chunk.expression.values[[1, 1]].is_nan());

        let tail = source.load_chunk(2, 5).unwrap().unwrap();
        assert_eq!(tail.len(), 1);
        assert!(source.load_chunk(3, 5).unwrap().is_none());
    }

    #[test]
    fn open_rejects_misaligned_samples() {
        let dir = tempfile::tempdir().unwrap();
        let geno = write_tsv(dir.path(), "geno.txt", "-\tS1\tS2\nrs1\t0\t1\n");
        let expr = write_tsv(dir.path(), "expr.txt", "-\tS2\tS1\nrs1\t0.5\t1.5\n");
        let cov = write_tsv(dir.path(), "cov.txt", "-\tS1\tS2\nSEX\t1\t2\n");
        match TsvMatrixSource::open(&geno, &expr, &cov) {
            Err(ScanError::SampleMismatch { detail, .. }) => assert!(detail.contains("S1")),
            other => panic!("expected SampleMismatch, got {:?}", other),
        }
    }

    #[test]
    fn ragged_row_is_a_parse_error_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tsv(dir.path(), "bad.txt", "-\tS1\tS2\nrs1\t0\t1\nrs2\t1\n");
        match read_table(&path) {
            Err(ScanError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn slice_rows_clips_at_end() {
        let m = LabeledMatrix::new(
            vec!["a".into(), "b".into()],
            vec!["S1".into()],
            Array2::from_shape_vec((2, 1), vec![1.0, 2.0]).unwrap(),
        )
        .unwrap();
        assert_eq!(m.slice_rows(1, 10).row_names, vec!["b"]);
        assert!(m.slice_rows(5, 1).is_empty());
        assert_eq!(m.row_index("b"), Some(1));
    }
}
