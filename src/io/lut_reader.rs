use crate::core::lut::{LutMetadata, LutTable, NUM_BACKSCATTER_COLUMNS};
use crate::io::properties::PropertyMap;
use crate::types::{RetrievalError, RetrievalResult};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Extension of the LUT header file sitting next to every LUT body
pub const LUT_HEADER_EXTENSION: &str = "luthdr";

/// On-disk encoding of a LUT body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LutEncoding {
    /// Single-band raster matrix (any GDAL-readable format)
    Raster,
    /// Row-oriented delimited text
    Delimited,
}

impl LutEncoding {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("txt") => {
                LutEncoding::Delimited
            }
            _ => LutEncoding::Raster,
        }
    }
}

/// Reader for soil-moisture LUTs (`<name>.luthdr` + `<name>.<body>`)
pub struct LutReader {
    body_path: PathBuf,
    num_params: usize,
}

impl LutReader {
    /// `num_params` is the number of parameter columns preceding the two backscatter columns
    pub fn new<P: AsRef<Path>>(body_path: P, num_params: usize) -> Self {
        Self {
            body_path: body_path.as_ref().to_path_buf(),
            num_params,
        }
    }

    pub fn header_path(&self) -> PathBuf {
        self.body_path.with_extension(LUT_HEADER_EXTENSION)
    }

    pub fn read_metadata(&self) -> RetrievalResult<LutMetadata> {
        let header = self.header_path();
        if !header.exists() {
            return Err(RetrievalError::lut_format(
                header.display().to_string(),
                "LUT header file not found",
            ));
        }
        let props = PropertyMap::load(&header)?;
        LutMetadata::from_properties(&props)
    }

    /// Read header and body
    pub fn read(&self) -> RetrievalResult<LutTable> {
        if !self.body_path.exists() {
            return Err(RetrievalError::lut_format(
                self.source(),
                "LUT body file not found",
            ));
        }

        let metadata = self.read_metadata()?;
        log::info!(
            "Reading LUT {} ({} rows per angle, angles {}..={})",
            self.source(),
            metadata.rows_per_section,
            metadata.start_angle,
            metadata.end_angle
        );

        match LutEncoding::from_path(&self.body_path) {
            LutEncoding::Delimited => self.read_delimited(metadata),
            LutEncoding::Raster => self.read_raster(metadata),
        }
    }

    fn source(&self) -> String {
        self.body_path.display().to_string()
    }

    /// Delimited text body.
    ///
    /// The first `rows_per_section` records fill both the parameter block and the
    /// backscatter block; the remaining records only fill backscatter, since parameters
    /// repeat identically in every angle section.
    fn read_delimited(&self, metadata: LutMetadata) -> RetrievalResult<LutTable> {
        let source = self.source();
        let width = self.num_params + NUM_BACKSCATTER_COLUMNS;
        let rows_per_section = metadata.rows_per_section;
        let total_rows = metadata.total_rows();

        let file = File::open(&self.body_path)
            .map_err(|e| RetrievalError::lut_format(source.as_str(), format!("cannot open: {}", e)))?;
        let mut records = BufReader::new(file)
            .lines()
            .enumerate()
            .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()));

        let mut params = Array2::<f64>::zeros((rows_per_section, self.num_params));
        let mut backscatter = Array2::<f64>::zeros((total_rows, NUM_BACKSCATTER_COLUMNS));

        // Pass 1: parameters and backscatter of the first angle section
        for row in 0..rows_per_section {
            let values = next_record(&mut records, row, width, total_rows, &source)?;
            for col in 0..self.num_params {
                params[[row, col]] = values[col];
            }
            backscatter[[row, 0]] = values[self.num_params];
            backscatter[[row, 1]] = values[self.num_params + 1];
        }

        // Pass 2: backscatter of the remaining sections
        for row in rows_per_section..total_rows {
            let values = next_record(&mut records, row, width, total_rows, &source)?;
            backscatter[[row, 0]] = values[self.num_params];
            backscatter[[row, 1]] = values[self.num_params + 1];
        }

        if let Some((line_no, _)) = records.next() {
            return Err(RetrievalError::lut_format(
                source,
                format!(
                    "LUT has wrong height: extra record at line {}; expecting {} rows",
                    line_no + 1,
                    total_rows
                ),
            ));
        }

        LutTable::from_delimited_parts(metadata, params, backscatter, &source)
    }

    #[cfg(feature = "gdal")]
    fn read_raster(&self, metadata: LutMetadata) -> RetrievalResult<LutTable> {
        let dataset = gdal::Dataset::open(&self.body_path)?;
        let (width, height) = dataset.raster_size();
        log::debug!("LUT raster {}: {} x {}", self.source(), width, height);

        if dataset.raster_count() < 1 {
            return Err(RetrievalError::lut_format(self.source(), "raster has no bands"));
        }

        let band = dataset.rasterband(1)?;
        let buffer = band.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
        let (_, data) = buffer.into_shape_and_vec();

        let matrix = Array2::from_shape_vec((height, width), data)
            .map_err(|e| RetrievalError::Processing(format!("Failed to reshape LUT raster: {}", e)))?;

        LutTable::from_raster_matrix(metadata, self.num_params, matrix, &self.source())
    }

    #[cfg(not(feature = "gdal"))]
    fn read_raster(&self, _metadata: LutMetadata) -> RetrievalResult<LutTable> {
        Err(RetrievalError::lut_format(
            self.source(),
            "raster-encoded LUTs require the `gdal` feature",
        ))
    }
}

fn next_record<I>(
    records: &mut I,
    row: usize,
    width: usize,
    total_rows: usize,
    source: &str,
) -> RetrievalResult<Vec<f64>>
where
    I: Iterator<Item = (usize, std::io::Result<String>)>,
{
    let (line_no, line) = records.next().ok_or_else(|| {
        RetrievalError::lut_format(
            source,
            format!("LUT has wrong height = {}; expecting it to be {}", row, total_rows),
        )
    })?;
    let line = line.map_err(|e| {
        RetrievalError::lut_format(source, format!("line {}: {}", line_no + 1, e))
    })?;
    parse_record(&line, width).map_err(|message| {
        RetrievalError::lut_format(source, format!("line {}: {}", line_no + 1, message))
    })
}

/// Parse one delimited record
///
/// Comma or semicolon separated when either appears in the line, whitespace separated
/// otherwise. Empty fields between delimiters are rejected.
pub fn parse_record(line: &str, width: usize) -> Result<Vec<f64>, String> {
    let fields: Vec<&str> = if line.contains(|c: char| c == ',' || c == ';') {
        line.split(|c: char| c == ',' || c == ';').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    };

    if let Some(pos) = fields.iter().position(|f| f.is_empty()) {
        return Err(format!("empty field {} (zero-based)", pos));
    }

    if fields.len() != width {
        return Err(format!(
            "LUT has wrong width = {}; expecting {}",
            fields.len(),
            width
        ));
    }

    fields
        .iter()
        .map(|f| {
            f.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("cannot parse '{}' as a number", f))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lut(dir: &Path, body: &str, header: &str) -> PathBuf {
        let body_path = dir.join("iem_lut.csv");
        let mut f = File::create(&body_path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        let mut h = File::create(dir.join("iem_lut.luthdr")).unwrap();
        h.write_all(header.as_bytes()).unwrap();
        body_path
    }

    const HEADER: &str = "Number_of_rows_per_angle = 2\nStart_angle = 20\nStop_angle = 21\n";

    #[test]
    fn test_parse_record_delimiters() {
        assert_eq!(parse_record("1, 2;3; 4", 4).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(parse_record("1 2\t3   4", 4).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(parse_record("1,2,3", 4).is_err());
        assert!(parse_record("1,,2,3,4", 4).is_err());
        assert!(parse_record("1,2,3,4,", 4).is_err());
        assert!(parse_record("1,2,x,4", 4).is_err());
    }

    #[test]
    fn test_two_pass_delimited_read() {
        let dir = tempfile::tempdir().unwrap();
        let body = "0.5,5,-15,-16\n1.0,10,-12,-13\n\n0.5,5,-16,-17\n1.0,10,-13,-14\n";
        let path = write_lut(dir.path(), body, HEADER);

        let lut = LutReader::new(&path, 2).read().unwrap();
        assert_eq!(lut.num_sections(), 2);
        assert_eq!(lut.param(1, 1), 10.0);
        assert_eq!(lut.backscatter(1, 0, 1), -17.0);
        assert_eq!(lut.backscatter(0, 1, 0), -12.0);
    }

    #[test]
    fn test_extra_and_missing_rows_fail() {
        let dir = tempfile::tempdir().unwrap();
        let extra = "0.5,5,-15,-16\n1.0,10,-12,-13\n0.5,5,-16,-17\n1.0,10,-13,-14\n1,1,1,1\n";
        let path = write_lut(dir.path(), extra, HEADER);
        assert!(matches!(
            LutReader::new(&path, 2).read(),
            Err(RetrievalError::LutFormat { .. })
        ));

        let short = "0.5,5,-15,-16\n1.0,10,-12,-13\n";
        let path = write_lut(dir.path(), short, HEADER);
        assert!(matches!(
            LutReader::new(&path, 2).read(),
            Err(RetrievalError::LutFormat { .. })
        ));
    }

    #[test]
    fn test_missing_header_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lonely.csv");
        std::fs::write(&path, "1,2,3,4\n").unwrap();
        assert!(matches!(
            LutReader::new(&path, 2).read(),
            Err(RetrievalError::LutFormat { .. })
        ));
    }

    #[test]
    fn test_encoding_from_extension() {
        assert_eq!(LutEncoding::from_path(Path::new("a.CSV")), LutEncoding::Delimited);
        assert_eq!(LutEncoding::from_path(Path::new("a.tif")), LutEncoding::Raster);
        assert_eq!(LutEncoding::from_path(Path::new("a")), LutEncoding::Raster);
    }
}
