use loam::core::{LutMetadata, LutTable};
use loam::io::{default_lut_folder, LutReader, PropertyMap};
use loam::types::{Polarization, RetrievalError};
use ndarray::Array2;
use std::fs;
use std::path::Path;

const HEADER: &str = "\
# soil moisture LUT header
Number_of_rows_per_angle = 4
Start_angle = 18
Stop_angle = 20
";

fn synthetic_matrix() -> Array2<f64> {
    Array2::from_shape_fn((12, 5), |(r, c)| {
        let (section, row) = ((r / 4) as f64, (r % 4) as f64);
        match c {
            0 => 0.3 + row * 0.4,
            1 => 4.0 + row,
            2 => 5.0 + row * 6.5,
            3 => -19.5 + row * 1.25 + section * 0.75,
            _ => -21.0 + row * 1.5 + section * 0.5,
        }
    })
}

fn write_csv(dir: &Path, name: &str, matrix: &Array2<f64>) -> std::path::PathBuf {
    let body: String = matrix
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
                + "\n"
        })
        .collect();
    let path = dir.join(format!("{}.csv", name));
    fs::write(&path, body).expect("Failed to write LUT body");
    fs::write(dir.join(format!("{}.luthdr", name)), HEADER).expect("Failed to write LUT header");
    path
}

#[test]
fn test_delimited_and_matrix_encodings_agree() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let matrix = synthetic_matrix();
    let path = write_csv(dir.path(), "hybrid_lut", &matrix);

    let reader = LutReader::new(&path, 3);
    let metadata = reader.read_metadata().expect("Failed to read header");
    assert_eq!(metadata, LutMetadata::new(4, 18, 20).expect("Invalid metadata"));

    let delimited = reader.read().expect("Failed to read delimited LUT");
    let raster = LutTable::from_raster_matrix(metadata, 3, matrix.clone(), "matrix")
        .expect("Failed to build matrix LUT");

    let comparison = delimited.compare(&raster).expect("Comparison failed");
    println!("Max parameter differences: {:?}", comparison.max_param_diff);
    println!("Max backscatter differences: {:?}", comparison.max_backscatter_diff);
    assert!(comparison.within(0.0));

    for section in 0..3 {
        for row in 0..4 {
            let r = section * 4 + row;
            assert_eq!(delimited.backscatter_pol(section, row, Polarization::HH), matrix[[r, 3]]);
            assert_eq!(delimited.backscatter_pol(section, row, Polarization::VV), matrix[[r, 4]]);
        }
    }
    assert_eq!(delimited.param_row(2), vec![matrix[[2, 0]], matrix[[2, 1]], matrix[[2, 2]]]);
}

#[test]
fn test_angle_boundaries() {
    let meta = LutMetadata::new(4, 18, 20).expect("Invalid metadata");
    assert!(meta.angle_section(18.0 - 0.6).is_none());
    assert!(meta.angle_section(20.0 + 0.6).is_none());
    assert_eq!(meta.angle_section(18.0 + 0.4).map(|s| s.index), Some(0));
    assert_eq!(meta.angle_section(19.5).map(|s| s.index), Some(2));
    assert_eq!(meta.angle_section(20.49).map(|s| s.angle), Some(20));
}

#[test]
fn test_malformed_bodies_are_format_errors() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let matrix = synthetic_matrix();
    let path = write_csv(dir.path(), "broken", &matrix);
    let good = fs::read_to_string(&path).expect("read back");

    let cases = [
        ("unparsable field", good.replacen("-19.5", "n/a", 1)),
        ("empty field", good.replacen(",", ",,", 1)),
        ("trailing delimiter", good.replacen("\n", ",\n", 1)),
        ("wrong width", good.lines().map(|l| format!("{},0\n", l)).collect()),
        ("missing row", good.lines().skip(1).map(|l| format!("{}\n", l)).collect()),
        ("infinite value", good.replacen("-19.5", "inf", 1)),
    ];

    for (label, body) in cases {
        fs::write(&path, body).expect("Failed to rewrite LUT body");
        let result = LutReader::new(&path, 3).read();
        assert!(
            matches!(result, Err(RetrievalError::LutFormat { .. })),
            "{} should be a format error, got {:?}",
            label,
            result.map(|_| ())
        );
    }

    let bytes = good.into_bytes();
    let second_row = bytes.iter().position(|&b| b == b'\n').expect("first row") + 1;
    let corrupted = [&bytes[..second_row], &[0xff, 0xfe][..], &bytes[second_row..]].concat();
    fs::write(&path, corrupted).expect("Failed to rewrite LUT body");
    match LutReader::new(&path, 3).read() {
        Err(RetrievalError::LutFormat { file, message }) => {
            assert!(file.ends_with("broken.csv"), "file = {}", file);
            assert!(message.starts_with("line 2:"), "message = {}", message);
        }
        other => panic!("non-UTF-8 row should be a format error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_header_errors() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = write_csv(dir.path(), "lut", &synthetic_matrix());

    fs::write(dir.path().join("lut.luthdr"), "Number_of_rows_per_angle = 4\nStart_angle = 21\nStop_angle = 20\n")
        .expect("write");
    assert!(matches!(LutReader::new(&path, 3).read(), Err(RetrievalError::LutFormat { .. })));

    fs::write(dir.path().join("lut.luthdr"), "Number_of_rows_per_angle = 4\nStart_angle = 18\n")
        .expect("write");
    match LutReader::new(&path, 3).read() {
        Err(RetrievalError::Coefficient { key, .. }) => assert_eq!(key, "Stop_angle"),
        other => panic!("expected missing key error, got {:?}", other.map(|_| ())),
    }

    let missing_body = dir.path().join("absent.csv");
    assert!(matches!(LutReader::new(&missing_body, 3).read(), Err(RetrievalError::LutFormat { .. })));
}

#[cfg(not(feature = "gdal"))]
#[test]
fn test_raster_body_needs_gdal() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let body = dir.path().join("lut.tif");
    fs::write(&body, b"not a raster").expect("write");
    fs::write(dir.path().join("lut.luthdr"), HEADER).expect("write");
    assert!(matches!(LutReader::new(&body, 3).read(), Err(RetrievalError::LutFormat { .. })));
}

#[test]
fn test_property_file_parsing() {
    let props = PropertyMap::parse("a = 1\n! note\nb: -2.5\n\nflag = yes\n", "inline").expect("parse");
    assert_eq!(props.len(), 3);
    assert_eq!(props.get_i32("a").expect("a"), 1);
    assert_eq!(props.get_f64("b").expect("b"), -2.5);
    assert!(props.get_bool_or("flag", false).expect("flag"));
    assert!(props.get_usize("b").is_err());
    assert!(PropertyMap::parse("no separator here\n", "inline").is_err());
}

#[test]
fn test_default_lut_folder() {
    let folder = default_lut_folder();
    if folder != Path::new(".") {
        assert!(folder.ends_with(Path::new("loam").join("sm_luts")));
    }
}
