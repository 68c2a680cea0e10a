//! PNG file tests for mandel-io.

use mandel_io::{IoError, png};

fn gradient(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push((x * 16) as u8);
            data.push((y * 16) as u8);
            data.push(64);
            data.push(255);
        }
    }
    data
}

#[test]
fn test_roundtrip_rgba() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gradient.png");
    let data = gradient(16, 8);

    png::write_rgba(&path, &data, 16, 8).unwrap();
    let (loaded, width, height) = png::read_rgba(&path).unwrap();

    assert_eq!((width, height), (16, 8));
    assert_eq!(loaded, data);
}

#[test]
fn test_dimension_mismatch_creates_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.png");

    let err = png::write_rgba(&path, &gradient(4, 4), 4, 5).unwrap_err();
    assert!(matches!(err, IoError::DimensionMismatch { expected: 80, actual: 64 }));
    assert!(err.to_string().contains("expected 80 bytes"));
    assert!(!path.exists());
}

#[test]
fn test_unwritable_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("out.png");
    let err = png::write_rgba(&path, &gradient(2, 2), 2, 2).unwrap_err();
    assert!(matches!(err, IoError::Io(_)));
}

#[test]
fn test_not_a_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake.png");
    std::fs::write(&path, b"definitely not a png").unwrap();
    let err = png::read_rgba(&path).unwrap_err();
    assert!(matches!(err, IoError::DecodeError(_)));
}
