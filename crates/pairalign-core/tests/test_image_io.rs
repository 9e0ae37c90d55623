mod common;

use common::textured_image;
use pairalign_core::error::PairalignError;
use pairalign_core::io::image_io::{load_color_image, save_color_png};
use tempfile::tempdir;

#[test]
fn png_round_trip_preserves_pixels_within_quantization() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("image.png");
    let original = textured_image(32, 48);

    save_color_png(&original, &path).unwrap();
    let loaded = load_color_image(&path).unwrap();

    assert_eq!(loaded.width(), 48);
    assert_eq!(loaded.height(), 32);
    // 8-bit storage quantizes to steps of 1/255.
    let tolerance = 0.5 / 255.0 + 1e-6;
    for (a, b) in original.red.data.iter().zip(loaded.red.data.iter()) {
        assert!((a - b).abs() <= tolerance, "got {b}, expected {a}");
    }
}

#[test]
fn undecodable_file_reports_its_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("not_an_image.png");
    std::fs::write(&path, b"definitely not a png").unwrap();

    match load_color_image(&path) {
        Err(PairalignError::Decode { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[test]
fn missing_file_is_a_decode_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.png");
    assert!(matches!(
        load_color_image(&path),
        Err(PairalignError::Decode { .. })
    ));
}
