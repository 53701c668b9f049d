use image::{GrayImage, Luma};
use std::path::Path;
use std::process::Command;

/// 40x20 image with three bright 4x4 squares on a dark background.
fn write_scan(path: &Path, shift: u32) {
    let mut img = GrayImage::from_pixel(40, 20, Luma([10]));
    for &(x0, y0) in &[(2 + shift, 2), (30, 2), (16, 12)] {
        for y in y0..y0 + 4 {
            for x in x0..x0 + 4 {
                img.put_pixel(x, y, Luma([240]));
            }
        }
    }
    img.save(path).expect("write scan");
}

fn inspector() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nanospot_inspector"))
}

#[test]
fn single_image_run_writes_overlays_and_results() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scan = dir.path().join("scan.png");
    let header = dir.path().join("header.json");
    let out = dir.path().join("out");
    write_scan(&scan, 0);
    std::fs::write(
        &header,
        r#"{"x_size": 400.0, "y_size": 200.0, "x_points": 40, "y_points": 20}"#,
    )
    .expect("write header");

    let output = inspector()
        .arg(&scan)
        .args(["--format", "s94", "--threshold", "128", "--select", "1"])
        .arg("--header")
        .arg(&header)
        .arg("--out")
        .arg(&out)
        .output()
        .expect("run inspector");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    for file in ["scan.png_contours.png", "scan.png_wcontours.png", "scan.png_selected_1.png"] {
        assert!(out.join(file).exists(), "missing {file}");
    }

    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("results.json")).expect("results"))
            .expect("valid json");
    let rows = results["scan.png"].as_array().expect("rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["display_id"], "001");
    // 10 nm per pixel on both axes.
    assert_eq!(rows[0]["physical_area"], 1600.0);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("003"));
}

#[test]
fn stack_run_uses_one_sample_per_frame() {
    let dir = tempfile::tempdir().expect("temp dir");
    let header = dir.path().join("stack.json");
    let out = dir.path().join("out");
    let frames: Vec<_> = (0..3)
        .map(|i| {
            let path = dir.path().join(format!("f{i}.png"));
            write_scan(&path, i);
            path
        })
        .collect();
    std::fs::write(
        &header,
        r#"{"Control": {"X Amplitude": "80 nm", "Y Amplitude": "40 nm"},
            "General Info": {"Number of columns": 40, "Number of rows": 20}}"#,
    )
    .expect("write header");

    let status = inspector()
        .args(&frames)
        .args(["--format", "mpp", "--parallel"])
        .arg("--header")
        .arg(&header)
        .arg("--out")
        .arg(&out)
        .status()
        .expect("run inspector");
    assert!(status.success());

    for i in 1..=3 {
        assert!(out.join(format!("frame_{i}_contours.png")).exists());
    }
}

#[test]
fn bad_header_fails_with_message() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scan = dir.path().join("scan.png");
    let header = dir.path().join("header.json");
    write_scan(&scan, 0);
    std::fs::write(&header, r#"{"x_size": 400.0}"#).expect("write header");

    let output = inspector()
        .arg(&scan)
        .args(["--format", "s94"])
        .arg("--header")
        .arg(&header)
        .arg("--out")
        .arg(dir.path().join("out"))
        .output()
        .expect("run inspector");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("y_size"));
}
