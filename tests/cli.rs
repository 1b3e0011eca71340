#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use opencv::core::{self, Mat, Vector};
use opencv::imgcodecs;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

/// 永远回复「没有检测到手」的检测器
const NO_HAND_DETECTOR: &str = r#"while IFS= read -r line; do
  w=$(printf '%s' "$line" | sed 's/.*"width":\([0-9]*\).*/\1/')
  h=$(printf '%s' "$line" | sed 's/.*"height":\([0-9]*\).*/\1/')
  head -c $((w * h * 3)) > /dev/null
  printf '%s\n' '{"hands":[]}'
done
"#;

fn write_image(path: &Path) -> Result<()> {
    let mat = Mat::new_rows_cols_with_default(16, 16, core::CV_8UC3, core::Scalar::all(64.))?;
    imgcodecs::imwrite(&path.to_string_lossy(), &mat, &Vector::new())?;
    Ok(())
}

/// A 下 2 张图片，B 下 1 张图片，外加一个检测器脚本
#[fixture]
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("dataset");
    fs::create_dir_all(root.join("A")).unwrap();
    fs::create_dir_all(root.join("B")).unwrap();
    write_image(&root.join("A/1.jpg")).unwrap();
    write_image(&root.join("A/2.png")).unwrap();
    write_image(&root.join("B/1.jpeg")).unwrap();
    fs::write(dir.path().join("detector.sh"), NO_HAND_DETECTOR).unwrap();
    dir
}

#[rstest]
fn extract_then_show(workspace: TempDir) -> Result<()> {
    let dir = workspace.path();
    let output = dir.join("out/landmarks.npz");

    cargo_run!(
        "handmark",
        "extract",
        dir.join("dataset"),
        "-o",
        &output,
        "--resume",
        "n",
        "--detector",
        "sh",
        "--detector-arg",
        dir.join("detector.sh")
    )
    .success()
    .stdout(predicate::str::contains("新增 3 条样本"));

    cargo_run!("handmark", "show", &output)
        .success()
        .stdout(predicate::str::contains("A\t2\t2"))
        .stdout(predicate::str::contains("B\t1\t1"))
        .stdout(predicate::str::contains("total\t3\t3"));

    Ok(())
}

#[rstest]
fn resume_does_not_duplicate(workspace: TempDir) -> Result<()> {
    let dir = workspace.path();

    for resume in ["n", "y", "y"] {
        cargo_run!(
            "handmark",
            "-d",
            dir,
            "extract",
            dir.join("dataset"),
            "--resume",
            resume,
            "--detector",
            "sh",
            "--detector-arg",
            dir.join("detector.sh")
        )
        .success();
    }

    cargo_run!("handmark", "-d", dir, "show", "--output-format", "json")
        .success()
        .stdout(predicate::str::contains(r#""total": 3"#));

    Ok(())
}

#[rstest]
fn resume_from_prompt(workspace: TempDir) -> Result<()> {
    let dir = workspace.path();
    let output = dir.join("landmarks.npz");

    for answer in ["n\n", "y\n"] {
        assert_cmd::Command::cargo_bin("handmark")?
            .arg("extract")
            .arg(dir.join("dataset"))
            .arg("-o")
            .arg(&output)
            .arg("--detector")
            .arg("sh")
            .arg("--detector-arg")
            .arg(dir.join("detector.sh"))
            .write_stdin(answer)
            .assert()
            .success();
    }

    cargo_run!("handmark", "show", &output).success().stdout(predicate::str::contains("total\t3\t3"));

    Ok(())
}

#[test]
fn show_missing_checkpoint() -> Result<()> {
    let dir = TempDir::new()?;
    cargo_run!("handmark", "show", dir.path().join("missing.npz")).failure();
    Ok(())
}

#[test]
fn extract_missing_dataset() -> Result<()> {
    let dir = TempDir::new()?;
    cargo_run!(
        "handmark",
        "extract",
        dir.path().join("missing"),
        "-o",
        dir.path().join("out.npz"),
        "--resume",
        "n",
        "--detector",
        "sh"
    )
    .failure();
    Ok(())
}
