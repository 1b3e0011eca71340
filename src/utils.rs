use std::io::{Read, Write};
use std::path::Path;

use indicatif::ProgressStyle;
use opencv::core::{Mat, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use crate::detector::RgbImage;

/// 读取图片并转换为 RGB，无法解码时返回 None
pub fn imread_rgb(path: &Path) -> opencv::Result<Option<RgbImage>> {
    // 先读出字节再解码，非 UTF-8 路径也能正常读取
    let Ok(bytes) = std::fs::read(path) else {
        return Ok(None);
    };
    let img = imgcodecs::imdecode(&Vector::from_slice(&bytes), imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        return Ok(None);
    }
    mat_to_rgb(&img).map(Some)
}

/// OpenCV 默认是 BGR 排列，检测器需要 RGB
pub fn mat_to_rgb(img: &Mat) -> opencv::Result<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(img, &mut rgb, imgproc::COLOR_BGR2RGB)?;
    let rgb = if rgb.is_continuous() { rgb } else { rgb.try_clone()? };
    Ok(RgbImage::new(rgb.cols() as u32, rgb.rows() as u32, rgb.data_bytes()?.to_vec()))
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:>3}% {pos}/{len} | {msg}",
    )
    .expect("invalid progress bar template")
    .progress_chars("#>-")
}

pub fn read_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let v = std::io::stdin()
        .bytes()
        .take_while(|c| c.as_ref().ok() != Some(&b'\n'))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf8(v)?.trim().to_owned())
}

/// 解析 y/yes/n/no，大小写不敏感
pub fn parse_yes_no(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "y" | "yes" => Ok(true),
        "n" | "no" | "" => Ok(false),
        _ => Err(format!("无效的选项: {}，请输入 y 或 n", s)),
    }
}
