use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

/// 检查点的默认文件名
pub const CHECKPOINT_FILE: &str = "landmarks.npz";

#[derive(Parser, Debug, Clone)]
pub struct DetectorOptions {
    /// 关键点检测器程序，通过标准输入输出通信
    #[arg(long, value_name = "PROGRAM")]
    pub detector: String,
    /// 传给检测器的参数，可以多次指定
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    pub detector_arg: Vec<String>,
    /// 检测器的最低置信度
    #[arg(long, value_name = "CONFIDENCE", default_value_t = 0.5, value_parser = parse_confidence)]
    pub min_detection_confidence: f32,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "handmark", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，默认的检查点保存在这里
    #[arg(short, long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Opts {
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let proj_dirs =
            ProjectDirs::from("", "", "handmark").ok_or_else(|| anyhow!("无法获取数据目录"))?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    /// 命令行未指定检查点时使用的路径
    pub fn checkpoint(&self, path: Option<&PathBuf>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join(CHECKPOINT_FILE)),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从图片数据集中提取手部关键点，支持断点续传
    Extract(ExtractCommand),
    /// 查看检查点中的样本统计
    Show(ShowCommand),
}

fn parse_confidence(s: &str) -> Result<f32> {
    let v: f32 = s.parse()?;
    if !(0. ..=1.).contains(&v) {
        return Err(anyhow!("置信度必须在 0 到 1 之间: {}", s));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extract() {
        let opts = Opts::try_parse_from([
            "handmark",
            "-d",
            "/tmp/hm",
            "extract",
            "dataset",
            "--detector",
            "python3",
            "--detector-arg",
            "detect.py",
            "--detector-arg",
            "--gpu",
            "--resume",
            "y",
        ])
        .unwrap();

        let SubCommand::Extract(cmd) = &opts.subcmd else {
            panic!("expected extract");
        };
        assert_eq!(cmd.detector.detector_arg, ["detect.py", "--gpu"]);
        assert_eq!(cmd.detector.min_detection_confidence, 0.5);
        assert_eq!(cmd.resume, Some(true));
        assert_eq!(cmd.checkpoint_every, 1000);
        assert_eq!(
            opts.checkpoint(cmd.output.as_ref()).unwrap(),
            PathBuf::from("/tmp/hm").join(CHECKPOINT_FILE)
        );
    }

    #[test]
    fn test_parse_confidence() {
        assert_eq!(parse_confidence("0.7").unwrap(), 0.7);
        assert!(parse_confidence("1.5").is_err());
        assert!(parse_confidence("abc").is_err());
    }
}
