use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::checkpoint::load_checkpoint;
use crate::cli::SubCommandExtend;
use crate::config::{DetectorOptions, Opts};
use crate::detector::{KillHandle, ProcessDetector};
use crate::extractor::{CancelFlag, Extractor, RunOutcome};
use crate::scan::enumerate_inputs;
use crate::utils::{self, parse_yes_no, pb_style};

const RESUME_PROMPT: &str = "是否继续上次的进度？(y/n): ";

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    #[command(flatten)]
    pub detector: DetectorOptions,
    /// 数据集目录，每个子目录为一个标签
    pub root: PathBuf,
    /// 检查点文件，同时也是最终的输出
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// 是否从检查点继续，不指定时会询问
    #[arg(long, value_name = "y|n", value_parser = parse_yes_no)]
    pub resume: Option<bool>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
    /// 每新增多少条样本保存一次检查点，0 表示只在结束和中断时保存。
    /// 每次保存都会重新写入全部样本，数据集很大时应调大这个值
    #[arg(long, value_name = "N", default_value_t = 1000)]
    pub checkpoint_every: usize,
}

/// 第一次中断时等待当前图片处理完，再次中断时直接结束检测器
#[derive(Debug, Clone)]
struct InterruptHandler {
    cancel: CancelFlag,
    killer: KillHandle,
    count: Arc<AtomicUsize>,
}

impl InterruptHandler {
    fn new(cancel: CancelFlag, killer: KillHandle) -> Self {
        Self { cancel, killer, count: Arc::new(AtomicUsize::new(0)) }
    }

    fn interrupt(&self) {
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancel.cancel();
        } else {
            warn!("再次收到中断信号，结束检测器");
            self.killer.kill();
        }
    }
}

impl SubCommandExtend for ExtractCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let checkpoint = opts.checkpoint(self.output.as_ref())?;
        let tree = enumerate_inputs(&self.root, &self.suffix)?;

        let resume = match self.resume {
            Some(resume) => resume,
            None => parse_yes_no(&utils::read_line(RESUME_PROMPT)?).unwrap_or(false),
        };
        let mut dataset = load_checkpoint(&checkpoint, resume);
        if resume {
            println!("已加载 {} 条样本", dataset.len());
        }

        let detector = ProcessDetector::spawn(&self.detector)?;

        let cancel = CancelFlag::new();
        let handler = InterruptHandler::new(cancel.clone(), detector.kill_handle());
        let watcher = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                handler.interrupt();
            }
        });

        let pb = ProgressBar::no_length().with_style(pb_style());
        let mut extractor = Extractor::new(detector, &checkpoint, cancel)
            .checkpoint_every(self.checkpoint_every)
            .progress(pb.clone());

        let report = block_in_place(|| extractor.run(&tree, &mut dataset));
        watcher.abort();
        let report = report?;

        let summary = format!(
            "新增 {} 条样本（未检测到手 {}），跳过 {} 张无法读取的图片，共 {} 条样本 → {}",
            report.added,
            report.no_hand,
            report.unreadable,
            dataset.len(),
            checkpoint.display()
        );
        match report.outcome {
            RunOutcome::Completed => pb.finish_with_message("提取完成"),
            RunOutcome::Interrupted => pb.abandon_with_message("已暂停"),
        }
        println!("{}", summary);
        info!(
            "已处理过的图片: {}，重复的图片: {}",
            report.already_processed, report.duplicated
        );

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    use opencv::core::{self, Mat, Vector};
    use opencv::imgcodecs;
    use tempfile::tempdir;

    use super::*;
    use crate::checkpoint::read_checkpoint;
    use crate::detector::{LandmarkDetector, RgbImage};
    use crate::sample::Dataset;

    /// 回复第一张图片后不再响应
    const STUCK_DETECTOR: &str = r#"IFS= read -r line
w=$(printf '%s' "$line" | sed 's/.*"width":\([0-9]*\).*/\1/')
h=$(printf '%s' "$line" | sed 's/.*"height":\([0-9]*\).*/\1/')
head -c $((w * h * 3)) > /dev/null
printf '%s\n' '{"hands":[]}'
exec sleep 1000
"#;

    fn write_image(path: &Path) {
        let mat =
            Mat::new_rows_cols_with_default(8, 8, core::CV_8UC3, core::Scalar::all(32.)).unwrap();
        imgcodecs::imwrite(&path.to_string_lossy(), &mat, &Vector::new()).unwrap();
    }

    #[test]
    fn test_second_interrupt_kills_stuck_detector() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        fs::create_dir_all(root.join("A")).unwrap();
        for name in ["1.png", "2.png", "3.png"] {
            write_image(&root.join("A").join(name));
        }
        let script = dir.path().join("detector.sh");
        fs::write(&script, STUCK_DETECTOR).unwrap();
        let opts = DetectorOptions {
            detector: "sh".to_owned(),
            detector_arg: vec![script.to_string_lossy().to_string()],
            min_detection_confidence: 0.5,
        };

        let tree = enumerate_inputs(&root, "png").unwrap();
        let checkpoint = dir.path().join("out.npz");
        let detector = ProcessDetector::spawn(&opts).unwrap();
        let cancel = CancelFlag::new();
        let handler = InterruptHandler::new(cancel.clone(), detector.kill_handle());

        // 第一条样本写入检查点后连续中断两次
        let handle = thread::spawn({
            let checkpoint = checkpoint.clone();
            move || {
                while !checkpoint.exists() {
                    thread::sleep(Duration::from_millis(10));
                }
                handler.interrupt();
                thread::sleep(Duration::from_millis(100));
                handler.interrupt();
            }
        });

        let mut dataset = Dataset::new();
        let report = Extractor::new(detector, &checkpoint, cancel)
            .checkpoint_every(1)
            .run(&tree, &mut dataset)
            .unwrap();
        handle.join().unwrap();

        assert_eq!(report.outcome, RunOutcome::Interrupted);
        assert_eq!(report.added, 1);
        assert_eq!(read_checkpoint(&checkpoint).unwrap().len(), 1);
    }

    #[test]
    fn test_first_interrupt_only_cancels() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("detector.sh");
        fs::write(&script, STUCK_DETECTOR).unwrap();
        let opts = DetectorOptions {
            detector: "sh".to_owned(),
            detector_arg: vec![script.to_string_lossy().to_string()],
            min_detection_confidence: 0.5,
        };
        let mut detector = ProcessDetector::spawn(&opts).unwrap();
        let cancel = CancelFlag::new();
        let handler = InterruptHandler::new(cancel.clone(), detector.kill_handle());

        handler.interrupt();
        assert!(cancel.is_cancelled());

        // 检测器仍然可以完成当前图片
        let image = RgbImage::new(2, 2, vec![0; 12]);
        assert_eq!(detector.detect(&image).unwrap(), None);
    }
}
