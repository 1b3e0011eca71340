use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::checkpoint::read_checkpoint;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::sample::Dataset;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 检查点文件，默认为数据目录下的 landmarks.npz
    pub checkpoint: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let path = opts.checkpoint(self.checkpoint.as_ref())?;
        let dataset = read_checkpoint(&path)?;
        print_summary(&summarize(&dataset), self.output_format)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct LabelSummary {
    pub label: String,
    pub samples: usize,
    pub no_hand: usize,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub no_hand: usize,
    pub labels: Vec<LabelSummary>,
}

/// 按标签统计样本数量，标签按首次出现的顺序排列
pub fn summarize(dataset: &Dataset) -> Summary {
    let mut labels: Vec<LabelSummary> = vec![];
    for sample in dataset.samples() {
        let idx = match labels.iter().position(|l| l.label == sample.label) {
            Some(idx) => idx,
            None => {
                labels.push(LabelSummary { label: sample.label.clone(), samples: 0, no_hand: 0 });
                labels.len() - 1
            }
        };
        labels[idx].samples += 1;
        if sample.is_empty() {
            labels[idx].no_hand += 1;
        }
    }
    Summary {
        total: dataset.len(),
        no_hand: labels.iter().map(|l| l.no_hand).sum(),
        labels,
    }
}

fn print_summary(summary: &Summary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?)
        }
        OutputFormat::Table => {
            println!("label\tsamples\tno_hand");
            for l in &summary.labels {
                println!("{}\t{}\t{}", l.label, l.samples, l.no_hand);
            }
            println!("total\t{}\t{}", summary.total, summary.no_hand);
        }
    }
    Ok(())
}
