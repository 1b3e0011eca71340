use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::{debug, warn};
use regex::Regex;
use walkdir::WalkDir;

/// 一个标签目录，目录名即标签
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDir {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageFile {
    pub name: String,
    pub path: PathBuf,
}

impl ImageFile {
    fn new(path: PathBuf) -> Self {
        let name = path.file_name().unwrap_or_default().to_string_lossy().to_string();
        Self { name, path }
    }
}

/// `root/<label>/<image>` 结构的数据集目录
///
/// 可以重复遍历，每个标签下的文件在需要时才读取。目录项按文件名排序
#[derive(Debug, Clone)]
pub struct InputTree {
    root: PathBuf,
    suffix: Regex,
}

/// 扫描 `root` 下的数据集，`suffix` 为逗号分隔的后缀名，大小写不敏感
pub fn enumerate_inputs(root: impl Into<PathBuf>, suffix: &str) -> Result<InputTree> {
    let re = format!("(?i)^({})$", suffix.replace(',', "|"));
    let suffix = Regex::new(&re)?;
    let root = root.into();
    if !root.is_dir() {
        return Err(anyhow!("数据集目录不存在: {}", root.display()));
    }
    Ok(InputTree { root, suffix })
}

impl InputTree {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 遍历所有标签目录，忽略 root 下的普通文件
    ///
    /// 只有 root 本身无法读取时才返回错误，无法访问的目录项（比如失效的符号链接）会被跳过
    pub fn labels(&self) -> impl Iterator<Item = Result<LabelDir>> + '_ {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_dir() => Some(Ok(LabelDir {
                    label: entry.file_name().to_string_lossy().to_string(),
                    path: entry.into_path(),
                })),
                Ok(_) => None,
                Err(e) if e.depth() == 0 => Some(Err(e.into())),
                Err(e) => {
                    warn!("跳过无法访问的目录项: {}", e);
                    None
                }
            })
    }

    /// 列出一个标签目录下的图片，不递归子目录
    ///
    /// 后缀名匹配但无法解析的符号链接会保留下来，读取时按无法读取的图片处理
    pub fn files(&self, label: &LabelDir) -> Result<Vec<ImageFile>> {
        let mut files = vec![];
        for entry in WalkDir::new(&label.path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    match e.path().filter(|p| e.depth() == 1 && p.is_symlink()) {
                        Some(path) if self.is_image(path) => {
                            debug!("失效的符号链接: {}", path.display());
                            files.push(ImageFile::new(path.to_path_buf()));
                        }
                        _ => warn!("跳过无法访问的目录项: {}", e),
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_image(entry.path()) {
                continue;
            }
            files.push(ImageFile::new(entry.into_path()));
        }
        Ok(files)
    }

    fn is_image(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| self.suffix.is_match(&ext.to_string_lossy()))
    }

    /// 图片总数
    pub fn count_files(&self) -> Result<usize> {
        let mut total = 0;
        for label in self.labels() {
            total += self.files(&label?)?.len();
        }
        Ok(total)
    }
}
