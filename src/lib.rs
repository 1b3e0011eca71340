pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod detector;
pub mod extractor;
pub mod sample;
pub mod scan;
pub mod utils;

pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use config::Opts;
pub use extractor::{CancelFlag, Extractor, RunOutcome, RunReport, extract_one};
pub use sample::{Dataset, ProcessedKey, Sample};
pub use scan::enumerate_inputs;
