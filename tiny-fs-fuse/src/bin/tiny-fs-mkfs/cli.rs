use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Image file to create
    #[arg(long, short = 'O')]
    pub image: PathBuf,

    /// Host directory whose files are packed into the image root
    #[arg(long, short)]
    pub source: Option<PathBuf>,

    /// Total number of blocks in the image (multiple of 64)
    #[arg(long, default_value_t = 4096)]
    pub blocks: u32,

    /// Directory table capacity
    #[arg(long, default_value_t = 64)]
    pub capacity: usize,

    /// List the image contents recursively when done
    #[arg(long)]
    pub list: bool,
}
