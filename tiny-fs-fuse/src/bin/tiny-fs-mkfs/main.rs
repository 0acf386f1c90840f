mod cli;

use std::error::Error;
use std::fs;
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use clap::Parser;
use cli::Cli;
use tiny_fs::{BLOCK_SIZE, TinyFileSystem};
use tiny_fs_fuse::BlockFile;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let device = Arc::new(BlockFile(Mutex::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&cli.image)?;
        fd.set_len(cli.blocks as u64 * BLOCK_SIZE as u64)?;
        fd
    })));

    let mut fs = TinyFileSystem::format(device, cli.blocks, cli.capacity);

    if let Some(source) = &cli.source {
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry
                .file_name()
                .into_string()
                .expect("source file name is not unicode");
            let data = fs::read(entry.path())?;

            let path = format!("/{name}");
            fs.create(&path, data.len(), false)?;
            let id = fs.open_id(&path)?;
            fs.write_id(id, &data)?;
            fs.close_id(id)?;
            println!("packed: {path} ({} bytes)", data.len());
        }
    }

    if cli.list {
        for entry in fs.list("/", true)? {
            let kind = if entry.is_dir { "dir " } else { "file" };
            println!("{kind} {}", entry.path);
        }
    }
    println!("{} blocks free", fs.free_blocks());

    Ok(())
}
