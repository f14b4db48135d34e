use clap::Parser;
use pff::{messaging::folder::FolderView, PffFile};

mod args;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = args::Args::try_parse()?;
    let file = PffFile::open(&args.file)?;

    if let Ok(store) = file.message_store() {
        if let Some(name) = store.display_name()? {
            println!("Store: {name}");
        }
    }

    let root = file.root_folder()?;
    walk(&root, 0)?;

    Ok(())
}

fn walk(folder: &FolderView<'_>, depth: usize) -> anyhow::Result<()> {
    let name = folder.name()?.unwrap_or_else(|| "(unnamed)".into());
    let messages = folder.sub_message_count()?;
    println!("{:indent$}{name} ({messages} messages)", "", indent = depth * 2);

    for index in 0..folder.sub_folder_count()? {
        if let Some(child) = folder.sub_folder(index)? {
            walk(&child, depth + 1)?;
        }
    }
    Ok(())
}
