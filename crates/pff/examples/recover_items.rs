use clap::Parser;
use pff::{PffFile, RecoveryFlags};

mod args;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = args::Args::try_parse()?;
    let file = PffFile::open(&args.file)?;

    let count = file.recover_items(RecoveryFlags {
        unallocated_only: true,
    })?;
    println!("Recovered {count} items");

    for index in 0..count {
        if let Some(item) = file.recovered_item(index) {
            println!(
                "  0x{:08X} {:?} (recovered: {})",
                item.identifier(),
                item.kind(),
                item.recovered()
            );
        }
    }

    Ok(())
}
