use clap::Parser;
use pff::PffFile;

mod args;

fn main() -> anyhow::Result<()> {
    let args = args::Args::try_parse()?;

    let file = PffFile::open(&args.file)?;

    println!("Format Variant: {:?}", file.format_variant());
    println!("Content Kind: {:?}", file.content_kind());
    println!("Encryption: {:?}", file.encryption_kind());
    println!("ASCII Codepage: {}", file.ascii_codepage());
    println!("File Size: {}", file.size());
    println!("Descriptors: {}", file.descriptor_count());
    println!("Orphans: {}", file.orphan_count());

    Ok(())
}
