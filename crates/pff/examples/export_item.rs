use clap::Parser;
use pff::{
    messaging::{folder::FolderView, message::MessageView},
    PffFile,
};
use std::io::Read;

mod args;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = args::Args::try_parse()?;
    let file = PffFile::open(&args.file)?;
    let root = file.root_folder()?;
    export_folder(&root)?;

    Ok(())
}

fn export_folder(folder: &FolderView<'_>) -> anyhow::Result<()> {
    for index in 0..folder.sub_message_count()? {
        let Some(item) = folder.sub_message(index)? else {
            continue;
        };
        let message = MessageView::new(item)?;

        println!("Subject: {}", message.subject()?.unwrap_or_default());
        if let Some(sender) = message.sender_name()? {
            println!("From: {sender}");
        }
        for recipient in 0..message.recipient_count()? {
            if let Some(recipient) = message.recipient(recipient)? {
                println!(
                    "To ({:?}): {}",
                    recipient.kind(),
                    recipient.email_address()?.unwrap_or_default()
                );
            }
        }
        if let Some(time) = message.delivery_time()? {
            println!("Delivered: {} (posix)", time.to_posix_seconds());
        }

        if let Some(size) = message.plain_text_body_size()? {
            let mut body = vec![0_u8; size];
            message.copy_plain_text_body(&mut body)?;
            body.pop();
            println!("{}", String::from_utf8_lossy(&body));
        }

        for attachment in 0..message.attachment_count()? {
            if let Some(attachment) = message.attachment(attachment)? {
                let name = attachment
                    .long_filename()?
                    .unwrap_or_else(|| "attachment.bin".into());
                let mut data = Vec::new();
                attachment.data()?.read_to_end(&mut data)?;
                println!("[attachment {name}: {} bytes]", data.len());
            }
        }
        println!();
    }

    for index in 0..folder.sub_folder_count()? {
        if let Some(child) = folder.sub_folder(index)? {
            export_folder(&child)?;
        }
    }
    Ok(())
}
