use clap::{Args, Subcommand};
use serde_json::Value;

use super::{record_json, truncate, OutputFormat};
use bibsync::db::LocalStore;
use bibsync::models::{Attachment, Entity, Item};

#[derive(Args)]
pub struct AttachmentCommand {
    #[command(subcommand)]
    pub command: AttachmentSubcommand,
}

#[derive(Subcommand)]
pub enum AttachmentSubcommand {
    /// Add a note to an item, or edit an existing note
    Note {
        /// Key of the parent item (or of the note with --edit)
        key: String,

        /// Note text
        text: String,

        /// Replace the text of the note KEY instead of creating one
        #[arg(long)]
        edit: bool,
    },

    /// List cached attachments
    List {
        /// Only list attachments of this item
        #[arg(long)]
        item: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl AttachmentCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            AttachmentSubcommand::Note { key, text, edit } if *edit => {
                let mut note = store
                    .find_by_key::<Attachment>(key)
                    .await?
                    .ok_or_else(|| format!("Attachment not found: {}", key))?;
                if !note.is_note() {
                    return Err(format!(
                        "Attachment {} is a {}, not a note",
                        key,
                        note.effective_type()
                    )
                    .into());
                }
                if note.set_note_text(text.as_str()) {
                    note.save(store).await?;
                }
                println!("{}", note);
                Ok(())
            }
            AttachmentSubcommand::Note { key, text, .. } => {
                let mut item = store
                    .find_by_key::<Item>(key)
                    .await?
                    .ok_or_else(|| format!("Item not found: {}", key))?;
                let mut note = Attachment::child_of(&item, "note");
                note.set_note_text(text.as_str());
                note.save_with_parent(store, &mut item).await?;
                println!("Created note: {}", note.key());
                Ok(())
            }
            AttachmentSubcommand::List { item, format } => {
                let attachments = match item {
                    Some(parent) => store.find_by_parent::<Attachment>(parent).await?,
                    None => store.list::<Attachment>().await?,
                };
                match format {
                    OutputFormat::Json => {
                        let values: Vec<Value> = attachments.iter().map(record_json).collect();
                        println!("{}", serde_json::to_string_pretty(&values)?);
                    }
                    OutputFormat::Text => print_table(&attachments),
                }
                Ok(())
            }
        }
    }
}

fn print_table(attachments: &[Attachment]) {
    if attachments.is_empty() {
        println!("No attachments found.");
        return;
    }

    println!(
        "{:<40} {:<20} {:<40} {:<6}",
        "KEY", "TYPE", "TITLE / NOTE", "STATE"
    );
    println!("{}", "-".repeat(108));

    for attachment in attachments {
        let label = attachment
            .note_text()
            .filter(|_| attachment.title().is_empty())
            .unwrap_or(attachment.title());
        println!(
            "{:<40} {:<20} {:<40} {:<6}",
            attachment.key(),
            truncate(&attachment.effective_type(), 20),
            truncate(&label.replace('\n', " "), 40),
            attachment.dirty(),
        );
    }

    println!();
    println!("Total: {} attachment(s)", attachments.len());
}
