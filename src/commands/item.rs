use clap::{Args, Subcommand};
use serde_json::Value;

use super::{record_json, truncate, OutputFormat};
use bibsync::db::LocalStore;
use bibsync::models::{Entity, Item};

#[derive(Args)]
pub struct ItemCommand {
    #[command(subcommand)]
    pub command: ItemSubcommand,
}

#[derive(Subcommand)]
pub enum ItemSubcommand {
    /// Create a new item
    New {
        /// Item type (book, journalArticle, ...)
        #[arg(long = "type", short = 't', value_name = "TYPE", default_value = "book")]
        item_type: String,

        /// Item title
        #[arg(long)]
        title: Option<String>,

        /// Extra field as LABEL=VALUE (can be repeated)
        #[arg(long = "field", value_name = "LABEL=VALUE")]
        fields: Vec<String>,
    },

    /// List cached items
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only show items with unsent changes
        #[arg(long)]
        pending: bool,
    },

    /// Show an item and its attachments
    Show {
        /// Item key
        key: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Set a field on an item
    Set {
        /// Item key
        key: String,

        /// Field label
        field: String,

        /// New value
        value: String,

        /// Parse VALUE as JSON instead of a plain string
        #[arg(long)]
        json: bool,
    },

    /// Add, rename or remove a tag
    Tag {
        /// Item key
        key: String,

        /// Tag to add
        #[arg(long, conflicts_with_all = ["rename", "remove"])]
        add: Option<String>,

        /// Rename a tag: --rename OLD NEW
        #[arg(long, num_args = 2, value_names = ["OLD", "NEW"], conflicts_with = "remove")]
        rename: Option<Vec<String>>,

        /// Tag to remove
        #[arg(long)]
        remove: Option<String>,
    },
}

impl ItemCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ItemSubcommand::New {
                item_type,
                title,
                fields,
            } => {
                let mut item = Item::new(item_type);
                if let Some(title) = title {
                    item.set_title(title);
                }
                for raw in fields {
                    let (label, value) = parse_assignment(raw)?;
                    item.set_field(&label, value);
                }
                item.save(store).await?;

                println!("Created item: {}", item.key());
                print!("{}", item);
                Ok(())
            }
            ItemSubcommand::List { format, pending } => {
                let items: Vec<Item> = store
                    .list::<Item>()
                    .await?
                    .into_iter()
                    .filter(|item| !pending || item.dirty().needs_push())
                    .collect();
                match format {
                    OutputFormat::Json => {
                        let values: Vec<Value> = items.iter().map(record_json).collect();
                        println!("{}", serde_json::to_string_pretty(&values)?);
                    }
                    OutputFormat::Text => print_table(&items),
                }
                Ok(())
            }
            ItemSubcommand::Show { key, format } => {
                let mut item = load_item(store, key).await?;
                let attachments = item.attachments(store).await?;
                match format {
                    OutputFormat::Json => {
                        let mut value = record_json(&item);
                        value["attachments"] =
                            Value::Array(attachments.iter().map(record_json).collect());
                        println!("{}", serde_json::to_string_pretty(&value)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", item);
                        if !attachments.is_empty() {
                            println!();
                            println!("Attachments:");
                            for attachment in &attachments {
                                println!("  - {}", attachment);
                            }
                        }
                    }
                }
                Ok(())
            }
            ItemSubcommand::Set {
                key,
                field,
                value,
                json,
            } => {
                let mut item = load_item(store, key).await?;
                let value = if *json {
                    serde_json::from_str(value)
                        .map_err(|e| format!("Invalid JSON value for '{}': {}", field, e))?
                } else {
                    Value::String(value.clone())
                };

                if item.set_field(field, value) {
                    item.save(store).await?;
                    println!("Updated {} on {} ({})", field, item.key(), item.dirty());
                } else {
                    println!("No change: {} already has that value", field);
                }
                Ok(())
            }
            ItemSubcommand::Tag {
                key,
                add,
                rename,
                remove,
            } => {
                let mut item = load_item(store, key).await?;
                let changed = match (add, rename, remove) {
                    (Some(tag), _, _) => item.set_tag(None, Some(tag.as_str())),
                    (_, Some(pair), _) if pair.len() == 2 => {
                        item.set_tag(Some(pair[0].as_str()), Some(pair[1].as_str()))
                    }
                    (_, _, Some(tag)) => item.set_tag(Some(tag.as_str()), None),
                    _ => return Err("Specify one of --add, --rename or --remove".into()),
                };

                if changed {
                    item.save(store).await?;
                    println!("Tags: {}", item.tags().join(", "));
                } else {
                    println!("No change to tags");
                }
                Ok(())
            }
        }
    }
}

async fn load_item(store: &LocalStore, key: &str) -> Result<Item, Box<dyn std::error::Error>> {
    store
        .find_by_key::<Item>(key)
        .await?
        .ok_or_else(|| format!("Item not found: {}", key).into())
}

/// Splits `LABEL=VALUE`. Values are stored as strings.
fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    match raw.split_once('=') {
        Some((label, value)) if !label.trim().is_empty() => {
            Ok((label.trim().to_string(), Value::String(value.to_string())))
        }
        _ => Err(format!("Invalid field '{}'. Expected LABEL=VALUE", raw)),
    }
}

fn print_table(items: &[Item]) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    println!(
        "{:<44} {:<40} {:<16} {:<6} {:<6}",
        "KEY", "TITLE", "TYPE", "YEAR", "STATE"
    );
    println!("{}", "-".repeat(116));

    for item in items {
        println!(
            "{:<44} {:<40} {:<16} {:<6} {:<6}",
            item.key(),
            truncate(item.title(), 40),
            truncate(item.item_type(), 16),
            item.year().unwrap_or_default(),
            item.dirty(),
        );
    }

    println!();
    println!("Total: {} item(s)", items.len());
}
