use clap::{Args, Subcommand};
use serde_json::Value;

use super::{record_json, truncate, OutputFormat};
use bibsync::db::LocalStore;
use bibsync::models::{Collection, Entity, Item};

#[derive(Args)]
pub struct CollectionCommand {
    #[command(subcommand)]
    pub command: CollectionSubcommand,
}

#[derive(Subcommand)]
pub enum CollectionSubcommand {
    /// Create a new collection
    New {
        /// Collection name
        name: String,

        /// Key of the parent collection
        #[arg(long)]
        parent: Option<String>,
    },

    /// List cached collections
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only list sub-collections of this collection
        #[arg(long)]
        parent: Option<String>,
    },

    /// Put an item in a collection
    Add {
        /// Collection key
        key: String,

        /// Item key
        item: String,
    },

    /// Take an item out of a collection
    Remove {
        /// Collection key
        key: String,

        /// Item key
        item: String,
    },

    /// List the items in a collection
    Items {
        /// Collection key
        key: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Rename a collection
    Rename {
        /// Collection key
        key: String,

        /// New name
        name: String,
    },
}

impl CollectionCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            CollectionSubcommand::New { name, parent } => {
                let mut collection = Collection::new(name);
                if let Some(parent) = parent {
                    if store.find_by_key::<Collection>(parent).await?.is_none() {
                        return Err(format!("Collection not found: {}", parent).into());
                    }
                    collection = collection.with_parent(parent);
                }
                collection.save(store).await?;
                println!("Created collection: {}", collection);
                Ok(())
            }
            CollectionSubcommand::List { format, parent } => {
                let collections = match parent {
                    Some(parent) => store.find_by_parent::<Collection>(parent).await?,
                    None => store.list::<Collection>().await?,
                };
                match format {
                    OutputFormat::Json => {
                        let values: Vec<Value> = collections.iter().map(record_json).collect();
                        println!("{}", serde_json::to_string_pretty(&values)?);
                    }
                    OutputFormat::Text => print_table(&collections),
                }
                Ok(())
            }
            CollectionSubcommand::Add { key, item } => {
                let collection = load_collection(store, key).await?;
                let mut item = load_item(store, item).await?;
                if collection.add_item(&mut item) {
                    item.save(store).await?;
                    println!("Added {} to {}", item.key(), collection.name());
                } else {
                    println!("{} is already in {}", item.key(), collection.name());
                }
                Ok(())
            }
            CollectionSubcommand::Remove { key, item } => {
                let collection = load_collection(store, key).await?;
                let mut item = load_item(store, item).await?;
                if collection.remove_item(&mut item) {
                    item.save(store).await?;
                    println!("Removed {} from {}", item.key(), collection.name());
                } else {
                    println!("{} is not in {}", item.key(), collection.name());
                }
                Ok(())
            }
            CollectionSubcommand::Items { key, format } => {
                let collection = load_collection(store, key).await?;
                let items = collection.items(store).await?;
                match format {
                    OutputFormat::Json => {
                        let values: Vec<Value> = items.iter().map(record_json).collect();
                        println!("{}", serde_json::to_string_pretty(&values)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", collection.name());
                        println!("{}", "=".repeat(collection.name().len()));
                        for item in &items {
                            println!("  {:<44} {} ({})", item.key(), item.title(), item.dirty());
                        }
                        println!("\nTotal: {} item(s)", items.len());
                    }
                }
                Ok(())
            }
            CollectionSubcommand::Rename { key, name } => {
                let mut collection = load_collection(store, key).await?;
                if collection.set_name(name) {
                    collection.save(store).await?;
                }
                println!("{}", collection);
                Ok(())
            }
        }
    }
}

async fn load_collection(
    store: &LocalStore,
    key: &str,
) -> Result<Collection, Box<dyn std::error::Error>> {
    store
        .find_by_key::<Collection>(key)
        .await?
        .ok_or_else(|| format!("Collection not found: {}", key).into())
}

async fn load_item(store: &LocalStore, key: &str) -> Result<Item, Box<dyn std::error::Error>> {
    store
        .find_by_key::<Item>(key)
        .await?
        .ok_or_else(|| format!("Item not found: {}", key).into())
}

fn print_table(collections: &[Collection]) {
    if collections.is_empty() {
        println!("No collections found.");
        return;
    }

    println!("{:<40} {:<40} {:<40} {:<6}", "KEY", "NAME", "PARENT", "STATE");
    println!("{}", "-".repeat(128));

    for collection in collections {
        println!(
            "{:<40} {:<40} {:<40} {:<6}",
            collection.key(),
            truncate(collection.name(), 40),
            collection.parent_key().unwrap_or("-"),
            collection.dirty(),
        );
    }

    println!();
    println!("Total: {} collection(s)", collections.len());
}
