use clap::{Args, Subcommand, ValueEnum};
use std::str::FromStr;

use carelog_core::{Action, EntityType, EventPayload};

use crate::config::Config;
use crate::db::{init_db, LocalRecord, LocalStore};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Record and edit child-care entries
#[derive(Args)]
pub struct EntryCommand {
    #[command(subcommand)]
    pub command: EntrySubcommand,
}

#[derive(Subcommand)]
pub enum EntrySubcommand {
    /// Record a new entry
    Add {
        /// Entry type (feeding, sleep, medication, medication_log, note, vaccination, appointment)
        #[arg(value_parser = EntityType::from_str)]
        entity_type: EntityType,

        /// Entry fields as a JSON object
        #[arg(long, short)]
        data: String,
    },

    /// Replace the fields of an entry
    Update {
        #[arg(value_parser = EntityType::from_str)]
        entity_type: EntityType,

        /// Entry ID
        id: String,

        /// Entry fields as a JSON object
        #[arg(long, short)]
        data: String,
    },

    /// Delete an entry
    Delete {
        #[arg(value_parser = EntityType::from_str)]
        entity_type: EntityType,

        /// Entry ID
        id: String,
    },

    /// Stop a medication (its logs are kept)
    Deactivate {
        /// Medication ID
        id: String,
    },

    /// List entries of one type
    List {
        #[arg(value_parser = EntityType::from_str)]
        entity_type: EntityType,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl EntryCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let pool = init_db(&config.database_path.value).await?;
            self.execute(&LocalStore::new(pool)).await
        })
    }

    async fn execute(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            EntrySubcommand::Add { entity_type, data } => {
                let payload = parse_data(*entity_type, data)?;
                let event = store
                    .apply_local(*entity_type, Action::Create, None, Some(payload))
                    .await?;
                println!("Added {} {}", entity_type, event.record_id);
            }
            EntrySubcommand::Update {
                entity_type,
                id,
                data,
            } => {
                let payload = parse_data(*entity_type, data)?;
                let event = store
                    .apply_local(*entity_type, Action::Update, Some(id), Some(payload))
                    .await?;
                println!("Updated {} {}", entity_type, event.record_id);
            }
            EntrySubcommand::Delete { entity_type, id } => {
                let event = store
                    .apply_local(*entity_type, Action::Delete, Some(id), None)
                    .await?;
                println!("Deleted {} {}", entity_type, event.record_id);
            }
            EntrySubcommand::Deactivate { id } => {
                let event = store
                    .apply_local(EntityType::Medication, Action::Deactivate, Some(id), None)
                    .await?;
                println!("Deactivated medication {}", event.record_id);
            }
            EntrySubcommand::List {
                entity_type,
                format,
            } => {
                let records = store.list(*entity_type).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&records)?);
                    }
                    OutputFormat::Text => {
                        if records.is_empty() {
                            println!("No {} entries.", entity_type);
                        }
                        for record in &records {
                            print_record(record);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Decodes `--data` as the input shape of `entity_type`.
fn parse_data(entity_type: EntityType, data: &str) -> Result<EventPayload, String> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| format!("--data is not valid JSON: {}", e))?;
    EventPayload::decode(entity_type, value)
        .map_err(|e| format!("--data is not a valid {}: {}", entity_type, e))
}

fn print_record(record: &LocalRecord) {
    let marker = if record.pending_sync { " (pending)" } else { "" };
    println!("{}{}", record.id, marker);
    println!("  {}", record.data);
}
