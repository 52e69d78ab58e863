mod config_cmd;
pub mod entry;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use entry::{EntryCommand, EntrySubcommand};
pub use sync_cmd::SyncCommand;
