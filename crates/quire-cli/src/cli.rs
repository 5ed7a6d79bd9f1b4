use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Local-first notes with background cloud sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Quick capture: quire "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, edit and list notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Sign in to the sync provider
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Push local changes and pull remote edits
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum NoteCommands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note title (defaults to the first line of content)
        #[arg(short, long)]
        title: Option<String>,
        /// Note content
        content: Vec<String>,
    },
    /// Edit an existing note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// Replace the title
        #[arg(short, long)]
        title: Option<String>,
        /// Replacement content (opens $EDITOR when omitted)
        content: Vec<String>,
    },
    /// Delete an existing note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in through the browser and store credentials in the keychain
    Login {
        /// Seconds to wait for the browser redirect
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
    /// Show who is signed in
    Status,
    /// Sign out and delete stored credentials
    Logout,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show pending changes and sign-in state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload pending changes now
    Push,
    /// Download remote edits and reconcile them
    Pull,
    /// Keep the session fresh and sync in the background until Ctrl-C
    Watch {
        /// Seconds between remote pulls
        #[arg(long, default_value = "60")]
        pull_interval: u64,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
