use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Language;

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Catalog language to operate on
    #[clap(short, long, global = true, default_value = "english")]
    pub language: Language,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP search service.
    Serve {
        /// Address to listen on, overrides bind_address from config
        #[clap(long)]
        bind: Option<String>,
    },

    /// Search NIC codes
    Search {
        /// Search text
        #[clap(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Number of results
        #[clap(short = 'n', long, default_value = "10")]
        count: usize,

        /// standard, strict or relaxed
        #[clap(short, long, default_value = "standard")]
        mode: String,

        /// Print timing information
        #[clap(long, default_value = "false")]
        metrics: bool,

        /// Print raw JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Build the vector index from catalog embeddings.
    BuildIndex {
        /// Rebuild even if an index file exists
        #[clap(short, long, default_value = "false")]
        force: bool,
    },

    /// Show index and embedding cache statistics
    Stats {},

    /// Delete the embedding cache
    ClearCache {},

    /// Compute document embeddings with the configured model and
    /// write them to the catalog file.
    Embed {
        /// Re-embed documents that already have an embedding
        #[clap(long, default_value = "false")]
        overwrite: bool,
    },

    /// Check catalog embeddings for missing or broken values
    Verify {
        /// How many problematic document ids to print
        #[clap(long, default_value = "10")]
        samples: usize,
    },

    /// Convert a CSV export of the NIC spreadsheet into a catalog file
    ImportCsv {
        /// CSV file with a header row
        csv: PathBuf,

        /// Output file, defaults to the language's configured catalog
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
}
