use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dumbcas",
    version,
    about = "Dumb content-addressed backup store",
    after_help = "\
The archive list file contains one path per line. Lines may be relative
(resolved against the list file's directory) and may reference environment
variables as $VAR or ${VAR}. The list file itself is always included in
the backup."
)]
pub(crate) struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Archive the files listed in a .toArchive file
    Archive {
        /// File listing one path to back up per line
        to_archive: String,

        /// Store root directory
        #[arg(short, long)]
        out: String,

        /// Comment to embed in the node
        #[arg(long)]
        comment: Option<String>,
    },

    /// Serve the store contents over HTTP
    Web {
        /// Store root directory
        #[arg(long)]
        root: String,

        /// Port to listen on (0 picks an ephemeral port)
        #[arg(long, default_value_t = 0)]
        port: u16,
    },
}
