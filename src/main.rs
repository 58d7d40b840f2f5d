use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use fatbox::FatBox;
use std::path::PathBuf;
use tracing::trace;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// A small filesystem living inside a single fixed-size file
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty container
    Create {
        #[arg(index = 1)]
        container: PathBuf,
    },
    /// Copy a file into the container
    Insert {
        #[arg(index = 1)]
        container: PathBuf,
        #[arg(index = 2)]
        file: PathBuf,
        /// Name to store the file under, defaults to its file name
        #[arg(short = 'n', long)]
        name: Option<String>,
    },
    /// Copy a file out of the container
    Get {
        #[arg(index = 1)]
        container: PathBuf,
        #[arg(index = 2)]
        name: String,
        /// Where to write the file, defaults to its name in the current directory
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Remove a file from the container
    #[command(visible_alias = "rm")]
    Remove {
        #[arg(index = 1)]
        container: PathBuf,
        #[arg(index = 2)]
        name: String,
    },
    /// List files, optionally filtered by `prefix+`, `+suffix` or an exact name
    #[command(visible_alias = "ls")]
    List {
        #[arg(index = 1)]
        container: PathBuf,
        #[arg(index = 2, default_value = "")]
        filter: String,
    },
    /// Show which file owns every block
    Blocks {
        #[arg(index = 1)]
        container: PathBuf,
    },
    /// Delete the container file
    Delete {
        #[arg(index = 1)]
        container: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
    trace!("Starting up fatbox cli");
    let fatbox = FatBox::default();
    match cli.command {
        Command::Create { container } => {
            fatbox
                .create(&container)
                .wrap_err("Failed to create container")?;
            println!("Container {} created", container.display());
        }
        Command::Insert {
            container,
            file,
            name,
        } => {
            let entry = fatbox
                .insert(&container, &file, name.as_deref())
                .wrap_err_with(|| format!("Failed to insert {}", file.display()))?;
            println!("{} inserted into container", entry.name);
        }
        Command::Get {
            container,
            name,
            output,
        } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&name));
            fatbox
                .get(&container, &name, &output)
                .wrap_err_with(|| format!("Failed to get {name}"))?;
            println!("{name} copied into {}", output.display());
        }
        Command::Remove { container, name } => {
            fatbox
                .remove(&container, &name)
                .wrap_err_with(|| format!("Failed to remove {name}"))?;
            println!("{name} removed from container");
        }
        Command::List { container, filter } => {
            let listing = fatbox
                .list(&container, &filter)
                .wrap_err("Failed to list container")?;
            print!("{listing}");
        }
        Command::Blocks { container } => {
            let map = fatbox
                .block_map(&container)
                .wrap_err("Failed to read the blocks table")?;
            print!("{map}");
        }
        Command::Delete { container } => {
            fatbox
                .delete(&container)
                .wrap_err("Failed to delete container")?;
            println!("Container {} deleted", container.display());
        }
    }
    Ok(())
}
