use std::path::PathBuf;

use clap::Parser;

/// Create a container from a bundle and run its process to completion.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the bundle directory, containing the config file and root filesystem.
    #[clap(short, long, default_value = ".")]
    pub bundle: PathBuf,
    /// Name of the config file inside the bundle directory.
    #[clap(short = 'f', long, default_value = "config.json")]
    pub config: String,
    /// Name of the container instance to run.
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub container_id: String,
}
