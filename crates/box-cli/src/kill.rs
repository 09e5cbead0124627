use clap::Parser;

/// Send a signal to a container's init process. Defaults to `SIGTERM`.
#[derive(Parser, Debug)]
pub struct KillArgs {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub container_id: String,
    /// Signal name (e.g. `SIGKILL`) or number.
    pub signal: Option<String>,
}
