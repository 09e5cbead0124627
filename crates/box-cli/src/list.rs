use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Table,
    Json,
}

/// List known containers.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format.
    #[clap(short, long, value_enum, default_value_t = ListFormat::Table)]
    pub format: ListFormat,
}
