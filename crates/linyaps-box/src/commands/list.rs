//! `list` subcommand (spec §6 "list"). Grounded on `youki::commands::list`'s
//! `tabwriter`-based table output, with JSON added per `box_cli::ListFormat`.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use box_cli::{ListArgs, ListFormat};
use box_container::status::StatusDirectory;
use box_container::Orchestrator;
use tabwriter::TabWriter;

pub fn list(args: ListArgs, root: &Path) -> Result<()> {
    let status_dir = StatusDirectory::open(root)?;
    let orchestrator = Orchestrator::for_existing("", status_dir);
    let records = orchestrator.list()?;

    match args.format {
        ListFormat::Table => print_table(&records)?,
        ListFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
    }
    Ok(())
}

fn print_table(records: &[box_container::status::StatusRecord]) -> Result<()> {
    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(tw, "ID\tPID\tSTATUS\tBUNDLE\tCREATED\tOWNER")?;
    for r in records {
        writeln!(tw, "{}\t{}\t{}\t{}\t{}\t{}", r.id, r.pid, r.status, r.bundle.display(), r.created, r.owner)?;
    }
    tw.flush()?;
    Ok(())
}
