//! Man page generation.

use std::path::Path;

use crate::cli::ManArgs;
use crate::error::CliError;

pub fn handle(args: &ManArgs, cmd: &clap::Command) -> Result<(), CliError> {
    std::fs::create_dir_all(&args.out_dir)?;
    let written = write_pages(cmd, &args.out_dir)?;
    for path in written {
        println!("{path}");
    }
    Ok(())
}

/// `busmod.1` plus one page per visible subcommand, named `busmod-<sub>.1`.
fn write_pages(cmd: &clap::Command, dir: &Path) -> Result<Vec<String>, CliError> {
    let name = cmd.get_name().to_owned();
    let path = dir.join(format!("{name}.1"));

    let mut page = Vec::new();
    clap_mangen::Man::new(cmd.clone()).render(&mut page)?;
    std::fs::write(&path, page)?;

    let mut written = vec![path.display().to_string()];
    for sub in cmd.get_subcommands().filter(|sub| !sub.is_hide_set()) {
        let sub = sub.clone().name(format!("{name}-{}", sub.get_name()));
        written.extend(write_pages(&sub, dir)?);
    }
    Ok(written)
}
