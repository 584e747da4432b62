//! Renders `stagehand.1` and one `stagehand-<subcommand>.1` page per
//! subcommand into `OUT_DIR`.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let mut command = Cli::command();
    command.build();
    render_page(&out_dir, command.clone())?;
    for subcommand in command.get_subcommands() {
        let page_name = format!("{}-{}", command.get_name(), subcommand.get_name());
        render_page(&out_dir, subcommand.clone().name(page_name))?;
    }
    Ok(())
}

fn render_page(out_dir: &Path, page: clap::Command) -> io::Result<()> {
    let path = out_dir.join(format!("{}.1", page.get_name()));
    let mut buffer = Vec::new();
    Man::new(page).render(&mut buffer)?;
    fs::write(path, buffer)
}
