use std::io::Write;
use std::path::Path;

use dumbcas_core::commands::archive::{self, ArchiveRequest};
use dumbcas_core::stats::StatsSnapshot;

use crate::signal;

pub(crate) fn run(
    to_archive: &str,
    out: &str,
    comment: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = signal::cancel_token();

    // Interim lines redraw in place; the final summary gets its own line.
    let mut print_progress = |snap: &StatsSnapshot| {
        print!("\r{}", snap.progress_line());
        let _ = std::io::stdout().flush();
    };

    let outcome = archive::run(
        &ArchiveRequest {
            root: Path::new(out),
            to_archive: Path::new(to_archive),
            comment,
        },
        &cancel,
        Some(&mut print_progress),
    )?;

    println!("{}", outcome.stats.progress_line());
    if outcome.stats.errors != 0 {
        return Err(format!("got {} errors", outcome.stats.errors).into());
    }
    Ok(())
}
