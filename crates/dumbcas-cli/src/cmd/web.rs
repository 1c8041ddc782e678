use std::path::Path;

use crate::signal;

pub(crate) fn run(root: &str, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = signal::cancel_token();
    dumbcas_core::commands::web::run(Path::new(root), port, cancel, None)?;
    Ok(())
}
