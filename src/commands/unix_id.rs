//! `infragraph unix-id`

use anyhow::Result;

use crate::app::App;
use crate::cli::UnixIdCommand;

pub fn run(app: &App, cmd: UnixIdCommand) -> Result<()> {
    match cmd {
        UnixIdCommand::Next { count } => {
            let allocator = app.uid_allocator()?;
            for _ in 0..count.max(1) {
                println!("{}", allocator.get_next_available_id()?);
            }
            Ok(())
        }
    }
}
