//! Set command: change a logging state and remember it for the session.

use anyhow::{Context, Result};
use rudi_debug_core::LoggingState;

use crate::commands::resolve_target;
use crate::session::Session;

pub fn execute(session: &mut Session, target: &str, state: LoggingState) -> Result<()> {
    let model = session
        .current_model_mut()
        .context("No compiled rules; run the rule compiler first")?;
    let node = resolve_target(model, target)?;
    model.set_state(node, state)?;

    let root_state = model.state(model.root());
    let path = model.label_path(node).join("/");
    session.save_session()?;
    println!("{path}: {state} (root: {root_state})");
    Ok(())
}
