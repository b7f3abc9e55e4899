//! Open command: where a rule is defined.

use anyhow::{Context, Result};
use rudi_debug_core::RuleId;

use crate::session::Session;

/// Print `file:line` of the rule, ready for an editor.
pub fn execute(session: &Session, rule: i32) -> Result<()> {
    let model = session
        .current_model()
        .context("No compiled rules; run the rule compiler first")?;
    let (file, line) = model.open_rule(RuleId(rule))?;
    println!("{}:{}", file.display(), line);
    Ok(())
}
