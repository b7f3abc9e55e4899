//! Show command: the rule tree with logging states and compile results.

use anyhow::Result;
use rudi_debug_core::{DiagnosticMap, NodeId, RuleModel, SyncStatus};

use crate::session::Session;

pub fn execute(session: &Session, files: bool) -> Result<()> {
    let Some(model) = session.current_model() else {
        println!(
            "No compiled rules: {} does not exist",
            session.location_file().display()
        );
        return Ok(());
    };

    print_node(model, model.root(), 0);
    println!();
    println!("Outcome:  {}", model.compilation_outcome());
    println!("Sources:  {}", status_text(session.hierarchy().status()));

    print_diagnostics(model, "error", model.error_infos());
    print_diagnostics(model, "warning", model.warn_infos());
    print_diagnostics(model, "parse failure", model.parsing_failures());

    let modified = session.hierarchy().modified_files();
    if !modified.is_empty() {
        println!();
        println!("Modified since last compile:");
        for path in modified {
            println!("  {}", path.display());
        }
    }

    if files {
        println!();
        println!("Files:");
        let mut nodes: Vec<_> = session.hierarchy().iter().filter(|n| !n.is_folder()).collect();
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        for node in nodes {
            let flag = if node.modified { "*" } else { " " };
            println!("  [{}]{} {}", node.usage.symbol(), flag, node.path.display());
        }
    }
    Ok(())
}

fn print_node(model: &RuleModel, id: NodeId, depth: usize) {
    let node = model.node(id);
    let indent = "  ".repeat(depth);
    match node.rule_id() {
        Some(rule) => println!(
            "{indent}[{}] {} #{rule} ({})",
            node.state().symbol(),
            node.label,
            node.state()
        ),
        None => println!("{indent}[{}] {}/", node.state().symbol(), node.label),
    }
    for child in model.children(id) {
        print_node(model, *child, depth + 1);
    }
}

fn print_diagnostics(model: &RuleModel, kind: &str, map: &DiagnosticMap) {
    for (import, diagnostics) in map {
        let file = model
            .source_file(*import)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| model.node(*import).label.clone());
        for d in diagnostics {
            println!("{kind}: {file}:{}:{}: {}", d.line, d.column, d.message);
        }
    }
}

pub fn status_text(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Unknown => "unknown",
        SyncStatus::Synced => "in sync",
        SyncStatus::OutOfSync => "out of sync (recompile needed)",
    }
}
