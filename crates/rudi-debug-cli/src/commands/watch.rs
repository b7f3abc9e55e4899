//! Watch command: follow source edits, recompiles and a live runtime.
//!
//! Runs until Ctrl-C. The session is the only owner of the model; the
//! filesystem watcher thread and the socket tasks only send messages into
//! this loop.

use anyhow::Result;
use rudi_debug_core::{LoggingState, ProjectWatcher, RuleModel};
use rudi_debug_sync::{ConnectionState, LogBatch, LogBatcher, RuntimeClient};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::show::status_text;
use crate::config::Config;
use crate::session::Session;

pub async fn execute(config: &Config, connect: bool) -> Result<()> {
    let mut session = Session::open(config)?;
    let mut rebuilt = session.subscribe();
    print_summary(&session);

    let (batch_tx, mut batches) = mpsc::unbounded_channel();
    let watcher = ProjectWatcher::spawn(
        &config.rule_source_root,
        &config.location_file(),
        config.watch_debounce(),
        move |batch| {
            // The receiver only goes away on shutdown.
            let _ = batch_tx.send(batch);
        },
    )?;

    let mut client = RuntimeClient::new(config.connect_timeout());
    let mut connection = client.state_changes();
    let mut logs = client
        .take_inbound()
        .map(|rx| LogBatcher::new(rx, config.batch_window()));

    if connect {
        try_connect(&mut client, &mut session, &config.runtime_address).await;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,

            Some(batch) = batches.recv() => {
                match session.apply_batch(&batch) {
                    Ok(true) => {}
                    Ok(false) => {
                        let status = session.hierarchy().status();
                        println!("sources: {}", status_text(status));
                    }
                    Err(e) => eprintln!("Rebuild failed: {e:#}"),
                }
            }

            Ok(replaced) = rebuilt.recv() => {
                debug!(version = replaced.version, "Model replaced");
                print_summary(&session);
                if client.is_connected() {
                    match session.current_model_mut() {
                        Some(model) => {
                            if let Err(e) = client.model_replaced(model) {
                                warn!(error = %e, "Could not attach to the rebuilt model");
                            }
                        }
                        None => client.close(),
                    }
                } else if connect && replaced.present {
                    try_connect(&mut client, &mut session, &config.runtime_address).await;
                }
            }

            Some(batch) = next_logs(&mut logs) => {
                if let Some(model) = session.current_model_mut() {
                    print_logs(model, batch);
                }
            }

            Ok(()) = connection.changed() => {
                let state = *connection.borrow_and_update();
                println!("runtime: {state}");
                if state == ConnectionState::Disconnected && client.peer().is_some() {
                    match session.current_model_mut() {
                        Some(model) => client.disconnect(model),
                        None => client.close(),
                    }
                }
            }
        }
    }

    info!("Shutting down");
    match session.current_model_mut() {
        Some(model) => client.disconnect(model),
        None => client.close(),
    }
    watcher.stop();
    let path = session.save_session()?;
    println!("Session saved to {}", path.display());
    Ok(())
}

async fn try_connect(client: &mut RuntimeClient, session: &mut Session, addr: &str) {
    let Some(model) = session.current_model_mut() else {
        println!("runtime: waiting for a compiled model before connecting");
        return;
    };
    if let Err(e) = client.connect(addr, model).await {
        eprintln!("runtime: {e}");
    }
}

async fn next_logs(logs: &mut Option<LogBatcher>) -> Option<LogBatch> {
    match logs {
        Some(batcher) => batcher.next_batch().await,
        None => std::future::pending().await,
    }
}

fn print_summary(session: &Session) {
    match session.current_model() {
        Some(model) => println!(
            "[v{}] {}: {} rules, compile {}, sources {}",
            session.version(),
            model.root_label(),
            model.rule_count(),
            model.compilation_outcome(),
            status_text(session.hierarchy().status())
        ),
        None => println!(
            "[v{}] no compiled rules at {}",
            session.version(),
            session.location_file().display()
        ),
    }
}

fn print_logs(model: &mut RuleModel, batch: LogBatch) {
    for pushed in batch.states {
        if let Err(e) = model.set_rule_state(pushed.rule, pushed.state) {
            warn!(rule = %pushed.rule, error = %e, "Ignoring state from runtime");
        }
    }
    for log in batch.logs {
        let Some(node) = model.rule(log.rule) else {
            warn!(rule = %log.rule, "Log for a rule that is not in the model");
            continue;
        };
        let state = model.state(node);
        if state == LoggingState::Never {
            continue;
        }
        let path = model.label_path(node).join("/");
        for evaluation in &log.evaluations {
            if let Some(line) = evaluation_line(state, evaluation) {
                println!("{path} #{}: {line}", log.rule);
            }
        }
    }
}

/// Outcome first, then the base-term values in brackets.
fn evaluation_line(state: LoggingState, evaluation: &[bool]) -> Option<String> {
    let (&outcome, terms) = evaluation.split_first()?;
    if !state.shows(outcome) {
        return None;
    }
    let terms: Vec<&str> = terms.iter().map(|t| if *t { "t" } else { "f" }).collect();
    Some(if terms.is_empty() {
        outcome.to_string()
    } else {
        format!("{outcome} [{}]", terms.join(" "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_line_filters_on_outcome() {
        assert_eq!(
            evaluation_line(LoggingState::IfFalse, &[false, true, false]).as_deref(),
            Some("false [t f]")
        );
        assert_eq!(evaluation_line(LoggingState::IfFalse, &[true, false]), None);
        assert_eq!(evaluation_line(LoggingState::Always, &[true]).as_deref(), Some("true"));
        assert_eq!(evaluation_line(LoggingState::Always, &[]), None);
    }
}
