//! Snapshot commands: named logging setups.

use std::time::SystemTime;

use anyhow::Result;

use crate::session::Session;

pub fn save(session: &mut Session, name: &str) -> Result<()> {
    let path = session.save_snapshot(name)?;
    println!("Saved snapshot '{name}' to {}", path.display());
    Ok(())
}

pub fn apply(session: &mut Session, name: &str) -> Result<()> {
    if session.apply_snapshot(name)? {
        session.save_session()?;
        println!("Applied snapshot '{name}'");
    } else {
        println!("Snapshot '{name}' does not match the compiled rules");
    }
    Ok(())
}

pub fn list(session: &Session) -> Result<()> {
    let recent = session.store().recent()?;
    if recent.is_empty() {
        println!("No snapshots in {}", session.store().dir().display());
        return Ok(());
    }
    for info in recent {
        println!("{:<24} {}", info.name, age(info.modified));
    }
    Ok(())
}

fn age(modified: SystemTime) -> String {
    let secs = SystemTime::now()
        .duration_since(modified)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}
