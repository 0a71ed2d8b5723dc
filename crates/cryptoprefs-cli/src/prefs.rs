use std::io::Write;

use color_eyre::{eyre::eyre, Result};
use cryptoprefs_core::{CryptoPrefs, PrefsStore, Scalar, ScalarKind};
use tracing::info;

use crate::cli::Command;

const HEALTH_PROBE_KEY: &str = "cryptoprefs/health-probe";

/// Execute a preference subcommand against `prefs`, writing results to `out`.
pub async fn handle<S, W>(
    cmd: Command,
    prefs: &CryptoPrefs<S>,
    default_kind: ScalarKind,
    out: &mut W,
) -> Result<()>
where
    S: PrefsStore,
    W: Write,
{
    match cmd {
        Command::Get { key, default, kind } => {
            let kind = resolve_kind(kind.as_deref(), default_kind)?;
            let default = Scalar::decode(&default, kind)?;
            let value = prefs.get_scalar(&key, default).await?;
            writeln!(out, "{value}")?;
        }
        Command::Put { key, value, kind } => {
            let kind = resolve_kind(kind.as_deref(), default_kind)?;
            prefs.put_scalar(&key, &Scalar::decode(&value, kind)?).await?;
        }
        Command::Queue { assignments, kind } => {
            let kind = resolve_kind(kind.as_deref(), default_kind)?;
            // Parse everything before queueing so a bad value leaves nothing half-queued.
            let parsed = assignments
                .into_iter()
                .map(|(key, raw)| -> Result<(String, Scalar)> {
                    Ok((key, Scalar::decode(&raw, kind)?))
                })
                .collect::<Result<Vec<_>>>()?;
            for (key, value) in &parsed {
                prefs.queue_scalar(key, value).await;
            }
            prefs.apply().await?;
            info!(count = parsed.len(), "applied queued writes");
            writeln!(out, "Applied {} queued write(s)", parsed.len())?;
        }
        Command::Remove { key } => prefs.remove(&key).await?,
        Command::Erase { yes } => {
            if !yes {
                color_eyre::eyre::bail!("refusing to erase without --yes");
            }
            prefs.erase().await?;
            writeln!(out, "Erased all preferences")?;
        }
        Command::List => {
            let entries = prefs.all_prefs_list().await?;
            if entries.is_empty() {
                writeln!(
                    out,
                    "No preferences yet. Add one with `cryptoprefs put <key> <value>`."
                )?;
            }
            for (key, value) in entries {
                writeln!(out, "{key} = {value}")?;
            }
        }
        Command::Health => {
            run_store_health(prefs).await?;
            writeln!(out, "Storage: ok")?;
        }
        other => return Err(eyre!("not a preference command: {other:?}")),
    }
    Ok(())
}

fn resolve_kind(name: Option<&str>, fallback: ScalarKind) -> Result<ScalarKind> {
    match name {
        Some(name) => Ok(ScalarKind::from_name(name)?),
        None => Ok(fallback),
    }
}

/// Round-trips a probe through the store, then removes it.
async fn run_store_health<S: PrefsStore>(prefs: &CryptoPrefs<S>) -> Result<()> {
    prefs.put(HEALTH_PROBE_KEY, true).await?;
    let round_trip = prefs.get(HEALTH_PROBE_KEY, false).await?;
    prefs.remove(HEALTH_PROBE_KEY).await?;

    if !round_trip {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}
