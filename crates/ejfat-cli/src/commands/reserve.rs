use std::collections::HashMap;

use anyhow::Context;

use ejfat_cp::reservation::{self, ClientStats};
use ejfat_cp::resolve::AddressFamily;
use ejfat_cp::time::epoch_secs;
use ejfat_cp::uri::legacy_string;

use crate::ControlPlaneArgs;

/// Print a URI result for capture by a shell. Failures print the
/// `error = ...` form and exit non-zero.
fn emit_uri(result: ejfat_cp::ClientResult<ejfat_cp::EjfatUri>) -> anyhow::Result<()> {
    println!("{}", legacy_string(&result));
    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

/// Expiry instant, in epoch seconds, of a reservation starting now.
fn reservation_end(lifetime: u64) -> anyhow::Result<i64> {
    i64::try_from(lifetime)
        .ok()
        .and_then(|secs| epoch_secs().checked_add(secs))
        .with_context(|| format!("lifetime of {lifetime}s is out of range"))
}

pub async fn reserve(cp: &ControlPlaneArgs, name: &str, lifetime: u64, ipv6: bool) -> anyhow::Result<()> {
    let until = reservation_end(lifetime)?;
    let result = reservation::reserve_uri(
        &cp.cp,
        cp.port,
        name,
        &cp.token,
        until,
        AddressFamily::from_ipv6_flag(ipv6),
    )
    .await;
    emit_uri(result)
}

pub async fn uri(cp: &ControlPlaneArgs, lb_id: &str, ipv6: bool) -> anyhow::Result<()> {
    let result = reservation::get_lb_uri(
        &cp.cp,
        cp.port,
        lb_id,
        &cp.token,
        AddressFamily::from_ipv6_flag(ipv6),
    )
    .await;
    emit_uri(result)
}

pub async fn free(cp: &ControlPlaneArgs, lb_id: &str) -> anyhow::Result<()> {
    reservation::free_load_balancer(&cp.cp, cp.port, lb_id, &cp.token).await?;
    println!("✓ Freed {lb_id}");
    Ok(())
}

pub async fn status(cp: &ControlPlaneArgs, lb_id: &str, format: &str) -> anyhow::Result<()> {
    let mut stats = HashMap::new();
    reservation::load_balancer_status(&cp.cp, cp.port, lb_id, &cp.token, &mut stats).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        _ => {
            print!("{}", format_status(lb_id, &stats));
        }
    }

    Ok(())
}

fn format_status(lb_id: &str, stats: &HashMap<String, ClientStats>) -> String {
    let mut names: Vec<&String> = stats.keys().collect();
    names.sort();

    let mut out = format!("{lb_id}: {} backend(s)\n", names.len());
    for name in names {
        out.push_str(&format!("{name}\n"));
        out.push_str(&stats[name].describe("  "));
    }
    out
}
