//! `alertrelay info`: print the effective relay configuration.

use anyhow::Result;
use clap::Args;

use alertrelay_core::event::{WorldId, ZoneId};
use alertrelay_core::names;
use alertrelay_core::payload::UNKNOWN_NAME;

#[derive(Args)]
pub struct InfoArgs {
    /// Worlds subscribed upstream
    #[arg(long, env = "RELAY_WORLDS", value_delimiter = ',', default_value = "1,10,13,17,40")]
    pub worlds: Vec<String>,
    /// Zones whose alert starts are relayed
    #[arg(long, env = "RELAY_ZONES", value_delimiter = ',', default_value = "2,4,6,8")]
    pub zones: Vec<String>,
    /// Queue name
    #[arg(long, env = "QUEUE_NAME", default_value = "MetagameEvent")]
    pub queue_name: String,
    /// Push message time-to-live in seconds
    #[arg(long, env = "NOTIFICATION_TTL_SECS", default_value_t = 300)]
    pub ttl_secs: u64,
    /// VAPID public key browsers subscribe with
    #[arg(long, env = "PUBLICVAPIDKEY")]
    pub public_key: Option<String>,
}

pub fn run(args: InfoArgs) -> Result<()> {
    print!("{}", render(&args));
    Ok(())
}

fn render(args: &InfoArgs) -> String {
    let mut out = String::new();
    out.push_str(&format!("AlertRelay v{}\n\n", env!("CARGO_PKG_VERSION")));

    out.push_str("Worlds:\n");
    for id in &args.worlds {
        let id = WorldId::from(id.trim());
        let name = names::world_name(&id).unwrap_or(UNKNOWN_NAME);
        out.push_str(&format!("  {:<4} {}\n", id.as_str(), name));
    }

    out.push_str("\nRelayed continents:\n");
    for id in &args.zones {
        let id = ZoneId::from(id.trim());
        let name = names::zone_name(&id).unwrap_or(UNKNOWN_NAME);
        out.push_str(&format!("  {:<4} {}\n", id.as_str(), name));
    }

    out.push_str(&format!("\nQueue:             {}\n", args.queue_name));
    out.push_str(&format!("Notification TTL:  {}s\n", args.ttl_secs));
    match &args.public_key {
        Some(key) => out.push_str(&format!("applicationServerKey: {key}\n")),
        None => out.push_str("applicationServerKey: (PUBLICVAPIDKEY not set)\n"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(worlds: &[&str], zones: &[&str], key: Option<&str>) -> InfoArgs {
        InfoArgs {
            worlds: worlds.iter().map(|s| s.to_string()).collect(),
            zones: zones.iter().map(|s| s.to_string()).collect(),
            queue_name: "MetagameEvent".into(),
            ttl_secs: 300,
            public_key: key.map(str::to_string),
        }
    }

    #[test]
    fn names_resolved() {
        let out = render(&args(&["1", "40"], &["2", "8"], Some("BPubKey")));
        assert!(out.contains("Connery"));
        assert!(out.contains("SolTech"));
        assert!(out.contains("Indar"));
        assert!(out.contains("Esamir"));
        assert!(out.contains("applicationServerKey: BPubKey"));
    }

    #[test]
    fn unknown_ids_shown_as_unknown() {
        let out = render(&args(&["999"], &["96"], None));
        assert!(out.contains("999  Unknown"));
        assert!(out.contains("not set"));
    }
}
