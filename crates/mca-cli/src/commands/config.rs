//! Config commands - show the merged configuration and where it came from.

use serde_json::json;

use super::{HostContext, print_json};
use crate::theme::Theme;

pub(crate) fn show(host: &HostContext) -> anyhow::Result<()> {
    if host.is_json() {
        return print_json(host.config());
    }

    println!("{}", Theme::header("Effective configuration"));
    println!("{}", Theme::separator());
    print!("{}", toml::to_string_pretty(host.config())?);
    println!("{}", Theme::separator());
    paths(host);
    Ok(())
}

pub(crate) fn paths(host: &HostContext) {
    let resolved = host.resolved();
    if host.is_json() {
        let doc = json!({
            "loaded_files": resolved.loaded_files,
            "env_overrides": resolved.env_overrides,
        });
        println!("{doc:#}");
        return;
    }

    if resolved.loaded_files.is_empty() {
        println!("{}", Theme::info("Using built-in defaults only"));
    }
    for file in &resolved.loaded_files {
        println!("  {}", Theme::dimmed(file));
    }
    if resolved.env_overrides > 0 {
        println!(
            "{}",
            Theme::info(&format!("{} environment override(s)", resolved.env_overrides))
        );
    }
}
