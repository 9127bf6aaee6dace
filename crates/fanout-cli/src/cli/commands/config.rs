//! `fanout config` – show where the config lives and what it resolves to.

use anyhow::{Context, Result};
use fanout_core::config;

pub fn run_show_config() -> Result<()> {
    let path = config::config_path()?;
    let cfg = config::load_or_init()?;
    let rendered = toml::to_string_pretty(&cfg).context("render config")?;
    println!("# {}", path.display());
    println!(
        "# effective max_queue = {}",
        cfg.parallel.effective_max_queue()
    );
    print!("{}", rendered);
    Ok(())
}
