//! `kiln config` command implementation.

use super::{diagnostic, load_config, ErrorJson};
use kiln_core::LoadedConfig;
use miette::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ConfigResultJson<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a LoadedConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    out_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

/// Print the resolved configuration.
pub fn run(config_path: &Path, json: bool) -> Result<()> {
    let loaded = match load_config(config_path) {
        Ok(loaded) => loaded,
        Err(err) => {
            if json {
                print(&ConfigResultJson {
                    ok: false,
                    config: None,
                    out_dir: None,
                    error: Some(ErrorJson::new(&err, None)),
                });
                std::process::exit(1);
            }
            return Err(diagnostic(&err, None));
        }
    };

    if json {
        print(&ConfigResultJson {
            ok: true,
            config: Some(&loaded),
            out_dir: Some(loaded.out_dir().display().to_string()),
            error: None,
        });
        return Ok(());
    }

    let config = &loaded.config;
    println!("name:       {}", config.name);
    println!("root:       {}", loaded.root.display());
    println!("entries:    {}", config.entry.join(", "));
    println!("output:     {}", loaded.out_dir().display());
    println!("  script:   {}", config.output.filename);
    println!("  style:    {}", config.output.style_filename);
    println!("  markup:   {}", config.output.markup_filename);
    println!("  static:   {}/{}", config.output.static_dir, config.output.asset_name);
    println!("  inject:   {}", config.output.inject);
    println!("extensions: {}", config.resolve.extensions.join(" "));
    for alias in &config.resolve.alias {
        println!("alias:      {} -> {}", alias.from, alias.to);
    }
    println!("rules:");
    for (index, rule) in config.rules.iter().enumerate() {
        let kind = rule.kind.map(|k| format!(" as {k}")).unwrap_or_default();
        println!("  {index}: /{}/ -> {}{kind}", rule.test, rule.capability);
    }
    match loaded.dev_port {
        Some(port) => println!("dev port:   {port} (${})", config.dev_server.port_env),
        None => println!("dev port:   unset (${})", config.dev_server.port_env),
    }
    Ok(())
}

fn print(value: &ConfigResultJson<'_>) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{out}"),
        Err(e) => eprintln!("error: failed to serialize output: {e}"),
    }
}
