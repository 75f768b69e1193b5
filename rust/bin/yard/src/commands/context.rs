//! Context management commands.

use std::path::Path;

use anyhow::Result;

use crate::config::{default_data_dir, ClientConfig, Context};

/// Register a new context. The first one becomes current.
pub fn create(
    name: &str,
    server: Option<&str>,
    user: Option<&str>,
    data_dir: Option<&str>,
    client_config_path: &Path,
) -> Result<()> {
    let mut config = ClientConfig::load(client_config_path)?;
    if config.contexts.iter().any(|c| c.name == name) {
        anyhow::bail!("Context \"{}\" already exists.", name);
    }

    let data_dir = data_dir
        .map(str::to_string)
        .unwrap_or_else(|| default_data_dir(name).to_string_lossy().to_string());
    std::fs::create_dir_all(&data_dir)?;

    config.upsert_context(Context {
        name: name.to_string(),
        server: server.unwrap_or_default().trim_end_matches('/').to_string(),
        user: user.unwrap_or_default().to_string(),
        token: String::new(),
        data_dir: data_dir.clone(),
    });
    if config.current_context.is_empty() {
        config.current_context = name.to_string();
    }
    config.save(client_config_path)?;

    println!("Context \"{}\" created.", name);
    println!("  Data: {}", data_dir);
    Ok(())
}

pub fn list(client_config_path: &Path) -> Result<()> {
    let config = ClientConfig::load(client_config_path)?;

    if config.contexts.is_empty() {
        println!("No contexts configured.");
        println!("Run: yard context create <name>");
        return Ok(());
    }

    println!("{:2} {:20} {:12} {:40}", "", "NAME", "USER", "SERVER");
    for ctx in &config.contexts {
        let marker = if ctx.name == config.current_context { "*" } else { " " };
        let user = if ctx.user.is_empty() { "-" } else { &ctx.user };
        let server = if ctx.server.is_empty() { "-" } else { &ctx.server };
        println!("{:2} {:20} {:12} {:40}", marker, ctx.name, user, server);
    }
    Ok(())
}

pub fn use_context(name: &str, client_config_path: &Path) -> Result<()> {
    let mut config = ClientConfig::load(client_config_path)?;
    if !config.contexts.iter().any(|c| c.name == name) {
        anyhow::bail!("Context \"{}\" not found. Run `yard context list` to see available contexts.", name);
    }
    config.current_context = name.to_string();
    config.save(client_config_path)?;
    println!("Switched to context \"{}\".", name);
    Ok(())
}

/// Change properties of an existing context.
pub fn set(
    name: &str,
    server: Option<&str>,
    user: Option<&str>,
    token: Option<&str>,
    client_config_path: &Path,
) -> Result<()> {
    let mut config = ClientConfig::load(client_config_path)?;
    let Some(ctx) = config.get_mut(name) else {
        anyhow::bail!("Context \"{}\" not found.", name);
    };
    if let Some(server) = server {
        ctx.server = server.trim_end_matches('/').to_string();
    }
    if let Some(user) = user {
        ctx.user = user.to_string();
    }
    if let Some(token) = token {
        ctx.token = token.to_string();
    }
    config.save(client_config_path)?;
    println!("Context \"{}\" updated.", name);
    Ok(())
}

/// Forget a context. Its data directory is left on disk.
pub fn delete(name: &str, client_config_path: &Path) -> Result<()> {
    let mut config = ClientConfig::load(client_config_path)?;
    if !config.remove_context(name) {
        anyhow::bail!("Context \"{}\" not found.", name);
    }
    config.save(client_config_path)?;
    println!("Context \"{}\" deleted.", name);
    Ok(())
}
