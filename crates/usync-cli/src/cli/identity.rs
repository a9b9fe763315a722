//! The acting user for this installation.
//!
//! The core treats identity as an explicit parameter; the CLI persists one
//! under the config dir (`identity.toml`: a user id plus the secret that
//! seals folder keys at rest) and passes it on every call.

use anyhow::{Context, Result};
use rand::RngCore;
use std::fs;

use usync_core::Actor;

pub fn load_or_create() -> Result<Actor> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("usync")?;
    let path = xdg_dirs.place_config_file("identity.toml")?;

    if path.exists() {
        let data = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        return parse(&data).with_context(|| format!("parsing {}", path.display()));
    }

    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    let mut user_raw = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut user_raw);
    let user_id = format!("user-{}", hex::encode(user_raw));

    let contents = format!(
        "user_id = \"{user_id}\"\nsecret = \"{}\"\n",
        hex::encode(secret)
    );
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, &contents).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("created identity at {}", path.display());

    Ok(Actor::new(user_id, secret))
}

fn parse(data: &str) -> Result<Actor> {
    let mut user_id = None;
    let mut secret = None;
    for line in data.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "user_id" => user_id = Some(value.to_string()),
            "secret" => secret = Some(value.to_string()),
            _ => {}
        }
    }
    let user_id = user_id.context("identity missing user_id")?;
    let secret_hex = secret.context("identity missing secret")?;
    let raw = hex::decode(secret_hex).context("identity secret is not hex")?;
    let secret: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("identity secret must be 32 bytes"))?;
    Ok(Actor::new(user_id, secret))
}
