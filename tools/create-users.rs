//! Interactive provisioning for the `USERS` credential map.
//!
//! Reads username/password pairs from stdin until `done`, then prints the
//! `USERS=` line for the environment and writes `users_config.json`.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use common_auth::hash_password;
use indexmap::IndexMap;

const OUTPUT_FILE: &str = "users_config.json";
const DONE: &str = "done";

fn main() -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let users = collect_users(&mut stdin.lock(), &mut stdout.lock())?;

    if users.is_empty() {
        println!("No users entered; nothing written.");
        return Ok(());
    }

    let compact = serde_json::to_string(&users)?;
    println!();
    println!("Add this line to your environment:");
    println!("USERS={compact}");

    write_config(Path::new(OUTPUT_FILE), &users)?;
    println!();
    println!("Saved {} user(s) to {OUTPUT_FILE}", users.len());
    Ok(())
}

fn collect_users<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
) -> Result<IndexMap<String, String>> {
    let mut users = IndexMap::new();
    writeln!(out, "Enter users for the infographics API (type '{DONE}' to finish).")?;

    loop {
        let Some(username) = prompt(input, out, "Username: ")? else {
            break;
        };
        if username.eq_ignore_ascii_case(DONE) {
            break;
        }
        if username.is_empty() {
            writeln!(out, "Username cannot be empty.")?;
            continue;
        }
        if users.contains_key(&username) {
            writeln!(out, "User '{username}' already exists.")?;
            continue;
        }

        let Some(password) = prompt(input, out, "Password: ")? else {
            break;
        };
        if password.is_empty() {
            writeln!(out, "Password cannot be empty.")?;
            continue;
        }

        users.insert(username.clone(), hash_password(&password));
        writeln!(out, "Added '{username}'.")?;
    }

    Ok(users)
}

/// `None` on end of input.
fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, label: &str) -> Result<Option<String>> {
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn write_config(path: &Path, users: &IndexMap<String, String>) -> Result<()> {
    let pretty = serde_json::to_string_pretty(users)?;
    fs::write(path, pretty).with_context(|| format!("failed to write {}", path.display()))
}
