//! Auth command handlers.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use panda_auth::client::BrowserAuthClient;
use panda_auth::client::browser::open_in_browser;
use panda_auth::config::Config;
use panda_auth::interrupt::{self, InterruptedError};
use panda_auth::provider::Domain;
use panda_auth::{Readable, SessionStore, SignInError, SignInParams};
use tracing::info;

fn session_store(config: &Config) -> SessionStore<BrowserAuthClient> {
    let client = BrowserAuthClient::from_config(config).with_opener(|url| {
        println!("To log in with Internet Identity:");
        println!();
        println!("  1. A browser window will open (or visit the URL below)");
        println!("  2. Authenticate with your identity provider");
        println!("  3. Return here once the browser says you are signed in");
        println!();
        println!("Authorization URL:");
        println!("  {url}");
        println!();
        println!("Waiting for the browser (Ctrl+C to cancel)...");
        open_in_browser(url)
    });
    SessionStore::new(client, config.clone())
}

/// Asks before replacing a session. Non-interactive input keeps it.
fn confirm_replace() -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    print!("Do you want to replace the existing session? [y/N] ");
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().lock().read_line(&mut response)?;
    Ok(response.trim().eq_ignore_ascii_case("y"))
}

pub async fn login(config: &Config, domain: Option<Domain>) -> Result<()> {
    let store = session_store(config);
    store.sync().await;

    let current = store.get();
    if current.is_authenticated() {
        println!("Already logged in as {}", current.identity.principal());
        if !confirm_replace()? {
            info!(principal = %current.identity.principal(), "kept existing session");
            println!("Login cancelled.");
            return Ok(());
        }
    }

    match store.sign_in(SignInParams { domain }).await {
        Ok(()) => {}
        Err(SignInError::Cancelled) if interrupt::is_interrupted() => {
            return Err(InterruptedError.into());
        }
        Err(err) => return Err(err).context("Login failed"),
    }

    println!();
    println!("✓ Logged in as {}", store.identity().principal());
    println!(
        "  Session saved to: {}",
        store.client().storage().path().display()
    );
    Ok(())
}

pub async fn logout(config: &Config) -> Result<()> {
    let store = session_store(config);
    store.sync().await;

    if !store.get().is_authenticated() {
        println!("Not logged in (no session found).");
        return Ok(());
    }

    store.sign_out().await;
    println!("✓ Logged out");
    println!(
        "  Session removed from: {}",
        store.client().storage().path().display()
    );
    Ok(())
}

pub async fn whoami(config: &Config) -> Result<()> {
    let store = session_store(config);
    store.sync().await;

    let identity = store.identity();
    match identity.delegation() {
        Some(delegated) => {
            println!("{}", delegated.principal);
            println!(
                "  Expires: {}",
                delegated.expires_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("  Provider: {}", delegated.provider);
        }
        None => println!("anonymous (not logged in)"),
    }
    Ok(())
}
