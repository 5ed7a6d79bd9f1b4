use std::time::Duration;

use quire_core::auth::{login_interactive, LoopbackServer};

use crate::app::App;
use crate::cli::AuthCommands;
use crate::commands::common::format_sync_timestamp;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, app: &App) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { timeout } => run_login(Duration::from_secs(timeout), app).await,
        AuthCommands::Status => run_status(app),
        AuthCommands::Logout => run_logout(app),
    }
}

async fn run_login(timeout: Duration, app: &App) -> Result<(), CliError> {
    let ctx = app.sync_context().await?;
    let loopback = LoopbackServer::new(app.config().loopback_port);

    let result = login_interactive(
        &ctx.oauth,
        &loopback,
        &ctx.session,
        &app.credentials(),
        timeout,
        |url| {
            println!("Open this URL in your browser to sign in:\n\n  {url}\n");
            println!("Waiting for the browser to redirect back...");
        },
    )
    .await;
    ctx.close().await;

    match result? {
        Some(profile) => println!("Signed in as {}", profile.email),
        None => println!("Signed in"),
    }
    Ok(())
}

fn run_status(app: &App) -> Result<(), CliError> {
    let credentials = app.credentials();
    let Some(token) = credentials.load_token()? else {
        println!("Not signed in.");
        return Ok(());
    };

    let who = credentials
        .load_profile()?
        .map_or_else(|| "(unknown account)".to_string(), |profile| profile.email);
    let expiry = format_sync_timestamp(token.expires_at.saturating_mul(1000));
    if token.is_expired() {
        println!("Signed in as {who}; access token expired at {expiry} (refreshes on next sync)");
    } else {
        println!("Signed in as {who}; access token valid until {expiry}");
    }
    Ok(())
}

fn run_logout(app: &App) -> Result<(), CliError> {
    let credentials = app.credentials();
    if !credentials.is_authenticated()? {
        println!("Not signed in.");
        return Ok(());
    }
    credentials.clear()?;
    println!("Signed out");
    Ok(())
}
