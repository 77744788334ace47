mod commands;
mod config;
mod console;

use anyhow::{Context, bail};
use chatline_client::{AuthService, ChatRepository};
use chatline_db::Database;
use tracing::info;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the console
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatline=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let db = Database::open(&config.db_path)?;
    let repo = ChatRepository::new(config.transport());

    let events = match (db.token()?, db.username()?) {
        (Some(token), Some(username)) => {
            info!("Resuming session for {}", username);
            repo.connect_with_token(&config.server_url, &username, &token)?
        }
        _ => {
            let (Some(username), Some(password)) = (&config.username, &config.password) else {
                bail!("no stored session: set CHATLINE_USERNAME and CHATLINE_PASSWORD");
            };

            let auth = AuthService::new(&config.server_url)?;
            let result = if config.register {
                auth.register(username, password).await
            } else {
                auth.login(username, password).await
            };
            let account = result.context("authentication failed")?;

            db.save_token(&account.token)?;
            db.save_user_info(account.user_id, &account.username)?;
            repo.connect_with_token(&config.server_url, &account.username, &account.token)?
        }
    };

    console::run(repo, db, events).await
}
