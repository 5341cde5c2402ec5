use std::{path::Path, sync::Arc};

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    gatekeeper_config::GatekeeperConfig,
    gatekeeper_reconcile::{Evaluation, StateMachine, derive_state, sinks_from_config},
    gatekeeper_registry::{PlayerRecord, PlayerRegistry, SqliteRegistry},
    serde_json::json,
};

#[derive(Subcommand)]
pub enum PlayerAction {
    /// List every player record with its derived verification state.
    List,
    /// Print one player record as JSON.
    Show { account_id: String },
    /// List session ids that no player record claimed.
    Unmapped,
    /// Run (or retry) the completion sequence for one account.
    Complete { account_id: String },
}

pub async fn handle_players(
    action: PlayerAction,
    config: &GatekeeperConfig,
    data_dir: Option<&Path>,
) -> Result<()> {
    let pool = crate::open_database(config, data_dir).await?;
    let registry: Arc<dyn PlayerRegistry> = Arc::new(SqliteRegistry::with_pool(pool.clone()));

    let result = match action {
        PlayerAction::List => list(registry.as_ref()).await,
        PlayerAction::Show { account_id } => show(registry.as_ref(), &account_id).await,
        PlayerAction::Unmapped => unmapped(registry.as_ref()).await,
        PlayerAction::Complete { account_id } => complete(config, registry, &account_id).await,
    };
    pool.close().await;
    result
}

fn summary_line(record: &PlayerRecord) -> String {
    format!(
        "{:<20} {:<16} {:<34} {}",
        record.account_id,
        derive_state(record),
        record.resolved_session_id().unwrap_or("-"),
        record.display_name.as_deref().unwrap_or("-"),
    )
}

async fn list(registry: &dyn PlayerRegistry) -> Result<()> {
    let players = registry.list_players().await?;
    if players.is_empty() {
        println!("No players.");
        return Ok(());
    }
    for record in &players {
        println!("{}", summary_line(record));
    }
    Ok(())
}

async fn show(registry: &dyn PlayerRegistry, account_id: &str) -> Result<()> {
    let Some(record) = registry.get_player(account_id).await? else {
        bail!("no player record for {account_id}");
    };
    let state = derive_state(&record);
    let out = json!({ "state": state, "record": record });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn unmapped(registry: &dyn PlayerRegistry) -> Result<()> {
    let sessions = registry.list_unmapped().await?;
    if sessions.is_empty() {
        println!("No unmapped sessions.");
        return Ok(());
    }
    for s in &sessions {
        println!(
            "{:<34} {:<24} {:<16} {}",
            s.session_id,
            s.display_name,
            s.last_ip.as_deref().unwrap_or("-"),
            s.last_seen.to_rfc3339(),
        );
    }
    Ok(())
}

async fn complete(
    config: &GatekeeperConfig,
    registry: Arc<dyn PlayerRegistry>,
    account_id: &str,
) -> Result<()> {
    if registry.get_player(account_id).await?.is_none() {
        bail!("no player record for {account_id}");
    }
    let machine = StateMachine::new(registry, sinks_from_config(&config.completion)?);
    match machine.evaluate(account_id).await? {
        Evaluation::NotReady(state) => println!("{account_id} is not complete yet ({state})."),
        Evaluation::AlreadyRewarded => println!("{account_id} was already rewarded."),
        Evaluation::Completed(event) => {
            println!(
                "{account_id} completed with session {}.",
                event.session_id
            );
        },
    }
    Ok(())
}
