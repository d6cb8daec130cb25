use pullsync::config::Config;
use pullsync::storage::{Database, SqliteSyncStorage, SyncStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::load()?;

    println!(
        "⚠️  WARNING: This will delete ALL sync identities from {}!",
        config.settings.database
    );
    println!("Records stay, but the next run will treat every source item as new.");
    println!("Type 'yes' to continue or anything else to cancel...");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    if input.trim() != "yes" {
        println!("Cancelled.");
        return Ok(());
    }

    println!("🗑️  Wiping sync storage...");
    let db = Database::open(&config.settings.database)?;
    SqliteSyncStorage::new(db).wipe().await?;

    println!("✅ Sync storage wiped successfully!");
    Ok(())
}
