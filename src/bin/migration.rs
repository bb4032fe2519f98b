use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sea_orm_migration::MigratorTrait;
use stockroom::{config, db, migrator::Migrator};
use tracing::info;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Direction {
    Up,
    Down,
}

#[derive(Parser)]
#[command(name = "migration", about = "Apply or roll back the stockroom schema")]
struct Cli {
    #[arg(value_enum, default_value = "up")]
    direction: Direction,
    /// Number of migrations to apply or roll back; all when omitted.
    #[arg(long)]
    steps: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    info!("Starting database migration");
    let pool = db::establish_connection_from_app_config(&config)
        .await
        .context("failed to connect to database")?;

    match cli.direction {
        Direction::Up => Migrator::up(&pool, cli.steps)
            .await
            .context("failed to apply migrations")?,
        Direction::Down => Migrator::down(&pool, cli.steps)
            .await
            .context("failed to roll back migrations")?,
    }

    db::close_pool(pool).await?;
    info!(direction = ?cli.direction, "Migration completed successfully");
    Ok(())
}
