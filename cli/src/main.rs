use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use mued::config::Config;
use mued::error::AppResult;
use mued::model::entity::{LessonSlot, LessonSlotCreate, UserEntity, UserEntityCreateUpdate};
use mued::model::{CrudRepository, DatabaseError, DbConnection, ModelManager};
use mued::payments::{ExecutorSettings, PaymentExecutor, gateway_from_config};
use mued::web::{AuthenticatedUser, UserRole};

#[derive(Parser, Debug)]
#[command(about = "Maintenance tool for the MUED database", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage accounts
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Manage lesson slots
    Slot {
        #[command(subcommand)]
        action: SlotCommands,
    },

    /// Deferred lesson charges
    Payments {
        #[command(subcommand)]
        action: PaymentCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    Add {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "student", value_parser = ["student", "mentor", "admin"])]
        role: String,
    },
    SetRole {
        #[arg(long)]
        username: String,
        #[arg(long, value_parser = ["student", "mentor", "admin"])]
        role: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SlotCommands {
    Add {
        /// Username of the mentor offering the slot
        #[arg(long)]
        mentor: String,
        /// RFC 3339, e.g. 2025-03-01T18:00:00Z
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long, default_value_t = 60)]
        minutes: i64,
        /// Minor currency units
        #[arg(long)]
        price: i64,
        #[arg(long, default_value_t = 1)]
        capacity: i32,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PaymentCommands {
    /// Charge every approved lesson inside the charge window, like the cron endpoint does
    Execute,
}

async fn user_by_name(mm: &ModelManager, actor: &AuthenticatedUser, username: &str) -> AppResult<UserEntity> {
    let user = UserEntity::find_by_username(mm, actor, username)
        .await?
        .ok_or(DatabaseError::NotFound)?;
    Ok(user)
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    let config = Config::get_or_init(cfg!(debug_assertions)).await;
    let database_uri =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.app().database_uri().to_string());
    let mm = ModelManager::new(DbConnection::connect(&database_uri)?);
    let actor = AuthenticatedUser::admin();

    match args.command {
        Commands::User { action } => match action {
            UserCommands::Add { username, password, email, role } => {
                let user = UserEntity::create(
                    &mm,
                    &actor,
                    UserEntityCreateUpdate {
                        username,
                        password_hash: mued::auth::hash_password(&password)?,
                        email,
                        role: UserRole::from(role.as_str()),
                    },
                )
                .await?;
                println!("User created: {:?}", user);
            }
            UserCommands::SetRole { username, role } => {
                let user = user_by_name(&mm, &actor, &username)
                    .await?
                    .set_role(&mm, UserRole::from(role.as_str()))
                    .await?;
                println!("Role updated: {} is now {}", user.username(), user.role());
            }
        },

        Commands::Slot { action } => match action {
            SlotCommands::Add { mentor, start, minutes, price, capacity, tags } => {
                let mentor = user_by_name(&mm, &actor, &mentor).await?;
                let slot = LessonSlot::create(
                    &mm,
                    &actor,
                    LessonSlotCreate {
                        mentor_id: mentor.id(),
                        start_time: start,
                        end_time: start + Duration::minutes(minutes),
                        price,
                        max_capacity: capacity,
                        tags,
                        recurring_id: None,
                    },
                )
                .await?;
                println!("Slot created: {:?}", slot);
            }
        },

        Commands::Payments { action } => match action {
            PaymentCommands::Execute => {
                let gateway = gateway_from_config(config.stripe())?;
                let settings = ExecutorSettings::from_config(config.payments());
                let report = PaymentExecutor::new(mm, gateway, settings)
                    .execute_due(Utc::now())
                    .await?;
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(_) => println!("{:?}", report),
                }
            }
        },
    }

    Ok(())
}
