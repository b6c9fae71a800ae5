use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::Parser;

use footbot::{
    auth,
    bot::Bot,
    conf,
    data::Storage,
    entitlement::{self, Plan},
    monitor::Monitor,
    predict,
    provider::ApiFootball,
    server,
    telegram::Telegram,
};

#[derive(Parser, Debug)]
struct Cli {
    /// Working directory, with config and data files.
    #[clap(short, long, default_value = "data")]
    dir: PathBuf,

    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Subcommand, Debug)]
enum Cmd {
    /// Run the chat bot and the live monitor.
    Bot,
    /// Run the admin API.
    Server,
    /// Mint an admin API token.
    Jwt {
        uid: String,
        /// Seconds.
        ttl: f64,
        #[clap(long, default_value = auth::ADMIN)]
        role: String,
    },
    /// Change a user's plan.
    Plan {
        uid: i64,
        plan: Plan,
        /// Expire after this many days. Never, when absent.
        #[clap(long)]
        days: Option<u32>,
    },
    /// Stop including a user in broadcasts and stats.
    Deactivate { uid: i64 },
    /// Print bot-wide counters.
    Stats,
    /// Predict a fixture's outcome.
    Predict { fixture: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    human_panic_setup();
    let cli = Cli::parse();
    set_current_dir(&cli.dir)?;
    footbot::tracing::init()?;
    tracing::debug!(?cli, "Starting.");
    match cli.cmd {
        Cmd::Bot => run_bot().await,
        Cmd::Server => server::run().await,
        Cmd::Jwt { uid, ttl, role } => {
            let conf = conf::global();
            let claims = auth::Claims::new(
                &uid,
                &role,
                Duration::from_secs_f64(ttl),
                &conf.jwt,
            )?;
            let encoded: String = claims.to_str(&conf.jwt)?;
            println!("{encoded}");
            Ok(())
        }
        Cmd::Plan { uid, plan, days } => {
            let storage = Storage::connect().await?;
            let expires_at = days
                .map(|days| {
                    entitlement::expiry_after(chrono::Utc::now(), days)
                        .context(format!("Expiry out of range: {days} days"))
                })
                .transpose()?;
            if !storage.set_plan(uid, plan, expires_at).await? {
                bail!("No such user: {uid}");
            }
            let expires_at = expires_at
                .filter(|_| plan.is_paid())
                .map_or("never".to_string(), |t| t.to_rfc3339());
            println!("{uid}: {plan} (expires: {expires_at})");
            Ok(())
        }
        Cmd::Deactivate { uid } => {
            let storage = Storage::connect().await?;
            if !storage.deactivate(uid).await? {
                bail!("No such user: {uid}");
            }
            println!("{uid}: deactivated");
            Ok(())
        }
        Cmd::Stats => {
            let stats = Storage::connect().await?.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Cmd::Predict { fixture } => {
            let conf = conf::global();
            let data = ApiFootball::new(&conf.provider)?;
            let prediction = predict::match_prediction(
                &data,
                fixture,
                conf.predict.form_matches,
                conf.predict.h2h_matches,
            )
            .await?
            .context(format!("No such fixture: {fixture}"))?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
            Ok(())
        }
    }
}

#[tracing::instrument(name = "bot", skip_all)]
async fn run_bot() -> anyhow::Result<()> {
    let conf = conf::global();
    tracing::info!(?conf, "Starting.");
    let storage = Storage::connect().await?;
    let data = Arc::new(ApiFootball::new(&conf.provider)?);
    let telegram = Arc::new(Telegram::new(&conf.telegram)?);
    let bot = Bot::new(
        storage.clone(),
        data.clone(),
        telegram.clone(),
        conf.clone(),
    );
    let monitor = Monitor::new(storage, data, telegram.clone(), conf);
    tokio::try_join!(telegram.run(&bot), monitor.run())?;
    Ok(())
}

fn set_current_dir(path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(path)
        .context(format!("Failed to create directory path: {path:?}"))?;
    env::set_current_dir(path)
        .context(format!("Failed to set current directory to {path:?}"))?;
    Ok(())
}

fn human_panic_setup() {
    macro_rules! repo {
        () => {
            env!("CARGO_PKG_REPOSITORY")
        };
    }
    human_panic::setup_panic!(human_panic::Metadata::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
    .authors(env!("CARGO_PKG_AUTHORS"))
    .homepage(repo!())
    .support(concat!("- Submit an issue at ", repo!(), "/issues")));
}
