use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use clipscribe::api::{self, ApiClient};
use clipscribe::app::{spawn_recorder, UiState};
use clipscribe::audio::LevelMeter;
use clipscribe::credentials;
use clipscribe::effects::CaptureEffectRunner;
use clipscribe::results::{self, ProcessMode};
use clipscribe::session::SessionContext;
use clipscribe::settings;
use clipscribe::source::AudioSource;
use clipscribe::staging::ActiveSourceSlot;
use clipscribe::state_machine::Event;

#[derive(Parser)]
#[command(
    name = "clipscribe",
    version,
    about = "Record or upload audio and send it to a transcription/diarization backend"
)]
struct Cli {
    /// Backend base URL (overrides the settings file)
    #[arg(long, env = "CLIPSCRIBE_SERVER", global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record from the microphone (p=pause, r=resume, s=stop, d=discard, q=quit)
    Record {
        /// Save the finalized clip as a WAV file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Submit the finalized clip: "transcribe" or "diarize"
        #[arg(long)]
        submit: Option<String>,
    },
    /// Upload an audio file for processing
    Upload {
        file: PathBuf,
        /// "transcribe" or "diarize"
        #[arg(long, default_value = "transcribe")]
        mode: String,
    },
    /// List past processing runs
    History,
    /// Fetch a stored result by id
    Result {
        id: i64,
        /// Also export the raw result as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        /// Also export the formatted result as Markdown
        #[arg(long)]
        markdown: Option<PathBuf>,
    },
    /// Log in and store the account's API key in the system keyring
    Login {
        /// Username or email
        identifier: String,
    },
    /// Register a new account
    Register { username: String, email: String },
    /// End the current session
    Logout,
    /// Show the logged-in profile
    Profile,
    /// User administration (admin accounts only)
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    /// List all users
    Users,
    /// Activate a user's API key
    Activate { user_id: i64 },
    /// Deactivate a user's API key
    Deactivate { user_id: i64 },
    /// Set a user's upload limit
    SetLimit { user_id: i64, limit: u64 },
    /// Delete a user and all related data
    Delete { user_id: i64 },
}

#[tokio::main]
async fn main() {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();
    env_logger::init();

    let cli = Cli::parse();
    let settings = settings::load_settings();
    let server = cli
        .server
        .clone()
        .unwrap_or_else(|| settings.server_url.clone());

    let client = match ApiClient::with_timeout(
        &server,
        Duration::from_secs(settings.request_timeout_secs),
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, client, settings).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run(
    command: Command,
    client: ApiClient,
    settings: settings::AppSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Record { output, submit } => {
            let mode = submit.map(|m| m.parse::<ProcessMode>()).transpose()?;
            record(client, settings, output, mode).await
        }
        Command::Upload { file, mode } => {
            let mode = mode.parse::<ProcessMode>()?;
            let mut session = establish_session(client).await;
            let key = resolve_upload_key(&mut session).await?;
            let result = api::upload::submit_file(session.client(), &key, &file, mode).await?;
            println!("{}", results::format_result(mode, &result));
            Ok(())
        }
        Command::History => {
            let session = establish_session(client).await;
            let entries = api::history::list(session.client()).await?;
            if entries.is_empty() {
                println!("No history yet.");
            }
            for e in entries {
                println!(
                    "{:>5}  {:<12} {:>8.1}s {:>10}B  {}  {}",
                    e.id,
                    e.mode.as_str(),
                    e.audio_duration,
                    e.size,
                    e.timestamp,
                    e.filename
                );
            }
            Ok(())
        }
        Command::Result { id, json, markdown } => {
            let session = establish_session(client).await;
            let stored = api::history::get_by_id(session.client(), id).await?;
            println!("{}", results::format_result(stored.mode, &stored.result));
            if let Some(path) = json {
                results::export_json(&stored.result, &path)?;
                println!("Wrote {}", path.display());
            }
            if let Some(path) = markdown {
                results::export_markdown(stored.mode, &stored.result, &path)?;
                println!("Wrote {}", path.display());
            }
            Ok(())
        }
        Command::Login { identifier } => {
            let password = prompt("Password: ")?;
            let mut session = SessionContext::new(client);
            let profile = session.login(&identifier, &password).await?;
            println!("Logged in as {} <{}>", profile.username, profile.email);
            if let Some(key) = &profile.api_key {
                credentials::set_api_key(Some(key))?;
                println!(
                    "API key stored in system keyring ({})",
                    credentials::masked_api_key().unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Register { username, email } => {
            let password = prompt("Password: ")?;
            let response = api::auth::register(
                &client,
                &api::auth::RegisterRequest {
                    username: username.clone(),
                    email,
                    password,
                },
            )
            .await?;
            println!("Registered {}.", username);
            if let Some(key) = response.api_key {
                credentials::set_api_key(Some(&key))?;
                println!(
                    "API key stored in system keyring ({})",
                    credentials::masked_api_key().unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Logout => {
            let mut session = establish_session(client).await;
            session.logout().await?;
            credentials::set_api_key(None)?;
            println!("Logged out.");
            Ok(())
        }
        Command::Profile => {
            let mut session = establish_session(client).await;
            let profile = session.refresh().await?;
            println!("username:      {}", profile.username);
            println!("email:         {}", profile.email);
            println!(
                "api key:       {}",
                profile
                    .api_key
                    .as_deref()
                    .map(mask_key)
                    .unwrap_or_else(|| "none".to_string())
            );
            println!("key active:    {}", profile.api_key_active);
            println!("upload limit:  {}", profile.upload_limit);
            println!("admin:         {}", profile.is_admin);
            Ok(())
        }
        Command::Admin { command } => {
            let session = establish_session(client).await;
            match command {
                AdminCommand::Users => {
                    for u in api::admin::list_users(session.client()).await? {
                        println!(
                            "{:>5}  {:<20} {:<30} key_active={} limit={} admin={}",
                            u.id, u.username, u.email, u.api_key_active, u.upload_limit, u.is_admin
                        );
                    }
                }
                AdminCommand::Activate { user_id } => {
                    api::admin::set_api_key_active(session.client(), user_id, true).await?;
                    println!("Activated API key for user {}", user_id);
                }
                AdminCommand::Deactivate { user_id } => {
                    api::admin::set_api_key_active(session.client(), user_id, false).await?;
                    println!("Deactivated API key for user {}", user_id);
                }
                AdminCommand::SetLimit { user_id, limit } => {
                    api::admin::set_upload_limit(session.client(), user_id, limit).await?;
                    println!("Upload limit for user {} set to {}", user_id, limit);
                }
                AdminCommand::Delete { user_id } => {
                    api::admin::delete_user(session.client(), user_id).await?;
                    println!("Deleted user {}", user_id);
                }
            }
            Ok(())
        }
    }
}

/// Interactive microphone recording driven by stdin commands.
async fn record(
    client: ApiClient,
    settings: settings::AppSettings,
    output: Option<PathBuf>,
    submit: Option<ProcessMode>,
) -> Result<(), Box<dyn std::error::Error>> {
    let slot = ActiveSourceSlot::new();
    let meter = LevelMeter::new();
    let level_rx = meter.subscribe();
    let runner = CaptureEffectRunner::new(meter, slot.clone(), settings);
    let (handle, mut ui_rx, loop_task) = spawn_recorder(runner);

    handle.send(Event::StartRequested)?;
    println!("Commands: p=pause  r=resume  s=stop  d=discard  q=quit");

    // stdin on its own thread; the state loop owns the async side.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            if stdin.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            if line_tx.send(line.trim().to_string()).is_err() {
                break;
            }
        }
    });

    let auto_finish = output.is_some() || submit.is_some();

    loop {
        tokio::select! {
            changed = ui_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let ui = ui_rx.borrow().clone();
                match &ui {
                    UiState::Idle { permission_denied: true } => {
                        println!("Microphone permission denied. Allow microphone access and retry.");
                        handle.shutdown();
                        break;
                    }
                    UiState::Recording { elapsed_secs } => {
                        println!(
                            "recording  {}  level {:>3.0}%",
                            format_elapsed(*elapsed_secs),
                            *level_rx.borrow() * 100.0
                        );
                    }
                    UiState::Paused { elapsed_secs } => {
                        println!("paused     {}", format_elapsed(*elapsed_secs));
                    }
                    UiState::Stopped { duration_secs, size_bytes } => {
                        println!(
                            "stopped    {} ({} bytes). d=discard, q=quit",
                            format_elapsed(*duration_secs),
                            size_bytes
                        );
                        if auto_finish {
                            handle.shutdown();
                            break;
                        }
                    }
                    _ => {}
                }
            }
            line = line_rx.recv() => {
                match line.as_deref() {
                    Some("p") => handle.send(Event::PauseRequested)?,
                    Some("r") => handle.send(Event::ResumeRequested)?,
                    Some("s") => handle.send(Event::StopRequested)?,
                    Some("d") => handle.send(Event::DiscardRequested)?,
                    Some("q") | None => {
                        handle.shutdown();
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = loop_task.await;

    // Export/submit whatever landed in the active-source slot.
    if let Some(AudioSource::LocalBlob { bytes, .. }) = slot.current() {
        if let Some(path) = output {
            std::fs::write(&path, bytes.as_slice())?;
            println!("Saved recording to {}", path.display());
        }
        if let Some(mode) = submit {
            let mut session = establish_session(client).await;
            let key = resolve_upload_key(&mut session).await?;
            let result = api::upload::submit_bytes(
                session.client(),
                &key,
                bytes.to_vec(),
                "recording.wav",
                "audio/wav",
                mode,
            )
            .await?;
            println!("{}", results::format_result(mode, &result));
        }
    } else if output.is_some() || submit.is_some() {
        println!("No finalized recording to export.");
    }

    Ok(())
}

/// Open a session, logging in from CLIPSCRIBE_USER/CLIPSCRIBE_PASSWORD when
/// both are set (e.g. via .env). Anonymous otherwise; session-bound calls
/// then surface the backend's own message.
async fn establish_session(client: ApiClient) -> SessionContext {
    let mut session = SessionContext::new(client);
    if let (Ok(user), Ok(password)) = (
        std::env::var("CLIPSCRIBE_USER"),
        std::env::var("CLIPSCRIBE_PASSWORD"),
    ) {
        match session.login(&user, &password).await {
            Ok(profile) => log::info!("Session established for {}", profile.username),
            Err(e) => log::warn!("Login from environment failed: {}", e),
        }
    }
    session
}

/// The upload API key: the logged-in profile's key, falling back to the one
/// stored in the system keyring.
async fn resolve_upload_key(session: &mut SessionContext) -> Result<String, api::ApiError> {
    if session.cached_profile().is_none() {
        let _ = session.load().await;
    }
    match session.upload_key() {
        Ok(key) => Ok(key),
        Err(e) => credentials::get_api_key().ok_or(e),
    }
}

fn prompt(label: &str) -> std::io::Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut value = String::new();
    std::io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        "*".repeat(key.len())
    } else {
        format!("{}...{}", &key[..3], &key[key.len() - 6..])
    }
}

fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
