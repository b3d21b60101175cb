use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use luma_chat::chat::{
    AccountService, ActiveThreadContext, AudioClip, AudioRecorder, DraftComposer, FileMicrophone,
    ImageAttachment, MessageSender, PresenceSetter, RegisterRequest, SendPolicy, SessionContext,
};
use luma_chat::common::{ChatCommand, ChatEvent, ThreadId, UserId};
use luma_chat::config::{self, AppConfig, BlobBackend};
use luma_chat::network::{
    AuthProvider, BlobStore, FirebaseStorageClient, IdentityToolkitClient, LocalBlobStore, Session,
};
use luma_chat::storage::{DocumentStore, SqliteDocumentStore, ensure_parent_dir};
use luma_chat::ui::ChatClient;
use luma_chat::ui::components::input_bar::{self, InputAction};
use luma_chat::ui::components::message_list;

#[derive(Parser)]
#[command(name = "luma_chat", version, about = "Two-person chat client")]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account, its profile and an empty chat list
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Avatar image to upload
        #[arg(long, value_name = "FILE")]
        avatar: Option<PathBuf>,
    },
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Store the session so later commands can use it
        #[arg(long)]
        keep_signed_in: bool,
    },
    SignOut,
    /// Start a thread with another user
    OpenThread {
        #[arg(long, value_name = "USER_ID")]
        with: String,
    },
    Send {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
    },
    /// Send a recorded audio file on its own
    SendAudio {
        #[arg(long)]
        thread: String,
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    Presence {
        #[arg(long, action = ArgAction::Set)]
        online: bool,
    },
    Block {
        #[arg(long, value_name = "USER_ID")]
        user: String,
    },
    Unblock {
        #[arg(long, value_name = "USER_ID")]
        user: String,
    },
    /// Open a thread interactively
    Chat {
        #[arg(long)]
        thread: String,
        /// Audio file played back as the microphone when recording
        #[arg(long, value_name = "FILE")]
        mic_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);
    let store = open_store(&app_config)?;

    match cli.command {
        Command::Register {
            username,
            email,
            password,
            avatar,
        } => {
            let avatar = match avatar {
                Some(path) => Some(
                    ImageAttachment::from_file(&path)
                        .await
                        .with_context(|| format!("reading avatar {}", path.display()))?
                        .payload,
                ),
                None => None,
            };
            let accounts = account_service(&app_config, store, None);
            let profile = accounts
                .register(RegisterRequest {
                    username,
                    email,
                    password,
                    avatar,
                })
                .await?;
            println!(
                "Account created for {} ({}). You can sign in now.",
                profile.username, profile.id
            );
        }
        Command::SignIn {
            email,
            password,
            keep_signed_in,
        } => {
            let accounts = account_service(&app_config, store, None);
            let session = accounts.sign_in(&email, &password).await?;
            if keep_signed_in {
                config::save_session(&app_config.session_path, &session)
                    .with_context(|| format!("writing {}", app_config.session_path))?;
            }
            println!("Signed in as {}", session.user_id);
        }
        Command::SignOut => {
            config::clear_session(&app_config.session_path)?;
            println!("Signed out");
        }
        Command::OpenThread { with } => {
            let (session, context) = signed_in(&app_config, store.as_ref()).await?;
            let accounts = account_service(&app_config, store, Some(&session));
            let thread_id = accounts.open_thread(&context, &UserId::new(with)).await?;
            println!("{thread_id}");
        }
        Command::Send {
            thread,
            text,
            image,
        } => {
            let (session, context) = signed_in(&app_config, store.as_ref()).await?;
            let thread_id = ThreadId::new(thread);
            let active = ActiveThreadContext::resolve(store.as_ref(), &context, &thread_id).await?;
            let sender = message_sender(&app_config, store, &session, context);

            let mut composer = DraftComposer::new();
            if let Some(text) = text {
                composer.set_text(text);
            }
            if let Some(path) = image {
                let image = ImageAttachment::from_file(&path)
                    .await
                    .with_context(|| format!("reading image {}", path.display()))?;
                composer.attach_image(image);
            }

            match sender.send_draft(&active, &mut composer).await? {
                Some(message) => println!("Sent: {}", message.preview()),
                None => println!("Nothing to send"),
            }
        }
        Command::SendAudio { thread, file } => {
            let (session, context) = signed_in(&app_config, store.as_ref()).await?;
            let thread_id = ThreadId::new(thread);
            let active = ActiveThreadContext::resolve(store.as_ref(), &context, &thread_id).await?;
            let sender = message_sender(&app_config, store, &session, context);

            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            match sender.send_audio(&active, &AudioClip::new(bytes)).await? {
                Some(_) => println!("Sent audio message"),
                None => println!("Recording is empty; nothing sent"),
            }
        }
        Command::Presence { online } => {
            let session = require_session(&app_config)?;
            PresenceSetter::new(store)
                .set_online(&session.user_id, online)
                .await;
        }
        Command::Block { user } => {
            let (session, context) = signed_in(&app_config, store.as_ref()).await?;
            let accounts = account_service(&app_config, store, Some(&session));
            accounts.block(&context, &UserId::new(user)).await?;
            println!("Blocked");
        }
        Command::Unblock { user } => {
            let (session, context) = signed_in(&app_config, store.as_ref()).await?;
            let accounts = account_service(&app_config, store, Some(&session));
            accounts.unblock(&context, &UserId::new(user)).await?;
            println!("Unblocked");
        }
        Command::Chat { thread, mic_file } => {
            let (session, context) = signed_in(&app_config, store.as_ref()).await?;
            let thread_id = ThreadId::new(thread);
            let active = ActiveThreadContext::resolve(store.as_ref(), &context, &thread_id).await?;
            run_chat(&app_config, store, session, context, active, mic_file).await?;
        }
    }

    Ok(())
}

async fn run_chat(
    app_config: &AppConfig,
    store: Arc<dyn DocumentStore>,
    session: Session,
    context: SessionContext,
    active: ActiveThreadContext,
    mic_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    // 1. Channels: terminal -> client, client -> terminal
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    let (event_tx, mut event_rx) = mpsc::channel(100);

    // 2. Client loop in the background
    let user_id = context.user_id().clone();
    if active.is_blocked(&context) {
        println!("You cannot send messages in this chat");
    }
    let sender = message_sender(app_config, store.clone(), &session, context);
    let recorder = AudioRecorder::new(Arc::new(FileMicrophone::new(mic_file)));
    let client = ChatClient::new(store, sender, recorder, event_tx, cmd_rx);
    let client_task = tokio::spawn(client.run());
    cmd_tx.send(ChatCommand::SwitchThread(Some(active))).await?;

    // 3. Event printer
    let printer = tokio::spawn(async move {
        let mut shown = 0;
        while let Some(event) = event_rx.recv().await {
            match event {
                ChatEvent::ThreadUpdated(_, thread) => {
                    if thread.messages.len() < shown {
                        shown = 0;
                    }
                    let now = Utc::now();
                    for message in thread.messages.iter().skip(shown) {
                        for line in message_list::render(message, &user_id, now) {
                            println!("{line}");
                        }
                    }
                    shown = thread.messages.len();
                }
                ChatEvent::MessageSent(_) => {}
                ChatEvent::SendFailed(reason) => println!("! Message not sent: {reason}"),
                ChatEvent::RecordingStarted => println!("* Recording... (/rec to stop and send)"),
                ChatEvent::RecordingStopped => println!("* Recording stopped"),
                ChatEvent::Notice(notice) => println!("! {notice}"),
            }
        }
    });

    // 4. Terminal input on this task
    println!("{}", input_bar::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match input_bar::parse_line(&line) {
            InputAction::Quit => break,
            InputAction::Help => println!("{}", input_bar::HELP),
            InputAction::Unknown(line) => println!("Unknown command `{line}` (try /help)"),
            InputAction::AttachImage(path) => match ImageAttachment::from_file(&path).await {
                Ok(image) => {
                    println!("* Attached {}", image.preview);
                    cmd_tx.send(ChatCommand::AttachImage(image)).await?;
                }
                Err(err) => println!("! Cannot read {}: {err}", path.display()),
            },
            InputAction::Commands(commands) => {
                for command in commands {
                    cmd_tx.send(command).await?;
                }
            }
        }
    }

    drop(cmd_tx);
    client_task.await?;
    printer.await?;
    Ok(())
}

fn open_store(app_config: &AppConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    ensure_parent_dir(&app_config.database_path)?;
    let store = SqliteDocumentStore::open(&app_config.database_path)
        .with_context(|| format!("opening {}", app_config.database_path))?
        .with_poll_interval(Duration::from_millis(app_config.poll_interval_ms));
    Ok(Arc::new(store))
}

fn blob_store(app_config: &AppConfig, session: Option<&Session>) -> Arc<dyn BlobStore> {
    match app_config.blob_backend {
        BlobBackend::Local => Arc::new(LocalBlobStore::new(
            &app_config.blob_dir,
            app_config.max_upload_bytes,
        )),
        BlobBackend::Firebase => {
            let mut client =
                FirebaseStorageClient::new(&app_config.storage_bucket, app_config.max_upload_bytes);
            if let Some(session) = session {
                client = client.with_id_token(&session.id_token);
            }
            Arc::new(client)
        }
    }
}

fn account_service(
    app_config: &AppConfig,
    store: Arc<dyn DocumentStore>,
    session: Option<&Session>,
) -> AccountService {
    let auth: Arc<dyn AuthProvider> = Arc::new(IdentityToolkitClient::new(&app_config.api_key));
    AccountService::new(
        auth,
        store,
        blob_store(app_config, session),
        app_config.max_commit_attempts,
    )
}

fn message_sender(
    app_config: &AppConfig,
    store: Arc<dyn DocumentStore>,
    session: &Session,
    context: SessionContext,
) -> MessageSender {
    MessageSender::new(
        store,
        blob_store(app_config, Some(session)),
        context,
        SendPolicy::from(app_config),
    )
}

fn require_session(app_config: &AppConfig) -> anyhow::Result<Session> {
    let Some(session) = config::load_session(&app_config.session_path) else {
        bail!("Not signed in. Run `luma_chat sign-in --keep-signed-in` first.");
    };
    if session.is_expired(Utc::now()) {
        log::warn!(
            "Stored session expired at {}; uploads may be rejected",
            session.expires_at
        );
    }
    Ok(session)
}

async fn signed_in(
    app_config: &AppConfig,
    store: &dyn DocumentStore,
) -> anyhow::Result<(Session, SessionContext)> {
    let session = require_session(app_config)?;
    let context = SessionContext::load(store, &session.user_id)
        .await
        .with_context(|| format!("loading profile of {}", session.user_id))?;
    Ok((session, context))
}
