use std::sync::Arc;

use anyhow::Result;
use basic_chat::{
    backend::{BlobStore, ChatStore},
    chat::{ChatScreen, ScreenEvent},
    config::Config,
    database::FirestoreStore,
    directory::DirectoryScreen,
    logging::init_logging,
    memory::MemoryBackend,
    message_list::{Alignment, Content, MessageRow},
    relay::NotificationRelay,
    server::serve,
    session::{register_push_token, sign_up, Session},
    storage::BucketStore,
};
use clap::{Parser, Subcommand};
use google_authz::Credentials;
use tokio::io::{AsyncBufReadExt, BufReader};

const IMAGE_COMMAND: &str = "/image ";
const ROW_WIDTH: usize = 72;

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Run the notification relay endpoint.
    Serve {
        #[clap(short, long)]
        port: Option<u16>,
    },
    SignUp {
        #[clap(long)]
        uid: String,
        #[clap(long)]
        email: String,
        #[clap(long, default_value = "")]
        name: String,
    },
    RegisterToken {
        #[clap(long)]
        uid: String,
        #[clap(long)]
        token: String,
    },
    /// List everyone except `uid`.
    Users {
        #[clap(long)]
        uid: String,
        #[clap(long)]
        watch: bool,
    },
    Chat {
        #[clap(long)]
        uid: String,
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        peer: String,
    },
    /// Two clients and the relay against the in-memory backend.
    Demo,
}

fn firestore(config: &Config) -> Result<Arc<dyn ChatStore>> {
    Ok(Arc::new(FirestoreStore::new(
        config.project_id()?,
        config.poll_interval,
    )?))
}

fn render_row(row: &MessageRow) -> String {
    let bubble = row.bubble();
    let body = match &bubble.content {
        Content::Text(text) => text.clone(),
        Content::Image { url, .. } => format!("[image] {}", url),
    };

    match row.alignment() {
        Alignment::Left => format!("{} ({}): {}", bubble.sender_label, bubble.time_label, body),
        Alignment::Right => {
            let line = format!("{} ({}): {}", body, bubble.time_label, bubble.sender_label);
            format!("{:>width$}", line, width = ROW_WIDTH)
        }
    }
}

async fn list_users(store: Arc<dyn ChatStore>, uid: &str, watch: bool) -> Result<()> {
    let mut screen = DirectoryScreen::new(store, Session::new(uid, None));

    let print = |screen: &DirectoryScreen| {
        for position in 0..screen.adapter().item_count() {
            if let Some(row) = screen.adapter().bind(position) {
                println!("{:>3}  {:<18} {}", position, row.display_name, row.email);
            }
        }
    };

    if !watch {
        screen.refresh().await?;
        print(&screen);
        return Ok(());
    }

    screen.watch().await?;
    while let Some(snapshot) = screen.next_snapshot().await {
        if snapshot.is_ok() {
            println!("--");
            print(&screen);
        }
    }

    Ok(())
}

async fn chat(
    store: Arc<dyn ChatStore>,
    blobs: Arc<dyn BlobStore>,
    session: Session,
    peer: String,
) -> Result<()> {
    let mut screen = ChatScreen::new(store, blobs, Some(session), Some(peer));
    println!("== {} ==", screen.load_title().await);
    screen.open().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = screen.next_event() => match event {
                Some(ScreenEvent::Appended { positions, .. }) => {
                    for position in positions {
                        if let Some(row) = screen.adapter().bind(position) {
                            println!("{}", render_row(&row));
                        }
                    }
                }
                Some(ScreenEvent::ListenFailed(_)) => {}
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    // Failures are logged by the screen and not retried.
                    if let Some(path) = line.strip_prefix(IMAGE_COMMAND) {
                        match tokio::fs::read(path.trim()).await {
                            Ok(bytes) => {
                                let _ = screen.attach_image(bytes).await;
                            }
                            Err(error) => tracing::warn!(?error, %path, "Could not read image."),
                        }
                    } else {
                        let _ = screen.send_text(&line).await;
                    }
                }
                None => break,
            },
        }
    }

    screen.close();
    Ok(())
}

async fn demo() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    for (uid, name) in [("u1", "Ann"), ("u2", "Bob")].iter() {
        sign_up(&*backend, uid, &format!("{}@example.com", uid), name).await?;
        register_push_token(&*backend, &Session::new(uid, None), &format!("token-{}", uid)).await?;
    }

    let mut first = ChatScreen::new(
        backend.clone(),
        backend.clone(),
        Some(Session::new("u1", Some("Ann"))),
        Some("u2".to_string()),
    )
    .with_clock(|| 100);
    let mut second = ChatScreen::new(
        backend.clone(),
        backend.clone(),
        Some(Session::new("u2", Some("Bob"))),
        Some("u1".to_string()),
    )
    .with_clock(|| 200);

    first.open().await?;
    second.open().await?;

    let relay = NotificationRelay::new(backend.clone(), backend.clone());
    let sent = vec![first.send_text("hi").await?, second.send_text("hey").await?];

    for (screen, label) in vec![(&mut first, "u1"), (&mut second, "u2")] {
        while screen.adapter().item_count() < sent.len() {
            if screen.next_event().await.is_none() {
                break;
            }
        }
        println!("== {} sees room {} ==", label, screen.room_id().unwrap_or_default());
        for row in screen.adapter().rows() {
            println!("{}", render_row(&row));
        }
    }

    let room_id = first.room_id().unwrap_or_default().to_string();
    for (message, id) in backend.messages(&room_id).iter().zip(sent.iter()) {
        let id = id.as_deref().unwrap_or_default();
        let outcome = relay.on_message_created(&room_id, id, message).await;
        println!("relay {}: {} ({})", id, outcome.kind(), outcome.detail());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    let config = Config::from_env()?;
    init_logging(config.log_json);

    match opts.subcmd {
        SubCommand::Serve { port } => {
            serve(&config, port).await?;
        }
        SubCommand::SignUp { uid, email, name } => {
            let store = firestore(&config)?;
            let user = sign_up(&*store, &uid, &email, &name).await?;
            println!("created users/{} ({})", user.uid, user.first);
        }
        SubCommand::RegisterToken { uid, token } => {
            let store = firestore(&config)?;
            register_push_token(&*store, &Session::new(&uid, None), &token).await?;
        }
        SubCommand::Users { uid, watch } => {
            list_users(firestore(&config)?, &uid, watch).await?;
        }
        SubCommand::Chat { uid, name, peer } => {
            let store = firestore(&config)?;
            let creds = Credentials::default().await;
            let blobs = Arc::new(BucketStore::new(creds.into(), config.storage_bucket()?));
            let session = Session::new(&uid, name.as_deref());
            chat(store, blobs, session, peer).await?;
        }
        SubCommand::Demo => {
            demo().await?;
        }
    }

    Ok(())
}
