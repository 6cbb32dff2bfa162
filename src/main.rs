use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use canvas_sync::ws::spawn_socket;
use canvas_sync::{
    CanvasObject, CanvasSession, ChannelState, ClientError, Credential, ErrorKind, HttpTransport, LocalChange,
    ObjectKind, ObjectPatch, SyncClient, SyncConfig, SyncError, SyncNotice,
};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const DRAG_STEP: Duration = Duration::from_millis(16);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing token; pass --token or set SYNC_TOKEN")]
    MissingToken,
    #[error("unknown object kind `{0}`")]
    UnknownKind(String),
    #[error("object {0} is not in the snapshot; pass --snapshot")]
    NotLoaded(Uuid),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("snapshot read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("mutation failed: {0:?}")]
    Rejected(ErrorKind),
    #[error("mutation rolled back")]
    RolledBack,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

#[derive(Parser, Debug)]
#[command(name = "canvas-sync", about = "Drive the canvas sync engine against a live server")]
struct Cli {
    /// Overrides `SYNC_BASE_URL` from the environment config.
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, env = "SYNC_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "SYNC_CANVAS_ID")]
    canvas_id: Uuid,

    #[arg(long, env = "SYNC_USER_ID")]
    user_id: Option<Uuid>,

    /// JSON object or array of objects to seed the store with.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print notices and remote activity until interrupted.
    Watch,
    Create {
        #[arg(long, default_value = "rectangle")]
        kind: String,
        #[arg(long, default_value_t = 0.0)]
        x: f64,
        #[arg(long, default_value_t = 0.0)]
        y: f64,
        #[arg(long)]
        text: Option<String>,
    },
    /// Move an object to (x, y) through `steps` intermediate positions.
    Drag {
        object_id: Uuid,
        #[arg(long)]
        x: f64,
        #[arg(long)]
        y: f64,
        #[arg(long, default_value_t = 10)]
        steps: u32,
    },
    Delete {
        object_id: Uuid,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Many(Vec<CanvasObject>),
    One(Box<CanvasObject>),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    let token = cli.token.ok_or(CliError::MissingToken)?;
    let session = CanvasSession::new(
        cli.user_id.unwrap_or_else(Uuid::new_v4),
        cli.canvas_id,
        Some(Credential::new(token, None)),
    );

    let transport = Arc::new(HttpTransport::new(&config.base_url, config.request_timeout)?);
    let (link, socket) =
        spawn_socket(config.ws_url(cli.canvas_id), config.heartbeat_interval, config.outbound_capacity);
    let (client, actor) = SyncClient::spawn(config, session.clone(), transport, Some(link));
    let mut notices = client.subscribe();

    if let Some(path) = &cli.snapshot {
        let objects = match serde_json::from_str(&std::fs::read_to_string(path)?)? {
            Snapshot::Many(objects) => objects,
            Snapshot::One(object) => vec![*object],
        };
        client.load_snapshot(objects).await?;
    }

    let result = match cli.command {
        Command::Watch => watch(&mut notices).await,
        Command::Create { kind, x, y, text } => {
            let kind: ObjectKind =
                serde_json::from_value(Value::String(kind.clone())).map_err(|_| CliError::UnknownKind(kind))?;
            let mut object = CanvasObject::draft(cli.canvas_id, kind, x, y, Some(session.user_id));
            if let Some(text) = text {
                object = object.with_text(text);
            }
            let id = object.id;
            run_change(&client, &mut notices, LocalChange::Create(object)).await?;
            print_object(&client, id).await
        }
        Command::Drag { object_id, x, y, steps } => {
            drag(&client, &mut notices, object_id, (x, y), steps.max(1)).await?;
            print_object(&client, object_id).await
        }
        Command::Delete { object_id } => {
            ensure_loaded(&client, object_id).await?;
            run_change(&client, &mut notices, LocalChange::Delete { id: object_id }).await?;
            eprintln!("deleted {object_id}");
            Ok(())
        }
    };

    client.shutdown().await.ok();
    actor.await.ok();
    socket.abort();
    result
}

async fn watch(notices: &mut broadcast::Receiver<SyncNotice>) -> Result<(), CliError> {
    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("{notice:?}"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => eprintln!("skipped {skipped} notices"),
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn wait_connected(notices: &mut broadcast::Receiver<SyncNotice>, client: &SyncClient) -> Result<(), CliError> {
    if client.view().await?.connection.allows_dispatch() {
        return Ok(());
    }
    wait(notices, "connection", |n| match n {
        SyncNotice::ConnectionChanged { to: ChannelState::Connected, .. } => Some(Ok(())),
        _ => None,
    })
    .await
}

/// Apply one change and wait for its terminal notice.
async fn run_change(
    client: &SyncClient,
    notices: &mut broadcast::Receiver<SyncNotice>,
    change: LocalChange,
) -> Result<(), CliError> {
    wait_connected(notices, client).await?;
    let handle = client.apply(change).await?;
    client.end_gesture(handle.object_id).await?;
    settle(notices, handle.op_id).await
}

async fn drag(
    client: &SyncClient,
    notices: &mut broadcast::Receiver<SyncNotice>,
    object_id: Uuid,
    to: (f64, f64),
    steps: u32,
) -> Result<(), CliError> {
    let start = ensure_loaded(client, object_id).await?;
    wait_connected(notices, client).await?;

    let mut last = None;
    for step in 1..=steps {
        let t = f64::from(step) / f64::from(steps);
        let patch = ObjectPatch::position(start.x + (to.0 - start.x) * t, start.y + (to.1 - start.y) * t);
        last = Some(client.apply(LocalChange::Update { id: object_id, patch }).await?);
        tokio::time::sleep(DRAG_STEP).await;
    }
    client.end_gesture(object_id).await?;
    match last {
        Some(handle) => settle(notices, handle.op_id).await,
        None => Ok(()),
    }
}

async fn settle(notices: &mut broadcast::Receiver<SyncNotice>, op_id: Uuid) -> Result<(), CliError> {
    wait(notices, "confirmation", |n| match n {
        SyncNotice::Confirmed { op_id: id, .. } if *id == op_id => Some(Ok(())),
        SyncNotice::Failed { op_id: id, kind, retryable: false, .. } if *id == op_id => {
            Some(Err(CliError::Rejected(*kind)))
        }
        SyncNotice::RolledBack { op_id: id, .. } if *id == op_id => Some(Err(CliError::RolledBack)),
        SyncNotice::AuthenticationRequired => Some(Err(CliError::Rejected(ErrorKind::AuthenticationRequired))),
        _ => None,
    })
    .await
}

async fn wait<F>(notices: &mut broadcast::Receiver<SyncNotice>, what: &'static str, mut check: F) -> Result<(), CliError>
where
    F: FnMut(&SyncNotice) -> Option<Result<(), CliError>>,
{
    let fut = async {
        loop {
            match notices.recv().await {
                Ok(notice) => {
                    tracing::debug!(?notice, "notice");
                    if let Some(result) = check(&notice) {
                        return result;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(CliError::Client(ClientError::Stopped)),
            }
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, fut).await.map_err(|_| CliError::Timeout(what))?
}

async fn ensure_loaded(client: &SyncClient, object_id: Uuid) -> Result<CanvasObject, CliError> {
    client
        .view()
        .await?
        .objects
        .into_iter()
        .find(|o| o.id == object_id)
        .ok_or(CliError::NotLoaded(object_id))
}

async fn print_object(client: &SyncClient, object_id: Uuid) -> Result<(), CliError> {
    let object = ensure_loaded(client, object_id).await?;
    println!("{}", serde_json::to_string_pretty(&object)?);
    Ok(())
}
