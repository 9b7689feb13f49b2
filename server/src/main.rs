use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use hearthside_protocol::*;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod hub;
mod table;
mod view;

use hub::{ConnId, Hub, SharedHub};

const ASSET_DIR: &str = "public/assets";
const INDEX_FILE: &str = "public/index.html";
const ALLOWED_ASSET_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "mp4", "webm", "css", "js",
];

#[derive(Parser)]
#[command(about = "hearthside tabletop coordination server")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9001)]
    port: u16,
}

#[derive(Clone)]
struct AppState {
    hub: SharedHub,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let state = AppState { hub: Hub::shared() };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/export/:table", get(export_handler))
        .route("/assets/:file", get(asset_handler))
        .fallback(get(index_handler))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx_out, mut rx_out) = mpsc::unbounded_channel::<ServerToClient>();
    let pump = tokio::spawn(async move {
        while let Some(msg) = rx_out.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let conn_id = Uuid::new_v4();
    let kill = Arc::new(Notify::new());
    hub::register_connection(&state.hub, conn_id, tx_out, kill.clone());

    loop {
        tokio::select! {
            _ = kill.notified() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // Unparsable bodies and unknown message types are
                    // dropped without a response; the protocol is
                    // best-effort for everything but join/reconnect.
                    if let Ok(cmd) = serde_json::from_str::<ClientToServer>(&text) {
                        route_cmd(&state, conn_id, cmd);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub::handle_disconnect(&state.hub, conn_id);
    pump.abort();
}

fn route_cmd(state: &AppState, conn: ConnId, cmd: ClientToServer) {
    let hub = &state.hub;
    match cmd {
        ClientToServer::JoinTable { table, name } => hub::join_table(hub, conn, &table, &name),
        ClientToServer::LeaveTable => hub::leave_table(hub, conn),
        ClientToServer::Reconnect { credential } => hub::reconnect(hub, conn, credential),
        ClientToServer::RequestState => hub::send_state(hub, conn),

        ClientToServer::RollDice { notation } => {
            hub::seat_scoped(hub, conn, |t, s| t.roll_dice(s, &notation));
        }
        ClientToServer::PostChat { text } => {
            hub::seat_scoped(hub, conn, |t, s| t.post_chat(s, &text));
        }
        ClientToServer::SetAction { text } => {
            hub::seat_scoped(hub, conn, |t, s| t.set_action(s, &text));
        }
        ClientToServer::SubmitSheet { sheet } => {
            hub::seat_scoped(hub, conn, |t, s| t.submit_sheet(s, &sheet));
        }

        ClientToServer::SetScene { text } => {
            hub::gm_scoped(hub, conn, |t| t.set_scene(&text));
        }
        ClientToServer::PushMedia { kind, url } => {
            hub::gm_scoped(hub, conn, |t| t.push_media(kind, &url));
        }
        ClientToServer::ClearMedia => {
            hub::gm_scoped(hub, conn, |t| t.clear_media());
        }
        ClientToServer::SetLocation { label } => {
            hub::gm_scoped(hub, conn, |t| t.set_location(&label));
        }
        ClientToServer::SetLock { locked } => {
            hub::set_lock(hub, conn, locked);
        }
        ClientToServer::DeclareDefeat { seat } => {
            hub::gm_scoped(hub, conn, |t| t.declare_defeat(seat));
        }
        ClientToServer::SpawnNpc {
            name,
            faction,
            notes,
            challenge,
            demeanor,
        } => {
            hub::gm_scoped(hub, conn, |t| {
                t.spawn_npc(&name, &faction, &notes, challenge, demeanor.as_deref())
            });
        }
        ClientToServer::RemoveNpc { id } => {
            hub::gm_scoped(hub, conn, |t| t.remove_npc(id));
        }
    }
}

/// Serializes a table's event log as a downloadable JSON document.
async fn export_handler(
    Path(table): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match hub::export_log(&state.hub, &table) {
        Some(log) => (
            [(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}-log.json\"", table),
            )],
            Json(log),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serves a named file from the asset directory. The name is reduced to
/// its final path component and the extension checked against a
/// whitelist before anything touches the filesystem.
async fn asset_handler(Path(file): Path<String>) -> Response {
    let Some(name) = std::path::Path::new(&file)
        .file_name()
        .and_then(|n| n.to_str())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(ext) = std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !ALLOWED_ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return StatusCode::NOT_FOUND.into_response();
    }
    match tokio::fs::read(std::path::Path::new(ASSET_DIR).join(name)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(ext))], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn content_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "css" => "text/css",
        "js" => "text/javascript",
        _ => "application/octet-stream",
    }
}

/// Client application shell for every other path.
async fn index_handler() -> Html<String> {
    match tokio::fs::read_to_string(INDEX_FILE).await {
        Ok(shell) => Html(shell),
        Err(_) => Html(
            "<!doctype html><title>hearthside</title><p>client shell not installed</p>"
                .to_string(),
        ),
    }
}
