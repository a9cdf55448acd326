use crate::clock::SystemClock;
use crate::game::GameDeps;
use crate::lobby::{Lobby, LobbyConfig, LobbyEvent};
use crate::socket::{Socket, SocketConfig};
use crate::users::{UserRegistry, UserStore};
use anyhow::Context;
use bananas::game::GameConfig;
use bananas::messages::PlayerName;
use bananas::words::WordSet;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use warp::Filter;

mod clock;
mod game;
mod lobby;
mod socket;
mod users;

/// A game with no player traffic for this long is deleted.
const GAME_IDLE_PERIOD: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup the global logger.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let words_path =
        std::env::var("WORDS_FILE").unwrap_or_else(|_| "/usr/share/dict/words".to_owned());
    let words_file =
        File::open(&words_path).with_context(|| format!("opening word list {words_path}"))?;
    let word_set = WordSet::from_reader(BufReader::new(words_file))
        .with_context(|| format!("reading word list {words_path}"))?;
    info!(words = word_set.len(), path = %words_path, "word list loaded");

    let socket_config = SocketConfig::default();
    socket_config.validate().context("socket configuration")?;

    let cancel = CancellationToken::new();
    let deps = GameDeps {
        config: GameConfig::default(),
        idle_period: GAME_IDLE_PERIOD,
        word_set: Arc::new(word_set),
        users: Arc::new(UserRegistry::new()) as Arc<dyn UserStore>,
    };
    let lobby = Lobby::spawn(
        LobbyConfig::default(),
        deps,
        Arc::new(SystemClock),
        cancel.clone(),
    );

    let ws_route = {
        let lobby = lobby.clone();
        let cancel = cancel.clone();
        warp::path("ws")
            .and(warp::query::<ConnectQuery>())
            .and(warp::ws())
            .map(move |query: ConnectQuery, ws: warp::ws::Ws| {
                let lobby = lobby.clone();
                let cancel = cancel.clone();
                ws.on_upgrade(move |websocket| async move {
                    // The outer HTTP layer owns authentication; the query
                    // parameter stands in for the verified player name.
                    let name = PlayerName::new(query.name);
                    connect(name, socket_config, websocket, lobby, cancel).await;
                })
            })
    };
    let index = warp::path::end().map(|| warp::reply::html(INDEX_HTML));
    let routes = index.or(ws_route);

    let server = warp::serve(routes).run(([127, 0, 0, 1], 3030));
    info!("serving on 127.0.0.1:3030");

    tokio::select! {
        _ = server => {}
        result = tokio::signal::ctrl_c() => {
            result.context("listening for ctrl-c")?;
            info!("ctrl-c received, shutting down");
            // Wait for the lobby to finish enqueueing the terminal
            // PlayerDelete/Delete fan-out before cancelling anything, or the
            // socket writers could die with those messages still queued.
            let (done, finished) = oneshot::channel();
            if lobby.send(LobbyEvent::Shutdown { done }).await.is_ok() {
                let _ = finished.await;
            }
            cancel.cancel();
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    name: String,
}

/// Builds the socket pump for one upgraded connection and registers it with
/// the lobby.
async fn connect(
    name: PlayerName,
    config: SocketConfig,
    websocket: warp::ws::WebSocket,
    lobby: mpsc::Sender<LobbyEvent>,
    cancel: CancellationToken,
) {
    let socket = match Socket::new(name.clone(), config) {
        Ok(socket) => socket,
        Err(err) => {
            warn!(%name, %err, "refusing connection");
            return;
        }
    };
    let handle = socket.start(websocket, lobby.clone(), cancel);
    if lobby.send(LobbyEvent::SocketAdd { handle }).await.is_err() {
        warn!(%name, "lobby is gone, dropping connection");
    }
}

static INDEX_HTML: &str = r#"
<!DOCTYPE html>
<html>
    <head>
        <title>bananas</title>
    </head>
    <body>
        <h1>bananas</h1>
        <p>Connect a game client to <code>ws://localhost:3030/ws?name=you</code>.</p>
        <script type="text/javascript">
        // Smoke-test hook: open a socket and log traffic to the console.
        var params = new URLSearchParams(location.search);
        if (params.has('name')) {
            var uri = 'ws://' + location.host + '/ws?name=' + params.get('name');
            var ws = new WebSocket(uri);
            ws.onmessage = function(msg) { console.log(msg.data); };
        }
        </script>
    </body>
</html>
"#;
