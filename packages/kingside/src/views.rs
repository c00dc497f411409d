use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse};
use maud::{DOCTYPE, PreEscaped, html};
use tracing::debug;

use crate::AppState;

pub async fn home_page(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.hub.store().fetch_stats().await.unwrap_or_default();

    let markup = html! {
        (DOCTYPE)
        html {
            head {
                title { "Kingside - tiny chess rooms" }
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                script src="https://cdn.tailwindcss.com" {}
            }
            body class="bg-gray-900 text-gray-200 min-h-screen flex items-center justify-center" {
                div class="text-center space-y-6" {
                    h1 class="text-4xl font-bold" { "♞ Kingside" }
                    p class="text-gray-400" { "Share a link, play a game. No accounts." }
                    button id="new-game-btn" class="px-6 py-3 bg-emerald-600 hover:bg-emerald-500 rounded-lg font-medium transition-colors" {
                        "New game"
                    }
                    div class="text-sm text-gray-500" {
                        (stats.started) " games started · " (stats.active) " active · " (stats.completed) " finished"
                    }
                }
                script { (PreEscaped(r#"
                    function userId() {
                        let id = localStorage.getItem('kingside-user');
                        if (!id) {
                            id = crypto.randomUUID();
                            localStorage.setItem('kingside-user', id);
                        }
                        return id;
                    }
                    document.getElementById('new-game-btn').addEventListener('click', async () => {
                        const res = await fetch('/new', {
                            method: 'POST',
                            headers: {'Content-Type': 'application/json'},
                            body: JSON.stringify({userId: userId()}),
                        });
                        const body = await res.json();
                        if (body.ok) window.location.href = '/' + body.id;
                    });
                "#)) }
            }
        }
    };
    Html(markup.into_string())
}

pub async fn game_page(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    // make sure the session is resident so the stream connects instantly
    if let Err(err) = state.hub.get(&id, "").await {
        debug!("game page for {id} without a loadable session: {err:#}");
    }

    let markup = html! {
        (DOCTYPE)
        html {
            head {
                title { "Kingside - game" }
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                script src="https://cdn.tailwindcss.com" {}
            }
            body class="bg-gray-900 text-gray-200 min-h-screen flex items-center justify-center" {
                div class="space-y-4" {
                    div id="status" class="text-center text-lg text-gray-300" { "Connecting..." }
                    div id="board" class="grid grid-cols-8 border-2 border-gray-600 select-none"
                        style="width: 480px; height: 480px; font-size: 40px;" data-game-id=(id) {}
                    div class="flex items-center justify-between" {
                        div id="reactions" class="space-x-1" {
                            @for emoji in ["👍", "😄", "😮", "🔥", "👏"] {
                                button class="react-btn px-2 py-1 bg-gray-800 hover:bg-gray-700 rounded" data-emoji=(emoji) { (emoji) }
                            }
                        }
                        div id="meta" class="text-sm text-gray-500" {}
                    }
                    div id="toast" class="text-center text-sm text-amber-400 h-5" {}
                }
                script { (PreEscaped(GAME_JS)) }
            }
        }
    };
    Html(markup.into_string())
}

const GAME_JS: &str = r#"
    const PIECES = {
        p:'♟', n:'♞', b:'♝', r:'♜', q:'♛', k:'♚',
        P:'♙', N:'♘', B:'♗', R:'♖', Q:'♕', K:'♔',
    };
    const boardEl = document.getElementById('board');
    const gameId = boardEl.dataset.gameId;
    let selected = null;
    let myColor = null;

    function userId() {
        let id = localStorage.getItem('kingside-user');
        if (!id) {
            id = crypto.randomUUID();
            localStorage.setItem('kingside-user', id);
        }
        return id;
    }

    function squareName(file, rank) {
        return 'abcdefgh'[file] + (8 - rank);
    }

    function render(fen) {
        boardEl.innerHTML = '';
        const rows = fen.split(' ')[0].split('/');
        rows.forEach((row, rank) => {
            let file = 0;
            for (const ch of row) {
                if (ch >= '1' && ch <= '8') {
                    for (let i = 0; i < +ch; i++) addSquare(file++, rank, '');
                } else {
                    addSquare(file++, rank, PIECES[ch] || '');
                }
            }
        });
    }

    function addSquare(file, rank, piece) {
        const sq = document.createElement('div');
        const light = (file + rank) % 2 === 0;
        sq.className = 'flex items-center justify-center cursor-pointer ' +
            (light ? 'bg-amber-100 text-gray-900' : 'bg-amber-700 text-gray-900');
        sq.textContent = piece;
        sq.dataset.square = squareName(file, rank);
        sq.addEventListener('click', () => onSquare(sq));
        boardEl.appendChild(sq);
    }

    async function onSquare(sq) {
        if (!selected) {
            if (!sq.textContent) return;
            selected = sq;
            sq.classList.add('ring-4', 'ring-emerald-400');
            return;
        }
        const uci = selected.dataset.square + sq.dataset.square;
        selected.classList.remove('ring-4', 'ring-emerald-400');
        selected = null;
        const res = await fetch('/move/' + gameId, {
            method: 'POST',
            headers: {'Content-Type': 'application/json'},
            body: JSON.stringify({uci, clientId: userId()}),
        });
        const body = await res.json();
        if (!body.ok) toast(body.error);
        if (body.state) apply(body.state);
    }

    function apply(state) {
        render(state.fen);
        const status = document.getElementById('status');
        if (state.status) {
            status.textContent = state.status;
        } else {
            const turn = state.turn === myColor ? 'your move' : state.turn + ' to move';
            status.textContent = turn;
        }
        document.getElementById('meta').textContent =
            state.watchers + ' watching · ' + state.uci.length + ' moves';
    }

    function toast(text) {
        const el = document.getElementById('toast');
        el.textContent = text;
        setTimeout(() => { if (el.textContent === text) el.textContent = ''; }, 3000);
    }

    for (const btn of document.querySelectorAll('.react-btn')) {
        btn.addEventListener('click', async () => {
            const res = await fetch('/react/' + gameId, {
                method: 'POST',
                headers: {'Content-Type': 'application/json'},
                body: JSON.stringify({emoji: btn.dataset.emoji, sender: userId()}),
            });
            const body = await res.json();
            if (!body.ok) toast(body.error);
        });
    }

    const source = new EventSource('/sse/' + gameId + '?clientId=' + encodeURIComponent(userId()));
    source.onmessage = (event) => {
        const msg = JSON.parse(event.data);
        if (msg.color !== undefined) myColor = msg.color;
        if (msg.kind === 'state') apply(msg);
        if (msg.kind === 'emoji') toast(msg.sender.slice(0, 8) + ' reacted ' + msg.emoji);
    };
"#;
