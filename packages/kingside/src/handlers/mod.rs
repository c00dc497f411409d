mod games;
mod sse;

pub use games::{
    create_game, create_game_redirect, forget_game, play_move, release_client, send_reaction,
    stats,
};
pub use sse::game_stream;
