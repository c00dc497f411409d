use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Outcome, Position, Role, Square};

/// One of the two competing sides of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn random() -> Self {
        if rand::random::<bool>() {
            Side::White
        } else {
            Side::Black
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "white" => Some(Side::White),
            "black" => Some(Side::Black),
            _ => None,
        }
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

impl From<Side> for Color {
    fn from(side: Side) -> Self {
        match side {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

/// Authoritative game position plus the move history needed to render
/// PGN/UCI notation. Thin adapter over the shakmaty rules engine; the
/// rest of the server treats this as an opaque validator/move-applier.
pub struct Board {
    pos: Chess,
    sans: Vec<String>,
    ucis: Vec<String>,
}

impl Board {
    pub fn new() -> Self {
        Self {
            pos: Chess::default(),
            sans: Vec::new(),
            ucis: Vec::new(),
        }
    }

    /// Restore a position from FEN. Move history is not recoverable from a
    /// bare position, so PGN/UCI notation restarts from the restored point.
    pub fn from_fen(fen: &str) -> Result<Self> {
        let parsed: Fen = fen
            .parse()
            .with_context(|| format!("invalid FEN: {fen}"))?;
        let pos: Chess = parsed
            .into_position(CastlingMode::Standard)
            .with_context(|| format!("illegal position: {fen}"))?;
        Ok(Self {
            pos,
            sans: Vec::new(),
            ucis: Vec::new(),
        })
    }

    /// Validate and apply a move in UCI notation. On rejection the position
    /// is unchanged and the error carries a human-readable reason.
    pub fn play_uci(&mut self, uci: &str) -> Result<()> {
        let parsed: UciMove = uci
            .parse()
            .map_err(|_| anyhow!("invalid move notation: {uci}"))?;
        let m = parsed
            .to_move(&self.pos)
            .map_err(|_| anyhow!("illegal move: {uci}"))?;
        let long = m.to_uci(CastlingMode::Standard).to_string();
        let san = SanPlus::from_move_and_play_unchecked(&mut self.pos, &m);
        self.sans.push(san.to_string());
        self.ucis.push(long);
        Ok(())
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.pos.clone(), EnPassantMode::Legal).to_string()
    }

    pub fn turn(&self) -> Side {
        Side::from(self.pos.turn())
    }

    /// Terminal status text, empty while the game is ongoing.
    pub fn status(&self) -> String {
        match self.pos.outcome() {
            Some(Outcome::Decisive { winner }) => {
                format!("{} won by checkmate", Side::from(winner).as_str())
            }
            Some(Outcome::Draw) => {
                if self.pos.is_stalemate() {
                    "draw by stalemate".to_string()
                } else if self.pos.is_insufficient_material() {
                    "draw by insufficient material".to_string()
                } else {
                    "draw".to_string()
                }
            }
            None => String::new(),
        }
    }

    pub fn is_over(&self) -> bool {
        self.pos.outcome().is_some()
    }

    /// PGN result token for a finished game ("1-0", "0-1", "1/2-1/2").
    pub fn result(&self) -> Option<&'static str> {
        match self.pos.outcome() {
            Some(Outcome::Decisive {
                winner: Color::White,
            }) => Some("1-0"),
            Some(Outcome::Decisive {
                winner: Color::Black,
            }) => Some("0-1"),
            Some(Outcome::Draw) => Some("1/2-1/2"),
            None => None,
        }
    }

    /// Short-form move history: numbered SAN movetext plus a result token.
    pub fn pgn(&self) -> String {
        let mut out = String::new();
        for (i, san) in self.sans.iter().enumerate() {
            if i % 2 == 0 {
                out.push_str(&format!("{}. ", i / 2 + 1));
            }
            out.push_str(san);
            out.push(' ');
        }
        out.push_str(self.result().unwrap_or("*"));
        out
    }

    /// Long-form move history, one UCI string per half-move.
    pub fn uci_history(&self) -> Vec<String> {
        self.ucis.clone()
    }

    /// Side and pawn-ness of the piece on a coordinate square, if any.
    pub fn piece_on(&self, square: &str) -> Option<(Side, bool)> {
        let sq = Square::from_ascii(square.as_bytes()).ok()?;
        let piece = self.pos.board().piece_at(sq)?;
        Some((Side::from(piece.color), piece.role == Role::Pawn))
    }

    /// Default a bare 4-char promotion move to queening, but only when the
    /// source square actually holds the mover's pawn one step from its final
    /// rank in the current position. Everything else passes through.
    pub fn default_promotion(&self, uci: &str) -> String {
        if uci.len() != 4 || !uci.is_ascii() {
            return uci.to_string();
        }
        let dest_rank = uci.as_bytes()[3];
        if dest_rank != b'1' && dest_rank != b'8' {
            return uci.to_string();
        }
        match self.piece_on(&uci[..2]) {
            Some((Side::White, true)) if dest_rank == b'8' => format!("{uci}q"),
            Some((Side::Black, true)) if dest_rank == b'1' => format!("{uci}q"),
            _ => uci.to_string(),
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-derive the long-form (UCI) move list from short-form (PGN) movetext by
/// replaying it from the starting position. Move numbers and result tokens
/// are skipped.
pub fn ucis_from_pgn(pgn: &str) -> Result<Vec<String>> {
    let mut pos = Chess::default();
    let mut out = Vec::new();
    for token in pgn.split_whitespace() {
        if token.ends_with('.') || matches!(token, "*" | "1-0" | "0-1" | "1/2-1/2") {
            continue;
        }
        let san: SanPlus = token
            .parse()
            .with_context(|| format!("invalid SAN token: {token}"))?;
        let m = san
            .san
            .to_move(&pos)
            .with_context(|| format!("SAN move does not apply: {token}"))?;
        out.push(m.to_uci(CastlingMode::Standard).to_string());
        pos.play_unchecked(&m);
    }
    Ok(out)
}
