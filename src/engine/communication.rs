use log::{trace, warn};
use vampirc_uci::{parse_one, uci::ScoreValue, UciInfoAttribute, UciMessage, UciOptionConfig};

use super::types::{Score, MULTIPV_OPTION};

/// One structured event extracted from a line of engine output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciEvent {
    /// `uciok`
    UciAck,
    /// `readyok`
    ReadyAck,
    /// `info ... multipv N ... score ... pv <move> ...`
    Candidate {
        rank: u8,
        uci_move: String,
        score: Option<Score>,
        depth: Option<u32>,
    },
    /// `info ... score ...` with no principal variation, as sent for mated
    /// or stalemated positions
    Evaluation {
        rank: u8,
        score: Score,
        depth: Option<u32>,
    },
    /// `bestmove <move>`; `None` for `bestmove (none)`. The token is passed
    /// through unvalidated so the session can fail the request with it.
    Terminal { uci_move: Option<String> },
    /// `error ...`
    EngineError { message: String },
    /// `id name ...` / `id author ...`
    Identity {
        name: Option<String>,
        author: Option<String>,
    },
    /// `option name MultiPV type spin ... max N`
    OptionDeclared { name: String, max: Option<i64> },
}

/// True for `[a-h][1-8][a-h][1-8]` with an optional `q`, `r`, `b` or `n`
pub fn is_move_token(token: &str) -> bool {
    let bytes = token.as_bytes();
    let is_square = |file: u8, rank: u8| (b'a'..=b'h').contains(&file) && (b'1'..=b'8').contains(&rank);

    match bytes.len() {
        4 => is_square(bytes[0], bytes[1]) && is_square(bytes[2], bytes[3]),
        5 => {
            is_square(bytes[0], bytes[1])
                && is_square(bytes[2], bytes[3])
                && matches!(bytes[4], b'q' | b'r' | b'b' | b'n')
        }
        _ => false,
    }
}

/// Parse one raw engine line. Stateless; multipv accumulation lives in the session.
pub fn parse_line(line: &str) -> Option<UciEvent> {
    let line = line.trim();
    let mut tokens = line.split_whitespace();
    let head = tokens.next()?;

    match head {
        "bestmove" => {
            let uci_move = match tokens.next() {
                None | Some("(none)") | Some("0000") => None,
                Some(token) => Some(token.to_string()),
            };
            return Some(UciEvent::Terminal { uci_move });
        }
        "info" => {
            // Checked on the raw text so a bad move never degrades into a score-only event
            let mut rest = line.split_whitespace().skip(1).peekable();
            if rest.peek() != Some(&"string") {
                if let Some(token) = rest.skip_while(|t| *t != "pv").nth(1) {
                    if !is_move_token(token) {
                        warn!("Discarding info line with malformed pv token '{}': {}", token, line);
                        return None;
                    }
                }
            }
        }
        _ if head.eq_ignore_ascii_case("error") || head.eq_ignore_ascii_case("error:") => {
            let message = line[head.len()..].trim().to_string();
            return Some(UciEvent::EngineError { message });
        }
        _ => {}
    }

    match parse_one(line) {
        UciMessage::UciOk => Some(UciEvent::UciAck),
        UciMessage::ReadyOk => Some(UciEvent::ReadyAck),
        UciMessage::Info(attrs) => parse_info(attrs, line),
        UciMessage::Id { name, author } => Some(UciEvent::Identity { name, author }),
        UciMessage::Option(UciOptionConfig::Spin { name, max, .. }) if name.eq_ignore_ascii_case(MULTIPV_OPTION) => {
            Some(UciEvent::OptionDeclared { name, max: max.map(|v| v as i64) })
        }
        _ => {
            trace!("Ignoring engine line: {}", line);
            None
        }
    }
}

fn parse_info(attrs: Vec<UciInfoAttribute>, line: &str) -> Option<UciEvent> {
    let mut rank: u16 = 1;
    let mut score = None;
    let mut depth = None;
    let mut first_move = None;

    for attr in attrs {
        match attr {
            UciInfoAttribute::MultiPv(multipv) => rank = multipv as u16,
            UciInfoAttribute::Depth(d) => depth = Some(d as u32),
            UciInfoAttribute::Score(s) => {
                score = Some(match s.value {
                    ScoreValue::Cp(cp) => Score::Centipawns(cp as i32),
                    ScoreValue::Mate(n) => Score::MateIn(n as i32),
                });
            }
            UciInfoAttribute::Pv(moves) => {
                first_move = moves.first().map(|mv| mv.to_string());
            }
            _ => {}
        }
    }

    let Ok(rank) = u8::try_from(rank) else {
        warn!("Discarding info line with out-of-range multipv {}: {}", rank, line);
        return None;
    };
    if rank == 0 {
        return None;
    }

    // `info string`, `currmove` and friends carry neither a pv nor a score
    let Some(uci_move) = first_move else {
        return score.map(|score| UciEvent::Evaluation { rank, score, depth });
    };
    if !is_move_token(&uci_move) {
        warn!("Discarding info line with malformed pv token '{}': {}", uci_move, line);
        return None;
    }

    Some(UciEvent::Candidate {
        rank,
        uci_move,
        score,
        depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_acks() {
        assert_eq!(parse_line("uciok"), Some(UciEvent::UciAck));
        assert_eq!(parse_line("readyok\n"), Some(UciEvent::ReadyAck));
    }

    #[test]
    fn multipv_candidate() {
        let event = parse_line("info depth 8 seldepth 10 multipv 2 score cp -17 nodes 4000 nps 90000 pv d2d4 d7d5 c2c4");
        assert_eq!(
            event,
            Some(UciEvent::Candidate {
                rank: 2,
                uci_move: "d2d4".to_string(),
                score: Some(Score::Centipawns(-17)),
                depth: Some(8),
            })
        );
    }

    #[test]
    fn mate_score_candidate() {
        let event = parse_line("info depth 12 multipv 1 score mate -3 pv e1f1 d8d1");
        assert!(matches!(
            event,
            Some(UciEvent::Candidate { rank: 1, score: Some(Score::MateIn(-3)), .. })
        ));
    }

    #[test]
    fn candidate_without_multipv_is_rank_one() {
        let event = parse_line("info depth 3 score cp 40 pv g1f3");
        assert!(matches!(event, Some(UciEvent::Candidate { rank: 1, .. })));
    }

    #[test]
    fn promotion_candidate() {
        let event = parse_line("info depth 5 multipv 1 score cp 800 pv a7a8q");
        assert!(matches!(event, Some(UciEvent::Candidate { ref uci_move, .. }) if uci_move == "a7a8q"));
    }

    #[test]
    fn malformed_pv_token_is_dropped() {
        assert_eq!(parse_line("info depth 5 multipv 1 score cp 10 pv e2e9"), None);
        assert_eq!(parse_line("info depth 5 multipv 1 score cp 10 pv e7e8k"), None);
        assert_eq!(parse_line("info depth 5 multipv 2 score cp 10 pv zz e2e4"), None);
    }

    #[test]
    fn info_without_pv_is_ignored() {
        assert_eq!(parse_line("info depth 10 currmove e2e4 currmovenumber 1"), None);
        assert_eq!(parse_line("info string NNUE evaluation enabled"), None);
    }

    #[test]
    fn score_without_pv() {
        assert_eq!(
            parse_line("info depth 0 score mate 0"),
            Some(UciEvent::Evaluation { rank: 1, score: Score::MateIn(0), depth: Some(0) })
        );
    }

    #[test]
    fn bestmove_lines() {
        assert_eq!(
            parse_line("bestmove e2e4 ponder e7e5"),
            Some(UciEvent::Terminal { uci_move: Some("e2e4".to_string()) })
        );
        assert_eq!(parse_line("bestmove (none)"), Some(UciEvent::Terminal { uci_move: None }));
        assert_eq!(
            parse_line("bestmove zz99"),
            Some(UciEvent::Terminal { uci_move: Some("zz99".to_string()) })
        );
    }

    #[test]
    fn error_lines() {
        assert_eq!(
            parse_line("error: NNUE file not found"),
            Some(UciEvent::EngineError { message: "NNUE file not found".to_string() })
        );
        assert_eq!(
            parse_line("ERROR bad command"),
            Some(UciEvent::EngineError { message: "bad command".to_string() })
        );
    }

    #[test]
    fn identity_and_options() {
        assert_eq!(
            parse_line("id name Stockfish 16"),
            Some(UciEvent::Identity { name: Some("Stockfish 16".to_string()), author: None })
        );
        assert_eq!(
            parse_line("option name MultiPV type spin default 1 min 1 max 500"),
            Some(UciEvent::OptionDeclared { name: "MultiPV".to_string(), max: Some(500) })
        );
        assert_eq!(parse_line("option name Hash type spin default 16 min 1 max 33554432"), None);
    }

    #[test]
    fn noise_is_ignored() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("Stockfish 16 by the Stockfish developers"), None);
    }

    #[test]
    fn move_token_shape() {
        for ok in ["e2e4", "a7a8q", "h1a8", "b2b1n"] {
            assert!(is_move_token(ok), "{ok}");
        }
        for bad in ["", "e2e", "e2e9", "i2e4", "e7e8k", "e2e4qq", "0000", "E2E4"] {
            assert!(!is_move_token(bad), "{bad}");
        }
    }
}
