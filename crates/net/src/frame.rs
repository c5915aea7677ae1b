//! Frame decoder
//!
//! Turns one raw inbound payload into one typed value. Pure and
//! stateless; the transport's read loop runs every frame through
//! [`decode`] and dispatches on the result.
//!
//! The protocol overloads a single data-frame shape to carry
//! acknowledgements and arbitrary key-path mutations, and reuses the
//! game path for both full snapshots and nested single-key presence
//! diffs. Classification order is binding: a positive reference always
//! means acknowledgement, longer path patterns are matched before
//! shorter ones, and the snapshot interpretation runs before the
//! single-key fallback.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    Acknowledgement, Body, ControlFrame, DataFrame, Frame, GameState, Handshake, Participant,
    Presence,
};

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Handshake(Handshake),
    Acknowledgement(Acknowledgement),
    Participant(Participant),
    Presence(Presence),
    Game(GameState),
}

/// Where a data frame's path points.
enum Target {
    Game,
    Participant,
    Online(String),
}

/// Decode one raw inbound frame into a typed value.
pub fn decode(bytes: &[u8]) -> Result<Inbound> {
    let frame: Frame = match serde_json::from_slice(bytes) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "unable to parse frame envelope");
            return Err(Error::UnknownMessage);
        }
    };

    match frame.kind.as_str() {
        "c" => decode_control(frame.data),
        "d" => decode_data(frame.data),
        _ => Err(Error::UnknownMessage),
    }
}

fn decode_control(data: Option<Value>) -> Result<Inbound> {
    let control: ControlFrame = serde_json::from_value(data.ok_or(Error::UnknownMessage)?)?;

    match control.kind.as_str() {
        "h" => {
            let handshake: Handshake =
                serde_json::from_value(control.data.ok_or(Error::UnknownMessage)?)?;
            Ok(Inbound::Handshake(handshake))
        }
        _ => Err(Error::UnknownMessage),
    }
}

fn decode_data(data: Option<Value>) -> Result<Inbound> {
    let frame: DataFrame = serde_json::from_value(data.ok_or(Error::UnknownMessage)?)?;

    // A positive reference makes this an acknowledgement, regardless of
    // what else the frame carries.
    if frame.reference > 0 {
        let body: Body = serde_json::from_value(frame.body.ok_or(Error::UnknownMessage)?)?;
        return Ok(Inbound::Acknowledgement(Acknowledgement {
            reference: frame.reference,
            status: body.status.unwrap_or_default(),
        }));
    }

    if let Some(inline) = &frame.data {
        debug!(payload = %inline, "data frame carries an inline payload, ignoring");
    }

    let body: Body = serde_json::from_value(frame.body.ok_or(Error::UnknownMessage)?)?;
    let payload = body.data.ok_or(Error::UnknownMessage)?;

    match classify(&body.path) {
        Some(Target::Online(id)) => decode_presence(id, payload),
        Some(Target::Participant) => Ok(Inbound::Participant(serde_json::from_value(payload)?)),
        Some(Target::Game) => decode_game(payload),
        None => Err(Error::UnknownMessage),
    }
}

/// Match a path against the three recognized patterns, most specific
/// first. Anything else is unknown.
fn classify(path: &str) -> Option<Target> {
    let segments: Vec<&str> = path.split('/').collect();

    match segments.as_slice() {
        ["games", game, "participants", participant, "online"]
            if is_key(game) && is_key(participant) =>
        {
            Some(Target::Online((*participant).to_string()))
        }
        ["games", game, "participants", participant] if is_key(game) && is_key(participant) => {
            Some(Target::Participant)
        }
        ["games", game] if is_key(game) => Some(Target::Game),
        _ => None,
    }
}

/// Ids on this wire are lowercase-hex uuid-ish strings.
fn is_key(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f' | b'-'))
}

/// The payload at an `online` path is either the literal boolean
/// "online right now" or an epoch timestamp of the last sighting.
fn decode_presence(id: String, payload: Value) -> Result<Inbound> {
    let presence = match payload {
        Value::Bool(online) => Presence {
            id,
            online,
            last_seen: None,
        },
        Value::Number(number) => {
            let seconds = number
                .as_i64()
                .ok_or_else(|| Error::Decode(format!("presence timestamp {number} is not an integer")))?;
            Presence {
                id,
                online: false,
                last_seen: Some(epoch(seconds)?),
            }
        }
        other => {
            return Err(Error::Decode(format!(
                "presence payload is neither boolean nor timestamp: {other}"
            )))
        }
    };

    Ok(Inbound::Presence(presence))
}

fn decode_game(payload: Value) -> Result<Inbound> {
    // Try the full snapshot first. An all-defaults result means the
    // payload did not actually describe a document, in which case the
    // same path may carry a nested single-key presence diff instead.
    let state = match serde_json::from_value::<GameState>(payload.clone()) {
        Ok(state) => state,
        Err(err) => {
            debug!(error = %err, "payload is not a game snapshot");
            GameState::default()
        }
    };
    if state != GameState::default() {
        return Ok(Inbound::Game(state));
    }

    let Ok(entries) = serde_json::from_value::<HashMap<String, i64>>(payload) else {
        return Err(Error::UnknownMessage);
    };
    let mut entries = entries.into_iter();
    let Some((key, seconds)) = entries.next() else {
        return Err(Error::UnknownMessage);
    };
    if entries.next().is_some() {
        return Err(Error::UnknownMessage);
    }

    // The single key is itself a sub-path below the game.
    match key.split('/').collect::<Vec<_>>().as_slice() {
        ["participants", participant, "online"] if is_key(participant) => {
            Ok(Inbound::Presence(Presence {
                id: (*participant).to_string(),
                online: false,
                last_seen: Some(epoch(seconds)?),
            }))
        }
        _ => Err(Error::UnknownMessage),
    }
}

fn epoch(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| Error::Decode(format!("timestamp {seconds} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAME: &str = "d2538816-2f8e-a8b0-6534-30857b5e932d";
    const ADMIN: &str = "31d8c788-0105-7854-e577-f08aa28a9024";
    const JOHN: &str = "b01f4c74-9eef-86aa-ac09-02a727ca1d31";
    const CLI: &str = "fe24478e-0161-0c97-18ef-ab569207ac44";

    fn participant(id: &str, full_name: &str, has_voted: bool) -> Participant {
        Participant {
            id: id.to_string(),
            full_name: full_name.to_string(),
            has_voted,
        }
    }

    #[test]
    fn test_decode_handshake() {
        let raw = r#"{"t":"c","d":{"t":"h","d":{"ts":1754538609500,"v":"5","h":"s-usc1b-nss-2107.firebaseio.com","s":"8BOJ3puMQW7hbsaOWidnRG6mmc4BOLdl"}}}"#;

        let decoded = decode(raw.as_bytes()).unwrap();

        assert_eq!(
            decoded,
            Inbound::Handshake(Handshake {
                timestamp: 1754538609500,
                version: "5".to_string(),
                host: "s-usc1b-nss-2107.firebaseio.com".to_string(),
                session_id: "8BOJ3puMQW7hbsaOWidnRG6mmc4BOLdl".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_acknowledgement() {
        let raw = r#"{"t":"d","d":{"r":1,"b":{"p":"","s":"ok"}}}"#;

        let decoded = decode(raw.as_bytes()).unwrap();

        assert_eq!(
            decoded,
            Inbound::Acknowledgement(Acknowledgement {
                reference: 1,
                status: "ok".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_acknowledgement_error_status() {
        let raw = r#"{"t":"d","d":{"r":2,"b":{"p":"","s":"permission_denied"}}}"#;

        let decoded = decode(raw.as_bytes()).unwrap();

        match decoded {
            Inbound::Acknowledgement(ack) => {
                assert_eq!(ack.reference, 2);
                assert_eq!(ack.status, "permission_denied");
                assert!(!ack.is_ok());
            }
            other => panic!("expected acknowledgement, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_takes_priority_over_path() {
        // A referenced frame is an acknowledgement even when its body
        // carries a recognizable path
        let raw = format!(
            r#"{{"t":"d","d":{{"r":9,"b":{{"p":"games/{GAME}","s":"ok"}}}}}}"#
        );

        let decoded = decode(raw.as_bytes()).unwrap();

        assert!(matches!(decoded, Inbound::Acknowledgement(ref ack) if ack.reference == 9));
    }

    #[test]
    fn test_decode_participant() {
        let raw = format!(
            r#"{{"t":"d","d":{{"b":{{"p":"games/{GAME}/participants/ff7f32af-455c-45e1-601d-79e6488d6887","d":{{"fullname":"John Doe","id":"ff7f32af-455c-45e1-601d-79e6488d6887"}}}}}}}}"#
        );

        let decoded = decode(raw.as_bytes()).unwrap();

        assert_eq!(
            decoded,
            Inbound::Participant(participant(
                "ff7f32af-455c-45e1-601d-79e6488d6887",
                "John Doe",
                false,
            ))
        );
    }

    #[test]
    fn test_decode_presence_online() {
        let raw = format!(
            r#"{{"t":"d","d":{{"b":{{"p":"games/{GAME}/participants/{ADMIN}/online","d":true}}}}}}"#
        );

        let decoded = decode(raw.as_bytes()).unwrap();

        assert_eq!(
            decoded,
            Inbound::Presence(Presence {
                id: ADMIN.to_string(),
                online: true,
                last_seen: None,
            })
        );
    }

    #[test]
    fn test_decode_presence_last_seen() {
        let raw = format!(
            r#"{{"t":"d","d":{{"b":{{"p":"games/{GAME}/participants/{ADMIN}/online","d":1755217636141}}}}}}"#
        );

        let decoded = decode(raw.as_bytes()).unwrap();

        assert_eq!(
            decoded,
            Inbound::Presence(Presence {
                id: ADMIN.to_string(),
                online: false,
                last_seen: DateTime::from_timestamp(1755217636141, 0),
            })
        );
    }

    #[test]
    fn test_decode_game_state() {
        let raw = format!(
            r#"{{"t":"d","d":{{"b":{{"p":"games/{GAME}","d":{{
                "deck": 0,
                "description": "The Game Description",
                "estimate": {{"id":1,"title":"Story 2","status":"active","results":{{"0":{{"points":8,"user":{{"id":"{JOHN}","fullname":"John"}}}}}}}},
                "name": "The Game Name",
                "owner": {{"id":"{ADMIN}","fullname":"Admin"}},
                "participants": {{
                    "{ADMIN}": {{"id":"{ADMIN}","fullname":"Admin"}},
                    "{JOHN}": {{"id":"{JOHN}","fullname":"John","hasVoted":true}},
                    "{CLI}": {{"id":"{CLI}","fullname":"go-cli"}}
                }},
                "status": "active",
                "stories": {{
                    "0": {{"id":0,"title":"Story 1","status":"queue"}},
                    "1": {{"id":1,"title":"Story 2","status":"active"}},
                    "2": {{"title":"Story 2","status":"queue"}}
                }}
            }}}}}}}}"#
        );

        let decoded = decode(raw.as_bytes()).unwrap();

        let Inbound::Game(state) = decoded else {
            panic!("expected a game snapshot");
        };

        assert_eq!(state.name, "The Game Name");
        assert_eq!(state.description, "The Game Description");
        assert_eq!(state.status, "active");
        assert_eq!(state.deck, 0);
        assert_eq!(state.owner, participant(ADMIN, "Admin", false));

        let mut keys: Vec<&str> = state.participants.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![ADMIN, JOHN, CLI]);
        assert_eq!(state.participants[JOHN], participant(JOHN, "John", true));

        assert_eq!(state.stories.len(), 3);
        assert_eq!(state.stories["0"].title, "Story 1");
        assert_eq!(state.stories["1"].status, "active");
        assert_eq!(state.stories["2"].id, 0);

        assert_eq!(state.estimate.id, 1);
        assert_eq!(state.estimate.title, "Story 2");
        assert_eq!(state.estimate.results.len(), 1);
        assert_eq!(state.estimate.results["0"].points, 8);
        assert_eq!(state.estimate.results["0"].user, participant(JOHN, "John", false));
    }

    #[test]
    fn test_decode_offline_diff_at_game_path() {
        // An offline notification arrives at the game path as a
        // single-key map whose key is itself a sub-path
        let raw = format!(
            r#"{{"t":"d","d":{{"b":{{"p":"games/{GAME}","d":{{"participants/ff7f32af-455c-45e1-601d-79e6488d6887/online":1755365240769}}}}}}}}"#
        );

        let decoded = decode(raw.as_bytes()).unwrap();

        assert_eq!(
            decoded,
            Inbound::Presence(Presence {
                id: "ff7f32af-455c-45e1-601d-79e6488d6887".to_string(),
                online: false,
                last_seen: DateTime::from_timestamp(1755365240769, 0),
            })
        );
    }

    #[test]
    fn test_empty_document_is_not_a_snapshot() {
        let raw = format!(r#"{{"t":"d","d":{{"b":{{"p":"games/{GAME}","d":{{}}}}}}}}"#);

        assert!(matches!(
            decode(raw.as_bytes()),
            Err(Error::UnknownMessage)
        ));
    }

    #[test]
    fn test_multi_entry_diff_rejected() {
        let raw = format!(
            r#"{{"t":"d","d":{{"b":{{"p":"games/{GAME}","d":{{"participants/{ADMIN}/online":1,"participants/{JOHN}/online":2}}}}}}}}"#
        );

        assert!(matches!(
            decode(raw.as_bytes()),
            Err(Error::UnknownMessage)
        ));
    }

    #[test]
    fn test_presence_payload_of_unexpected_type() {
        let raw = format!(
            r#"{{"t":"d","d":{{"b":{{"p":"games/{GAME}/participants/{ADMIN}/online","d":"soon"}}}}}}"#
        );

        assert!(matches!(decode(raw.as_bytes()), Err(Error::Decode(_))));
    }

    #[test]
    fn test_unknown_frames_rejected() {
        for raw in [
            "not json at all",
            "0",
            r#"{"t":"q"}"#,
            r#"{"t":"c","d":{"t":"x","d":{}}}"#,
            r#"{"t":"d","d":{}}"#,
            r#"{"t":"d","d":{"b":{"p":"users/abc","d":true}}}"#,
        ] {
            assert!(
                matches!(decode(raw.as_bytes()), Err(Error::UnknownMessage)),
                "expected unknown message for {raw}"
            );
        }
    }

    #[test]
    fn test_malformed_handshake_is_a_decode_error() {
        let raw = r#"{"t":"c","d":{"t":"h","d":{"ts":"not-a-number"}}}"#;

        assert!(matches!(decode(raw.as_bytes()), Err(Error::Decode(_))));
    }
}
