//! Join sequence for a game session

use firedeck_net::{listen, on_disconnect_put, put, server_timestamp, Result, Transport};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Join `game_id` as a fresh participant: subscribe to the game
/// document, announce the participant record, register the server-side
/// offline marker, then flip the presence flag. Each command awaits its
/// acknowledgement before the next is sent.
pub async fn join(transport: &Transport, game_id: &str, display_name: &str) -> Result<()> {
    let participant_id = Uuid::new_v4().to_string();
    info!(game_id, participant_id = %participant_id, "joining game");

    let game_path = format!("/games/{game_id}");
    let participant_path = format!("{game_path}/participants/{participant_id}");
    let online_path = format!("{participant_path}/online");

    transport.send(1, listen(1, &game_path)).await?;
    transport
        .send(
            2,
            put(
                2,
                &participant_path,
                json!({"id": participant_id, "fullname": display_name}),
            ),
        )
        .await?;
    transport
        .send(3, on_disconnect_put(3, &online_path, server_timestamp()))
        .await?;
    transport.send(4, put(4, &online_path, json!(true))).await?;

    info!(game_id, "joined");
    Ok(())
}
