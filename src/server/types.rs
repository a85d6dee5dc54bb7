use serde::{Deserialize, Serialize};

use crate::chat::ChatEvent;

/// クライアントからのコマンド
///
/// `{"event": "join_twitch", "data": "channel"}` の形式。引数のないコマンドは `data` を省略できる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinTwitch(String),
    LeaveTwitch,
    JoinYoutube(String),
    LeaveYoutube,
    DisconnectChannels,
    ChangeVoice(String),
    MuteUser(String),
    UnmuteUser(String),
}

/// セッションへ送るイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    SystemMsg(String),
    TwitchConnected(String),
    TwitchDisconnected,
    YoutubeConnected(String),
    YoutubeDisconnected,
    ChatMessage(ChatEvent),
    BlocklistUpdate(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Platform;
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        let join: ClientCommand = serde_json::from_str(r#"{"event":"join_twitch","data":"shroud"}"#).unwrap();
        assert_eq!(join, ClientCommand::JoinTwitch("shroud".to_string()));

        let leave: ClientCommand = serde_json::from_str(r#"{"event":"leave_youtube"}"#).unwrap();
        assert_eq!(leave, ClientCommand::LeaveYoutube);

        let voice: ClientCommand =
            serde_json::from_str(r#"{"event":"change_voice","data":"en-US-Neural2-C"}"#).unwrap();
        assert_eq!(voice, ClientCommand::ChangeVoice("en-US-Neural2-C".to_string()));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"event":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>(r#"{"event":"mute_user"}"#).is_err());
    }

    #[test]
    fn test_chat_message_wire_format() {
        let event = ServerEvent::ChatMessage(ChatEvent {
            platform: Platform::Youtube,
            user: "Alice".to_string(),
            text: "hi".to_string(),
            audio: None,
            id: 1_700_000_000_000,
        });

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "chat_message",
                "data": {
                    "platform": "youtube",
                    "user": "Alice",
                    "text": "hi",
                    "audio": null,
                    "id": 1_700_000_000_000i64
                }
            })
        );
    }

    #[test]
    fn test_status_events_wire_format() {
        assert_eq!(
            serde_json::to_value(ServerEvent::TwitchDisconnected).unwrap(),
            json!({"event": "twitch_disconnected"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::BlocklistUpdate(vec!["bob".to_string()])).unwrap(),
            json!({"event": "blocklist_update", "data": ["bob"]})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::SystemMsg("x".to_string())).unwrap(),
            json!({"event": "system_msg", "data": "x"})
        );
    }
}
