//! Handlers that report on the demo itself rather than the game: which
//! events it contains and who played in it.

use std::collections::{BTreeMap, HashMap};

use super::gameevent::{
    EventDecoder, CHAT_MESSAGE_EVENT, CHAT_MESSAGE_EVENT_ID, SERVER_CVAR_EVENT, SERVER_CVAR_EVENT_ID,
    USER_MESSAGE_SAY_TEXT2,
};
use super::message::{Message, MessageType};
use super::state::ParserState;
use super::stringtable::{parse_player_info, StringTableEntry, TABLE_USERINFO};
use super::MessageHandler;
use crate::errors::ReadResult;
use crate::types::entities::PlayerInfo;
use crate::types::events::EventListing;
use crate::types::{DemoTick, UserId};

/// Counts game events by id without decoding their fields.
#[derive(Default, Debug)]
pub struct EventGatherer {
    occurrences: HashMap<u16, usize>,
}

impl MessageHandler for EventGatherer {
    type Output = Vec<EventListing>;

    fn does_handle(message_type: MessageType) -> bool {
        matches!(
            message_type,
            MessageType::GameEvent | MessageType::SetConVar | MessageType::UserMessage
        )
    }

    fn handle_message(&mut self, message: &Message, _tick: DemoTick, _state: &ParserState) -> ReadResult<()> {
        match message {
            Message::GameEvent(raw) => {
                *self.occurrences.entry(EventDecoder::peek_id(raw)?).or_default() += 1;
            }
            // one server_cvar event per variable
            Message::SetConVar(vars) => {
                *self.occurrences.entry(SERVER_CVAR_EVENT_ID).or_default() += vars.len();
            }
            Message::UserMessage { kind, .. } if *kind == USER_MESSAGE_SAY_TEXT2 => {
                *self.occurrences.entry(CHAT_MESSAGE_EVENT_ID).or_default() += 1;
            }
            _ => {}
        }
        Ok(())
    }

    /// Every described event, including ones that never occurred, then the
    /// synthetic events that did occur.
    fn into_output(self, state: &ParserState) -> Self::Output {
        let described = state.events.descriptors().map(|descriptor| EventListing {
            id: descriptor.id,
            name: descriptor.name.clone(),
            occurrences: self.occurrences.get(&descriptor.id).copied().unwrap_or_default(),
        });
        let synthetic = [
            (SERVER_CVAR_EVENT_ID, SERVER_CVAR_EVENT),
            (CHAT_MESSAGE_EVENT_ID, CHAT_MESSAGE_EVENT),
        ]
        .into_iter()
        .filter_map(|(id, name)| {
            let occurrences = self.occurrences.get(&id).copied().filter(|count| *count > 0)?;
            Some(EventListing {
                id,
                name: name.to_string(),
                occurrences,
            })
        });
        described.chain(synthetic).collect()
    }
}

/// Everyone who had a `userinfo` entry at any point, by user id.
#[derive(Default, Debug)]
pub struct PlayerGatherer {
    players: BTreeMap<UserId, PlayerInfo>,
}

impl MessageHandler for PlayerGatherer {
    type Output = Vec<PlayerInfo>;

    fn does_handle(_message_type: MessageType) -> bool {
        false
    }

    fn handle_string_entry(&mut self, table: &str, index: usize, entry: &StringTableEntry, _state: &ParserState) {
        if table != TABLE_USERINFO {
            return;
        }
        let Some(data) = entry.user_data.as_deref().filter(|data| !data.is_empty()) else {
            return;
        };
        // the state already warned about entries it could not parse
        if let Ok(info) = parse_player_info(index, data) {
            self.players.insert(info.user_id, info);
        }
    }

    fn into_output(self, _state: &ParserState) -> Self::Output {
        self.players.into_values().collect()
    }
}
