//! What the session needs from the network layer.
//!
//! Login, room discovery and the wire protocol live elsewhere.  The session only ever asks
//! the connection to put a vote or a chat line on the server, through [`SessionTransport`].
use log::info;

use super::vote::{vote_command, VoteField};
use crate::common::box_error::BoxError;

#[cfg_attr(test, mockall::automock)]
pub trait SessionTransport: Send {
    fn send_vote_command(&mut self, field: VoteField, value: u32) -> Result<(), BoxError>;
    fn send_chat_message(&mut self, text: &str) -> Result<(), BoxError>;
}

/// Transport for servers that take votes as plain chat commands.  Everything ends up as a
/// chat line handed to `send`.
pub struct ChatTransport<F>
where
    F: FnMut(&str) -> Result<(), BoxError> + Send,
{
    send: F,
}

impl<F> ChatTransport<F>
where
    F: FnMut(&str) -> Result<(), BoxError> + Send,
{
    pub fn new(send: F) -> ChatTransport<F> {
        ChatTransport { send }
    }
}

impl<F> SessionTransport for ChatTransport<F>
where
    F: FnMut(&str) -> Result<(), BoxError> + Send,
{
    fn send_vote_command(&mut self, field: VoteField, value: u32) -> Result<(), BoxError> {
        (self.send)(&vote_command(field, value))
    }
    fn send_chat_message(&mut self, text: &str) -> Result<(), BoxError> {
        (self.send)(text)
    }
}

/// no server at all, just log.  Offline rendering uses this.
pub struct OfflineTransport;

impl SessionTransport for OfflineTransport {
    fn send_vote_command(&mut self, field: VoteField, value: u32) -> Result<(), BoxError> {
        info!("offline, vote not sent: {} {}", field, value);
        Ok(())
    }
    fn send_chat_message(&mut self, text: &str) -> Result<(), BoxError> {
        info!("offline, chat not sent: {}", text);
        Ok(())
    }
}
