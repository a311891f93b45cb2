//! Reading tempo votes out of the server's chat relay.
//!
//! The server's voting bot reports progress as plain chat, e.g.
//!
//! ```text
//! [voting system] leading candidate: 1/2 votes for 12 BPI [each vote expires in 60s]
//! ```
//!
//! [`VoteInterpreter::interpret`] turns such a line into a [`VoteProposal`] the user can be
//! asked to confirm.  Chat is untrusted text, so anything that doesn't match the expected shape
//! simply yields nothing.  The wording is the server's English; a relay that says it
//! differently produces no proposals.
//!
//! When we vote ourselves the server echoes a leading candidate line right back.  Offering
//! that to the user again would be silly, so every candidate line is ignored for a second
//! after we sent a `!vote`, whichever field it was for.
use log::{debug, trace};
use serde::Serialize;
use std::{fmt, str::FromStr};

use simple_error::SimpleError;

const VOTE_PREFIX: &str = "[voting system] leading candidate:";
const VOTE_COMMAND: &str = "!vote";
/// how long after our own vote candidate lines are ignored
pub const VOTE_DEBOUNCE_MSEC: u128 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VoteField {
    Bpi,
    Bpm,
}

impl FromStr for VoteField {
    type Err = SimpleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bpi" => Ok(VoteField::Bpi),
            "bpm" => Ok(VoteField::Bpm),
            _ => Err(SimpleError::new(format!("not a vote field: {}", s))),
        }
    }
}

impl fmt::Display for VoteField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VoteField::Bpi => write!(f, "bpi"),
            VoteField::Bpm => write!(f, "bpm"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteProposal {
    pub field: VoteField,
    pub value: u32,
    /// milliseconds since the epoch when the broadcast was seen
    pub observed_at: u128,
}

/// the chat command that casts a vote, `!vote bpm 120`
pub fn vote_command(field: VoteField, value: u32) -> String {
    format!("{} {} {}", VOTE_COMMAND, field, value)
}

pub struct VoteInterpreter {
    local_identity: String,
    last_vote_command: Option<u128>,
}

impl VoteInterpreter {
    pub fn new(local_identity: &str) -> VoteInterpreter {
        VoteInterpreter {
            local_identity: String::from(local_identity),
            last_vote_command: None,
        }
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    /// Remember that we just voted.
    pub fn note_vote_command(&mut self, now: u128) -> () {
        self.last_vote_command = Some(now);
    }

    fn is_debounced(&self, now: u128) -> bool {
        match self.last_vote_command {
            Some(at) => now.saturating_sub(at) < VOTE_DEBOUNCE_MSEC,
            None => false,
        }
    }

    /// Look at one chat line from `sender` seen at `now` (msec).
    pub fn interpret(&mut self, message: &str, sender: &str, now: u128) -> Option<VoteProposal> {
        let lower = message.trim().to_lowercase();
        if sender == self.local_identity && lower.contains(VOTE_COMMAND) {
            // our own vote going by on the relay
            self.note_vote_command(now);
            trace!("local vote command seen: {}", message);
        }
        if !lower.starts_with(VOTE_PREFIX) {
            return None;
        }
        let (field, value) = Self::parse_candidate(&lower[VOTE_PREFIX.len()..])?;
        if self.is_debounced(now) {
            debug!("ignoring {} candidate {} right after our own vote", field, value);
            return None;
        }
        Some(VoteProposal {
            field,
            value,
            observed_at: now,
        })
    }

    // "1/2 votes for 12 bpi [each vote expires in 60s]"
    fn parse_candidate(rest: &str) -> Option<(VoteField, u32)> {
        let mut tokens = rest.split_whitespace().skip_while(|t| *t != "for");
        tokens.next()?;
        let value = tokens.next()?.parse::<u32>().ok().filter(|v| *v > 0)?;
        let field = tokens.next()?.parse::<VoteField>().ok()?;
        Some((field, value))
    }
}

#[cfg(test)]
mod test_vote {
    use super::*;

    const BPI_LINE: &str =
        "[voting system] leading candidate: 1/2 votes for 12 BPI [each vote expires in 60s]";
    const BPM_LINE: &str =
        "[voting system] leading candidate: 2/3 votes for 140 BPM [each vote expires in 60s]";

    #[test]
    fn bpi_candidate() {
        let mut vi = VoteInterpreter::new("me");
        assert_eq!(
            vi.interpret(BPI_LINE, "server", 5000),
            Some(VoteProposal {
                field: VoteField::Bpi,
                value: 12,
                observed_at: 5000
            })
        );
    }

    #[test]
    fn bpm_candidate() {
        let mut vi = VoteInterpreter::new("me");
        let p = vi.interpret(BPM_LINE, "", 1).unwrap();
        assert_eq!(p.field, VoteField::Bpm);
        assert_eq!(p.value, 140);
    }

    #[test]
    fn case_does_not_matter() {
        let mut vi = VoteInterpreter::new("me");
        let p = vi
            .interpret("[Voting System] Leading Candidate: 1/1 votes for 9 bpi", "", 1)
            .unwrap();
        assert_eq!(p.field, VoteField::Bpi);
        assert_eq!(p.value, 9);
    }

    #[test]
    fn other_chat_is_ignored() {
        let mut vi = VoteInterpreter::new("me");
        assert_eq!(vi.interpret("hey, anyone for 120 bpm?", "bob", 1), None);
        assert_eq!(vi.interpret("", "bob", 1), None);
        assert_eq!(vi.interpret("[voting system] vote passed", "", 1), None);
    }

    #[test]
    fn malformed_candidates_fail_closed() {
        let mut vi = VoteInterpreter::new("me");
        let lines = [
            "[voting system] leading candidate: 1/2 votes for twelve BPI",
            "[voting system] leading candidate: 1/2 votes for 0 BPI",
            "[voting system] leading candidate: 1/2 votes for -4 BPM",
            "[voting system] leading candidate: 1/2 votes for 12 BARS",
            "[voting system] leading candidate: 1/2 votes for 12",
            "[voting system] leading candidate: 1/2 votes",
        ];
        for line in lines {
            assert_eq!(vi.interpret(line, "", 1), None, "{}", line);
        }
    }

    #[test]
    fn debounce_after_our_vote() {
        let mut vi = VoteInterpreter::new("me");
        vi.note_vote_command(10_000);
        assert_eq!(vi.interpret(BPI_LINE, "", 10_500), None);
        assert!(vi.interpret(BPI_LINE, "", 11_500).is_some());
    }

    #[test]
    fn debounce_covers_both_fields() {
        let mut vi = VoteInterpreter::new("me");
        vi.note_vote_command(10_000);
        assert_eq!(vi.interpret(BPI_LINE, "", 10_100), None);
        assert_eq!(vi.interpret(BPM_LINE, "", 10_100), None);
        assert!(vi.interpret(BPI_LINE, "", 11_000).is_some());
    }

    #[test]
    fn our_vote_echo_on_the_relay() {
        let mut vi = VoteInterpreter::new("me@10.0.0.x");
        assert_eq!(vi.interpret("!vote bpm 140", "me@10.0.0.x", 2_000), None);
        assert_eq!(vi.interpret(BPM_LINE, "", 2_400), None);
        // a bpi candidate right after our bpm vote is held back too
        assert_eq!(vi.interpret(BPI_LINE, "", 2_400), None);
        // somebody else voting does not debounce anything
        assert_eq!(vi.interpret("!vote bpi 12", "bob", 3_000), None);
        assert!(vi.interpret(BPI_LINE, "", 3_100).is_some());
    }

    #[test]
    fn command_text() {
        assert_eq!(vote_command(VoteField::Bpm, 120), "!vote bpm 120");
        assert_eq!(vote_command(VoteField::Bpi, 8), "!vote bpi 8");
    }
}
