//! Structure used to pass control messages to a session from a websocket
//!
//! A ParamMessage is a [`ControlParam`] plus some values.  Which of the values mean anything
//! depends on the param:
//!
//! | param | iValue1 | iValue2 | fValue | sValue |
//! |---|---|---|---|---|
//! | SetTrackLevel | track | | slider 0.0 - 1.41 | |
//! | SetTrackGain | track | | gain 0.0 - 4.0 | |
//! | SetTrackPan | track | | -1.0 - 1.0 | |
//! | SetTrackMute, SetTrackSolo | track | 0 or 1 | | |
//! | SetMasterVolume | | | gain | |
//! | ProposeVote | value | | | "bpi" or "bpm" |
//! | SendChat | | | | text |
//! | SetBeatsPerAccent | beats | | | |
//! | SetProcessorBypass | track | processor | 0.0 or 1.0 | |
//! | RemoveProcessor | track | processor | | |
//!
//! Numbers may also come in as strings, the UI is not picky about that.
use num::{FromPrimitive, ToPrimitive};
use serde_json::json;
use simple_error::bail;
use std::fmt;

use super::{handle::SessionHandle, vote::VoteField};
use crate::{
    common::box_error::BoxError,
    sound::track::{TrackId, LOCAL_INPUT_TRACK_ID, METRONOME_TRACK_ID, ROOM_STREAM_TRACK_ID},
};

#[derive(FromPrimitive, ToPrimitive, PartialEq, Debug, Clone, Copy)]
#[num_traits = "num"]
pub enum ControlParam {
    SetTrackLevel = 0,
    SetTrackGain,
    SetTrackPan,
    SetTrackMute,
    SetTrackSolo,
    SetMasterVolume,
    ProposeVote,
    SendChat,
    StartSession,
    StopSession,
    SetBeatsPerAccent,
    StopRoomStream,
    SetProcessorBypass,
    RemoveProcessor,
    GetStatus,
}

#[derive(Debug)]
pub struct ParamMessage {
    pub param: ControlParam,
    pub ivalue_1: i64,
    pub ivalue_2: i64,
    pub fvalue: f64,
    pub svalue: String,
}

fn int_value(raw: &serde_json::Value, key: &str) -> Result<Option<i64>, BoxError> {
    if let Some(v) = raw[key].as_i64() {
        return Ok(Some(v));
    }
    match raw[key].as_str() {
        Some(s) => Ok(Some(str::parse(s.trim())?)),
        None => Ok(None),
    }
}

fn float_value(raw: &serde_json::Value, key: &str) -> Result<Option<f64>, BoxError> {
    if let Some(v) = raw[key].as_f64() {
        return Ok(Some(v));
    }
    match raw[key].as_str() {
        Some(s) => Ok(Some(str::parse(s.trim())?)),
        None => Ok(None),
    }
}

fn track_id(v: i64) -> Result<TrackId, BoxError> {
    match TrackId::try_from(v) {
        Ok(id) => Ok(id),
        Err(_) => bail!("bad track id {}", v),
    }
}

impl ParamMessage {
    pub fn new(param: ControlParam, ival1: i64, ival2: i64, fval: f64, sval: &str) -> ParamMessage {
        ParamMessage {
            param,
            ivalue_1: ival1,
            ivalue_2: ival2,
            fvalue: fval,
            svalue: String::from(sval),
        }
    }
    pub fn as_json(&self) -> serde_json::Value {
        json!({
          "param": self.param.to_i64(),
          "iValue1": self.ivalue_1,
          "iValue2": self.ivalue_2,
          "fValue": self.fvalue,
          "sValue": self.svalue,
        })
    }
    pub fn from_string(data: &str) -> Result<ParamMessage, BoxError> {
        let raw: serde_json::Value = serde_json::from_str(data)?;
        Self::from_json(&raw)
    }
    pub fn from_json(raw: &serde_json::Value) -> Result<ParamMessage, BoxError> {
        let param: Option<ControlParam> = match int_value(raw, "param")? {
            Some(p) => FromPrimitive::from_i64(p),
            None => bail!("no param in message"),
        };
        match param {
            Some(p) => {
                let mut msg = ParamMessage::new(p, 0, 0, 0.0, "");
                if let Some(v) = int_value(raw, "iValue1")? {
                    msg.ivalue_1 = v;
                }
                if let Some(v) = int_value(raw, "iValue2")? {
                    msg.ivalue_2 = v;
                }
                if let Some(v) = float_value(raw, "fValue")? {
                    msg.fvalue = v;
                }
                if let Some(s) = raw["sValue"].as_str() {
                    msg.svalue = String::from(s);
                }
                Ok(msg)
            }
            None => {
                bail!("can't extract param");
            }
        }
    }

    /// Do what the message asks.  `GetStatus` hands back the session status, everything else
    /// returns `None`.
    pub fn apply(&self, handle: &mut SessionHandle) -> Result<Option<serde_json::Value>, BoxError> {
        match self.param {
            ControlParam::SetTrackLevel => {
                handle.set_track_level(track_id(self.ivalue_1)?, self.fvalue as f32)
            }
            ControlParam::SetTrackGain => {
                handle.set_track_gain(track_id(self.ivalue_1)?, self.fvalue as f32)
            }
            ControlParam::SetTrackPan => {
                handle.set_track_pan(track_id(self.ivalue_1)?, self.fvalue as f32)
            }
            ControlParam::SetTrackMute => {
                handle.set_track_mute(track_id(self.ivalue_1)?, self.ivalue_2 != 0)
            }
            ControlParam::SetTrackSolo => {
                handle.set_track_solo(track_id(self.ivalue_1)?, self.ivalue_2 != 0)
            }
            ControlParam::SetMasterVolume => handle.set_master_volume(self.fvalue as f32),
            ControlParam::ProposeVote => {
                let field: VoteField = self.svalue.parse()?;
                if self.ivalue_1 <= 0 || self.ivalue_1 > u32::MAX as i64 {
                    bail!("can't vote for {} {}", field, self.ivalue_1);
                }
                handle.propose_vote(field, self.ivalue_1 as u32)?;
            }
            ControlParam::SendChat => handle.send_chat_message(&self.svalue)?,
            ControlParam::StartSession => handle.start_session()?,
            ControlParam::StopSession => handle.stop_session()?,
            ControlParam::SetBeatsPerAccent => {
                if self.ivalue_1 < 0 || self.ivalue_1 > u32::MAX as i64 {
                    bail!("bad beats per accent {}", self.ivalue_1);
                }
                handle.set_beats_per_accent(self.ivalue_1 as u32);
            }
            ControlParam::StopRoomStream => handle.stop_room_stream()?,
            ControlParam::SetProcessorBypass => handle.set_processor_bypass(
                track_id(self.ivalue_1)?,
                track_id(self.ivalue_2)?,
                self.fvalue != 0.0,
            ),
            ControlParam::RemoveProcessor => {
                handle.remove_processor(track_id(self.ivalue_1)?, track_id(self.ivalue_2)?);
            }
            ControlParam::GetStatus => return Ok(Some(session_status(handle))),
        }
        Ok(None)
    }
}

/// what a UI needs to draw the session
pub fn session_status(handle: &SessionHandle) -> serde_json::Value {
    let tracks: Vec<serde_json::Value> = [
        LOCAL_INPUT_TRACK_ID,
        METRONOME_TRACK_ID,
        ROOM_STREAM_TRACK_ID,
    ]
    .into_iter()
    .chain(handle.remote_tracks())
    .filter_map(|id| {
        let params = handle.track_params(id)?;
        let peaks = handle.track_peaks(id)?;
        Some(json!({
            "id": id,
            "kind": handle.track_kind(id),
            "gain": params.gain,
            "pan": params.pan,
            "mute": params.mute,
            "solo": params.solo,
            "peaks": peaks,
            "playing": handle.track_is_playing(id),
        }))
    })
    .collect();
    json!({
        "speaker": "SessionHandle",
        "bpi": handle.current_bpi(),
        "bpm": handle.current_bpm(),
        "position": handle.interval_position(),
        "masterVolume": handle.master_volume(),
        "masterPeaks": handle.master_peaks(),
        "tracks": tracks,
    })
}

impl fmt::Display for ParamMessage {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ param: {:?}, ival_1: {}, ival_2: {}, fval: {} sval: {} }}",
            self.param, self.ivalue_1, self.ivalue_2, self.fvalue, self.svalue
        )
    }
}

#[cfg(test)]
mod test_param_message {
    use super::*;
    use crate::{common::config::SessionConfig, session::transport::OfflineTransport};

    fn handle() -> SessionHandle {
        let (handle, _engine, _rx) =
            SessionHandle::build(SessionConfig::default(), Box::new(OfflineTransport)).unwrap();
        handle
    }

    #[test]
    fn can_json() {
        let msg = ParamMessage::new(ControlParam::SetTrackPan, 1, 2, 3.0, "bob");
        assert!(msg.ivalue_1 == 1);
        assert_eq!(msg.as_json()["param"], 2);
    }

    #[test]
    fn from_json_string_1() {
        let data = r#"
        {
            "param": 1,
            "iValue1": 10,
            "iValue2": 100,
            "fValue": 2.0,
            "sValue": "John Doe"
        }"#;
        let msg = ParamMessage::from_string(data).unwrap();
        assert_eq!(msg.param, ControlParam::SetTrackGain);
        assert_eq!(msg.ivalue_2, 100);
    }

    #[test]
    fn numbers_as_strings() {
        let data = r#"
      {
          "param": "3",
          "iValue1": "1",
          "iValue2": "1",
          "fValue": "0.5"
      }"#;
        let msg = ParamMessage::from_string(data).unwrap();
        assert_eq!(msg.param, ControlParam::SetTrackMute);
        assert_eq!(msg.ivalue_1, 1);
        assert_eq!(msg.fvalue, 0.5);
        assert_eq!(msg.svalue, "");
    }

    #[test]
    fn integer_float() {
        let msg = ParamMessage::from_string("{\"param\":5,\"fValue\":2}").unwrap();
        assert_eq!(msg.fvalue, 2.0);
    }

    #[test]
    fn junk_is_refused() {
        assert!(ParamMessage::from_string("{\"iValue1\":150}").is_err());
        assert!(ParamMessage::from_string("{\"param\":1006}").is_err());
        assert!(ParamMessage::from_string("{\"param\":\"loud\"}").is_err());
        assert!(ParamMessage::from_string("{\"param\":1,\"iValue1\":\"x\"}").is_err());
        assert!(ParamMessage::from_string("not json").is_err());
    }

    #[test]
    fn applies_to_the_session() {
        let mut handle = handle();
        let msg = ParamMessage::new(ControlParam::SetTrackMute, 2, 1, 0.0, "");
        assert!(msg.apply(&mut handle).unwrap().is_none());
        assert!(handle.track_params(METRONOME_TRACK_ID).unwrap().mute);

        ParamMessage::new(ControlParam::SetTrackPan, 1, 0, -0.5, "")
            .apply(&mut handle)
            .unwrap();
        assert_eq!(handle.track_params(LOCAL_INPUT_TRACK_ID).unwrap().pan, -0.5);

        ParamMessage::new(ControlParam::SetMasterVolume, 0, 0, 0.25, "")
            .apply(&mut handle)
            .unwrap();
        assert_eq!(handle.master_volume(), 0.25);

        // unknown track is fine, a negative one is not
        assert!(ParamMessage::new(ControlParam::SetTrackGain, 55, 0, 1.0, "")
            .apply(&mut handle)
            .is_ok());
        assert!(ParamMessage::new(ControlParam::SetTrackGain, -1, 0, 1.0, "")
            .apply(&mut handle)
            .is_err());
    }

    #[test]
    fn votes_need_a_field() {
        let mut handle = handle();
        assert!(ParamMessage::new(ControlParam::ProposeVote, 120, 0, 0.0, "bpm")
            .apply(&mut handle)
            .is_ok());
        assert!(ParamMessage::new(ControlParam::ProposeVote, 120, 0, 0.0, "tempo")
            .apply(&mut handle)
            .is_err());
        assert!(ParamMessage::new(ControlParam::ProposeVote, 0, 0, 0.0, "bpi")
            .apply(&mut handle)
            .is_err());
    }

    #[test]
    fn status() {
        let mut handle = handle();
        let status = ParamMessage::new(ControlParam::GetStatus, 0, 0, 0.0, "")
            .apply(&mut handle)
            .unwrap()
            .unwrap();
        assert_eq!(status["bpm"], 120);
        assert_eq!(status["tracks"].as_array().unwrap().len(), 3);
        assert_eq!(status["tracks"][1]["kind"], "Metronome");
    }
}
