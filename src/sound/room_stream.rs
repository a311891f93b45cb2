//! Background audio for the room, e.g. a backing track somebody streams in.
//!
//! Unlike remote tracks this plays as soon as samples show up; it does not wait for the grid.
use log::debug;

use super::{
    audio_node::{AudioNode, RenderContext},
    sample_ring::{sample_ring, RingReader, RingWriter},
    track::NodeKind,
};
use crate::common::box_error::BoxError;

pub struct RoomStreamNode {
    reader: RingReader,
}

/// The node and the writer that feeds it interleaved stereo.
pub fn room_stream(frames: usize) -> (RoomStreamNode, RingWriter) {
    let (writer, reader) = sample_ring(frames);
    (RoomStreamNode { reader }, writer)
}

impl AudioNode for RoomStreamNode {
    fn kind(&self) -> NodeKind {
        NodeKind::RoomStream
    }
    fn render(
        &mut self,
        _ctx: &RenderContext,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<(), BoxError> {
        self.reader.read_planar(left, right);
        Ok(())
    }
    fn flush(&mut self) -> () {
        let dropped = self.reader.clear();
        debug!("room stream flushed {} frames", dropped);
    }
}

#[cfg(test)]
mod test_room_stream {
    use super::*;
    use crate::sound::events::EventSink;

    #[test]
    fn plays_whatever_is_there() {
        let sink = EventSink::silent();
        let ctx = RenderContext {
            input_left: &[],
            input_right: &[],
            interval: &[],
            events: &sink,
        };
        let (mut node, mut writer) = room_stream(16);
        writer.write_interleaved(&[0.2, 0.4, 0.2, 0.4]);
        let mut l = [0.0; 4];
        let mut r = [0.0; 4];
        node.render(&ctx, &mut l, &mut r).unwrap();
        assert_eq!(l, [0.2, 0.2, 0.0, 0.0]);
        assert_eq!(r, [0.4, 0.4, 0.0, 0.0]);
        writer.write_interleaved(&[0.5; 8]);
        node.flush();
        l = [0.0; 4];
        node.render(&ctx, &mut l, &mut r).unwrap();
        assert_eq!(l, [0.0; 4]);
    }
}
