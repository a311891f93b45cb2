//! The local input: whatever the driver captured this block.
use super::{
    audio_node::{AudioNode, RenderContext},
    track::NodeKind,
};
use crate::common::box_error::BoxError;

pub struct LocalInputNode;

impl LocalInputNode {
    pub fn new() -> LocalInputNode {
        LocalInputNode
    }
}

impl Default for LocalInputNode {
    fn default() -> Self {
        LocalInputNode::new()
    }
}

impl AudioNode for LocalInputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::LocalInput
    }
    fn render(
        &mut self,
        ctx: &RenderContext,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<(), BoxError> {
        let n = left.len().min(ctx.input_left.len());
        left[..n].copy_from_slice(&ctx.input_left[..n]);
        let n = right.len().min(ctx.input_right.len());
        right[..n].copy_from_slice(&ctx.input_right[..n]);
        Ok(())
    }
}

#[cfg(test)]
mod test_local_input {
    use super::*;
    use crate::sound::events::EventSink;

    #[test]
    fn passes_input_through() {
        let sink = EventSink::silent();
        let ctx = RenderContext {
            input_left: &[0.1, 0.2],
            input_right: &[0.3, 0.4],
            interval: &[],
            events: &sink,
        };
        let mut l = [0.0; 2];
        let mut r = [0.0; 2];
        LocalInputNode::new().render(&ctx, &mut l, &mut r).unwrap();
        assert_eq!(l, [0.1, 0.2]);
        assert_eq!(r, [0.3, 0.4]);
    }
}
