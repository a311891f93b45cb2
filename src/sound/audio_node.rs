//! The unit of the mixing graph.
//!
//! Every source in the mix (local input, remote channel, metronome, room stream) is an
//! [`AudioNode`].  The mixer hands each node a zeroed stereo block and a [`RenderContext`]
//! describing this block: the driver input and whatever happened on the interval grid.
use super::{events::EventSink, track::NodeKind};
use crate::{common::box_error::BoxError, session::interval::IntervalEvent};

pub struct RenderContext<'a> {
    pub input_left: &'a [f32],
    pub input_right: &'a [f32],
    /// interval grid events that fall inside this block, in order
    pub interval: &'a [IntervalEvent],
    pub events: &'a EventSink,
}

impl<'a> RenderContext<'a> {
    /// offset in the block where a new interval starts, if one does
    pub fn interval_start(&self) -> Option<usize> {
        self.interval.iter().find_map(|ev| match ev {
            IntervalEvent::Boundary { offset, .. } => Some(*offset),
            _ => None,
        })
    }
}

pub trait AudioNode: Send {
    fn kind(&self) -> NodeKind;

    /// Fill `left`/`right` (already zeroed) with this node's block.  An error means this node
    /// is silent for the block, it never stops the mix.
    fn render(
        &mut self,
        ctx: &RenderContext,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<(), BoxError>;

    /// drop anything buffered, used when a stream is stopped
    fn flush(&mut self) -> () {}
}

pub type BoxedNode = std::boxed::Box<dyn AudioNode + std::marker::Send>;
