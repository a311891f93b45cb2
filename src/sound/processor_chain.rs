//! Ordered chain of in place processors (plugins) hanging off a mixer channel.
//!
//! Processors implement the [`Processor`] trait, which gives the chain a uniform look at
//! whatever is plugged in.  The chain itself is owned by its channel on the audio thread.
//! Membership only changes between blocks, so a render sees either the old chain or the new
//! one.
use serde_json::json;

use crate::common::box_error::BoxError;

pub type ProcessorId = u32;

/// slots reserved up front so inserting does not reallocate on the audio thread
pub const CHAIN_CAPACITY: usize = 16;

pub trait Processor {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) -> Result<(), BoxError> {
        if self.bypass() {
            Ok(())
        } else {
            self.do_algorithm(left, right)
        }
    }

    fn bypass(&self) -> bool {
        false
    }

    fn set_bypass(&mut self, val: bool) -> ();

    fn name(&self) -> &str;

    fn do_algorithm(&mut self, left: &mut [f32], right: &mut [f32]) -> Result<(), BoxError>;
}

pub type BoxedProcessor = std::boxed::Box<
    dyn Processor + std::marker::Send, // needed for threads
>;

pub struct ProcessorChain {
    processors: Vec<(ProcessorId, BoxedProcessor)>,
}

impl ProcessorChain {
    pub fn new() -> ProcessorChain {
        ProcessorChain {
            processors: Vec::with_capacity(CHAIN_CAPACITY),
        }
    }
    pub fn len(&self) -> usize {
        self.processors.len()
    }
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
    /// put a processor at `idx`, or on the end if `idx` is past it
    pub fn insert(&mut self, id: ProcessorId, processor: BoxedProcessor, idx: usize) -> () {
        if idx > self.processors.len() {
            self.processors.push((id, processor));
        } else {
            self.processors.insert(idx, (id, processor));
        }
    }
    /// take a processor out of the chain.  The caller decides where it gets dropped.
    pub fn remove(&mut self, id: ProcessorId) -> Option<BoxedProcessor> {
        let idx = self.processors.iter().position(|(pid, _)| *pid == id)?;
        Some(self.processors.remove(idx).1)
    }
    pub fn move_processor(&mut self, from_idx: usize, to_idx: usize) -> () {
        if from_idx < self.processors.len() {
            let p = self.processors.remove(from_idx);
            self.insert(p.0, p.1, to_idx);
        }
    }
    pub fn set_bypass(&mut self, id: ProcessorId, bypass: bool) -> () {
        if let Some((_, p)) = self.processors.iter_mut().find(|(pid, _)| *pid == id) {
            p.set_bypass(bypass);
        }
    }
    pub fn drain(&mut self) -> Vec<BoxedProcessor> {
        self.processors.drain(..).map(|(_, p)| p).collect()
    }
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) -> Result<(), BoxError> {
        for (_, p) in self.processors.iter_mut() {
            p.process(left, right)?;
        }
        Ok(())
    }
    pub fn as_json(&self) -> serde_json::Value {
        let effects: Vec<serde_json::Value> = self
            .processors
            .iter()
            .enumerate()
            .map(|(idx, (id, p))| {
                json!({
                    "index": idx,
                    "id": id,
                    "name": p.name(),
                    "bypass": p.bypass(),
                })
            })
            .collect();
        json!({ "effects": effects })
    }
}

impl Default for ProcessorChain {
    fn default() -> Self {
        ProcessorChain::new()
    }
}

#[cfg(test)]
pub mod test_processor_chain {
    use super::*;
    use simple_error::bail;

    /// multiplies everything by a constant
    pub struct Scale {
        pub factor: f32,
        pub bypass: bool,
    }

    impl Processor for Scale {
        fn bypass(&self) -> bool {
            self.bypass
        }
        fn set_bypass(&mut self, val: bool) -> () {
            self.bypass = val;
        }
        fn name(&self) -> &str {
            "Scale"
        }
        fn do_algorithm(&mut self, left: &mut [f32], right: &mut [f32]) -> Result<(), BoxError> {
            for s in left.iter_mut().chain(right.iter_mut()) {
                *s *= self.factor;
            }
            Ok(())
        }
    }

    pub struct Broken;

    impl Processor for Broken {
        fn set_bypass(&mut self, _val: bool) -> () {}
        fn name(&self) -> &str {
            "Broken"
        }
        fn do_algorithm(&mut self, _l: &mut [f32], _r: &mut [f32]) -> Result<(), BoxError> {
            bail!("broken processor");
        }
    }

    pub fn scale(factor: f32) -> BoxedProcessor {
        Box::new(Scale {
            factor,
            bypass: false,
        })
    }

    #[test]
    fn runs_in_order() {
        let mut chain = ProcessorChain::new();
        chain.insert(1, scale(2.0), 0);
        chain.insert(2, scale(3.0), 99);
        assert_eq!(chain.len(), 2);
        let mut l = [1.0; 4];
        let mut r = [0.5; 4];
        chain.process(&mut l, &mut r).unwrap();
        assert_eq!(l, [6.0; 4]);
        assert_eq!(r, [3.0; 4]);
    }

    #[test]
    fn bypass_and_remove() {
        let mut chain = ProcessorChain::new();
        chain.insert(7, scale(2.0), 0);
        chain.set_bypass(7, true);
        let mut l = [1.0; 2];
        let mut r = [1.0; 2];
        chain.process(&mut l, &mut r).unwrap();
        assert_eq!(l, [1.0; 2]);
        assert!(chain.remove(7).is_some());
        assert!(chain.remove(7).is_none());
        assert!(chain.is_empty());
    }

    #[test]
    fn errors_surface() {
        let mut chain = ProcessorChain::new();
        chain.insert(1, Box::new(Broken), 0);
        let mut l = [1.0; 2];
        let mut r = [1.0; 2];
        assert!(chain.process(&mut l, &mut r).is_err());
    }

    #[test]
    fn move_and_json() {
        let mut chain = ProcessorChain::new();
        chain.insert(1, scale(2.0), 0);
        chain.insert(2, Box::new(Broken), 1);
        chain.move_processor(1, 0);
        let info = chain.as_json();
        assert_eq!(info["effects"][0]["name"], "Broken");
        assert_eq!(info["effects"][1]["id"], 1);
    }
}
