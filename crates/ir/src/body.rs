use cranelift_entity::PrimaryMap;
use smallvec::{smallvec, SmallVec};

use crate::inst::{CallTarget, InstData, InstId};

/// A successor of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Successor {
    Inst(InstId),

    /// Falling off the end of the body.
    PastEnd,
}

impl Successor {
    pub fn inst(self) -> Option<InstId> {
        match self {
            Self::Inst(inst) => Some(inst),
            Self::PastEnd => None,
        }
    }
}

/// An instruction sequence of a function. Instructions are stored in layout
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    insts: PrimaryMap<InstId, InstData>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, data: InstData) -> InstId {
        self.insts.push(data)
    }

    pub(crate) fn inst_mut(&mut self, inst: InstId) -> &mut InstData {
        &mut self.insts[inst]
    }

    pub fn insts(&self) -> impl DoubleEndedIterator<Item = InstId> {
        self.insts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstId, &InstData)> {
        self.insts.iter()
    }

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst]
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn first(&self) -> Option<InstId> {
        self.insts.keys().next()
    }

    pub fn last(&self) -> Option<InstId> {
        self.insts.keys().next_back()
    }

    pub fn next_of(&self, inst: InstId) -> Option<InstId> {
        let next = InstId::from_u32(inst.as_u32() + 1);
        self.insts.is_valid(next).then_some(next)
    }

    /// Returns the `EndFunction` instruction if the body is well formed, i.e.
    /// the last instruction marks the end of the function.
    pub fn end_function(&self) -> Option<InstId> {
        self.last()
            .filter(|&last| self.insts[last].is_end_function())
    }

    pub fn is_call(&self, inst: InstId) -> bool {
        self.insts[inst].is_call()
    }

    pub fn is_end_function(&self, inst: InstId) -> bool {
        self.insts[inst].is_end_function()
    }

    pub fn call_target(&self, inst: InstId) -> Option<&CallTarget> {
        self.insts[inst].call_target()
    }

    /// Returns the successors of `inst` in the order the instruction names them.
    /// A fall-through off the last instruction is reported as
    /// [`Successor::PastEnd`].
    pub fn succs_of(&self, inst: InstId) -> SmallVec<[Successor; 2]> {
        let next = || match self.next_of(inst) {
            Some(next) => Successor::Inst(next),
            None => Successor::PastEnd,
        };

        match &self.insts[inst] {
            InstData::Goto { cond: None, dest } => smallvec![Successor::Inst(*dest)],
            InstData::Goto {
                cond: Some(_),
                dest,
            } => {
                let next = next();
                if next == Successor::Inst(*dest) {
                    smallvec![next]
                } else {
                    smallvec![next, Successor::Inst(*dest)]
                }
            }
            InstData::Return(_) => match self.end_function() {
                Some(end) => smallvec![Successor::Inst(end)],
                None => smallvec![Successor::PastEnd],
            },
            InstData::StartThread(dest) => smallvec![next(), Successor::Inst(*dest)],
            InstData::EndThread | InstData::EndFunction => smallvec![Successor::PastEnd],
            InstData::Skip
            | InstData::Assign { .. }
            | InstData::Decl(_)
            | InstData::Dead(_)
            | InstData::Call { .. }
            | InstData::Store { .. } => smallvec![next()],
        }
    }
}
