//! Dominators and post dominators of instructions.
//!
//! The algorithm is based on Keith D. Cooper., Timothy J. Harvey., and Ken Kennedy.: A Simple, Fast Dominance Algorithm:
//! <https://www.cs.rice.edu/~keith/EMBED/dom.pdf>
//!
//! Instead of sweeping over every node until nothing changes, nodes are
//! revisited through a worklist whenever one of their predecessors changes.

use std::{collections::BTreeSet, fmt};

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use lattix_ir::{Function, InstId};

use crate::{
    cfg::{ControlFlowGraph, Direction},
    AnalysisError, Result,
};

#[derive(Debug)]
pub struct Dominators {
    direction: Direction,
    root: InstId,
    doms: SecondaryMap<InstId, PackedOption<InstId>>,
    rpo: Vec<InstId>,
    len: usize,
}

impl Dominators {
    /// Computes dominators of the body of `func`. `Direction::Backward`
    /// computes post dominators rooted at the `EndFunction` instruction.
    pub fn compute(func: &Function, direction: Direction) -> Result<Self> {
        let name = || func.name().to_string();
        let body = func
            .body()
            .filter(|body| !body.is_empty())
            .ok_or_else(|| AnalysisError::EmptyBody(name()))?;

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(body);
        let root = match direction {
            Direction::Forward => cfg.entry().ok_or_else(|| AnalysisError::EmptyBody(name()))?,
            Direction::Backward => cfg
                .exit()
                .ok_or_else(|| AnalysisError::MissingEndFunction(name()))?,
        };

        Ok(Self::compute_with_cfg(&cfg, root, direction))
    }

    pub fn compute_with_cfg(cfg: &ControlFlowGraph, root: InstId, direction: Direction) -> Self {
        let mut rpo: Vec<_> = cfg.post_order(root, direction).collect();
        rpo.reverse();

        // Number the nodes so that the root has the largest number and every
        // other reachable node is smaller than its parent in the DFS tree.
        // `0` is reserved for unreachable nodes.
        let node_num = rpo.len();
        let mut rpo_nums: SecondaryMap<InstId, u32> = SecondaryMap::with_capacity(cfg.len());
        for (i, &inst) in rpo.iter().enumerate() {
            rpo_nums[inst] = (node_num - i) as u32;
        }
        let inst_of = |num: u32| rpo[node_num - num as usize];

        // `idoms[n]` is the rpo number of the immediate dominator of the node
        // numbered `n`, `0` while it's unknown.
        let mut idoms = vec![0u32; node_num + 1];
        let root_num = node_num as u32;
        idoms[node_num] = root_num;

        let mut worklist: BTreeSet<u32> = cfg
            .neighbors_of(root, direction)
            .map(|&next| rpo_nums[next])
            .collect();

        loop {
            // Nodes closer to the root first.
            while let Some(num) = worklist.pop_last() {
                if num == root_num {
                    continue;
                }

                let new_idom = Self::eval(cfg, direction, inst_of(num), &rpo_nums, &idoms);
                if new_idom != 0 && new_idom != idoms[num as usize] {
                    idoms[num as usize] = new_idom;
                    worklist.extend(
                        cfg.neighbors_of(inst_of(num), direction)
                            .map(|&next| rpo_nums[next]),
                    );
                }
            }

            // A node only depends on the dominator chains of its predecessors,
            // so a change further up a chain may leave stale nodes behind.
            worklist.extend((1..root_num).filter(|&num| {
                let idom = Self::eval(cfg, direction, inst_of(num), &rpo_nums, &idoms);
                idom != 0 && idom != idoms[num as usize]
            }));
            if worklist.is_empty() {
                break;
            }
        }

        let mut doms = SecondaryMap::with_capacity(cfg.len());
        for (num, &idom) in idoms.iter().enumerate().skip(1) {
            if idom != 0 {
                doms[inst_of(num as u32)] = inst_of(idom).into();
            }
        }

        Self {
            direction,
            root,
            doms,
            rpo,
            len: cfg.len(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The entry of a forward analysis, the `EndFunction` instruction of a
    /// backward one.
    pub fn root(&self) -> InstId {
        self.root
    }

    /// Returns the immediate dominator of `inst`.
    /// Returns `None` if `inst` is unreachable from the root, or `inst` is the root itself.
    pub fn idom_of(&self, inst: InstId) -> Option<InstId> {
        if inst == self.root {
            return None;
        }
        self.doms[inst].expand()
    }

    /// Returns `true` if `inst1` strictly dominates `inst2`.
    pub fn strictly_dominates(&self, inst1: InstId, inst2: InstId) -> bool {
        let mut current = inst2;
        while let Some(inst) = self.idom_of(current) {
            if inst == inst1 {
                return true;
            }
            current = inst;
        }

        false
    }

    /// Returns `true` if `inst1` dominates `inst2`. An unreachable instruction
    /// is dominated by nothing.
    pub fn dominates(&self, inst1: InstId, inst2: InstId) -> bool {
        if inst1 == inst2 {
            return self.program_point_reachable(inst2);
        }

        self.strictly_dominates(inst1, inst2)
    }

    /// Collects the dominator chain of `inst` from its immediate dominator up
    /// to the root. The root is its own only dominator.
    pub fn dominators(&self, inst: InstId) -> BTreeSet<InstId> {
        if inst == self.root {
            return BTreeSet::from([inst]);
        }

        let mut dominators = BTreeSet::new();
        let mut current = inst;
        while let Some(idom) = self.idom_of(current) {
            dominators.insert(idom);
            current = idom;
        }
        dominators
    }

    /// Returns `true` if `inst` is reachable from the root.
    pub fn program_point_reachable(&self, inst: InstId) -> bool {
        self.doms[inst].is_some()
    }

    /// Returns reachable instructions in reverse post order.
    pub fn rpo(&self) -> &[InstId] {
        &self.rpo
    }

    fn eval(
        cfg: &ControlFlowGraph,
        direction: Direction,
        inst: InstId,
        rpo_nums: &SecondaryMap<InstId, u32>,
        idoms: &[u32],
    ) -> u32 {
        let num = rpo_nums[inst];
        let is_processed = |pred: u32| pred != 0 && idoms[pred as usize] != 0;
        let preds: Vec<u32> = cfg
            .neighbors_of(inst, direction.reverse())
            .map(|&pred| rpo_nums[pred])
            .filter(|&pred| is_processed(pred))
            .collect();

        // Start from a predecessor closer to the root so that the dominator
        // chains only ever go up.
        let Some(&first) = preds.iter().find(|&&pred| pred > num) else {
            return 0;
        };
        preds
            .iter()
            .filter(|&&pred| pred != first)
            .fold(first, |idom, &pred| Self::intersect(idom, pred, idoms))
    }

    fn intersect(mut n1: u32, mut n2: u32, idoms: &[u32]) -> u32 {
        while n1 != n2 {
            while n1 < n2 {
                n1 = idoms[n1 as usize];
            }
            while n2 < n1 {
                n2 = idoms[n2 as usize];
            }
        }

        n1
    }
}

impl fmt::Display for Dominators {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.direction {
            Direction::Forward => "dominators",
            Direction::Backward => "post dominators",
        };
        writeln!(f, "{kind} (root {})", self.root.as_u32())?;

        for i in 0..self.len {
            let inst = InstId::from_u32(i as u32);
            if !self.program_point_reachable(inst) {
                writeln!(f, "  {i}: unreachable")?;
                continue;
            }

            let chain: Vec<_> = self
                .dominators(inst)
                .into_iter()
                .map(|dom| dom.as_u32().to_string())
                .collect();
            writeln!(f, "  {i}: {{{}}}", chain.join(", "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::many_single_char_names)]

    use lattix_ir::{Expr, Linkage, Module, ModuleBuilder, Signature};

    use super::*;

    fn insts<const N: usize>() -> [InstId; N] {
        std::array::from_fn(|i| InstId::from_u32(i as u32))
    }

    /// 0: if (nondet) goto 3
    /// 1: skip
    /// 2: goto 4
    /// 3: skip
    /// 4: return
    /// 5: end_function
    fn diamond() -> Module {
        let mut builder = ModuleBuilder::new();
        let f = builder
            .declare_function(Signature::new("diamond", Linkage::Public))
            .unwrap();

        let mut fb = builder.func_builder(f);
        let else_ = fb.make_label();
        let join = fb.make_label();
        fb.goto_if(Expr::Nondet, else_);
        fb.skip();
        fb.goto(join);
        fb.bind_label(else_);
        fb.skip();
        fb.bind_label(join);
        fb.ret(None);
        fb.finish().unwrap();

        builder.build()
    }

    fn func(module: &Module) -> &Function {
        module.funcs.values().next().unwrap()
    }

    #[test]
    fn dominators_if_else() {
        let module = diamond();
        let doms = Dominators::compute(func(&module), Direction::Forward).unwrap();
        let [entry, then, then_jump, else_, join, end] = insts();

        assert_eq!(doms.root(), entry);
        assert_eq!(doms.idom_of(entry), None);
        assert_eq!(doms.idom_of(then), Some(entry));
        assert_eq!(doms.idom_of(then_jump), Some(then));
        assert_eq!(doms.idom_of(else_), Some(entry));
        assert_eq!(doms.idom_of(join), Some(entry));
        assert_eq!(doms.idom_of(end), Some(join));

        assert_eq!(doms.dominators(join), BTreeSet::from([entry]));
        assert_eq!(doms.dominators(entry), BTreeSet::from([entry]));
        assert_eq!(doms.dominators(end), BTreeSet::from([entry, join]));
        assert!(doms.dominates(entry, then));
        assert!(doms.dominates(entry, else_));
        assert!(doms.dominates(entry, join));
        assert!(doms.dominates(join, join));
        assert!(!doms.dominates(then, join));
        assert!(!doms.dominates(else_, join));
        assert!(!doms.strictly_dominates(join, join));
    }

    #[test]
    fn post_dominators_if_else() {
        let module = diamond();
        let pdoms = Dominators::compute(func(&module), Direction::Backward).unwrap();
        let [entry, then, then_jump, else_, join, end] = insts();

        assert_eq!(pdoms.root(), end);
        assert_eq!(pdoms.idom_of(end), None);
        assert_eq!(pdoms.idom_of(join), Some(end));
        assert_eq!(pdoms.idom_of(else_), Some(join));
        assert_eq!(pdoms.idom_of(then_jump), Some(join));
        assert_eq!(pdoms.idom_of(then), Some(then_jump));
        assert_eq!(pdoms.idom_of(entry), Some(join));
        assert!(pdoms.dominates(join, entry));
        assert!(!pdoms.dominates(then, entry));
        assert_eq!(pdoms.dominators(entry), BTreeSet::from([join, end]));
    }

    #[test]
    fn unreachable_instruction() {
        let mut builder = ModuleBuilder::new();
        let f = builder
            .declare_function(Signature::new("f", Linkage::Public))
            .unwrap();

        // 0: goto 2
        // 1: skip
        // 2: return
        // 3: end_function
        let mut fb = builder.func_builder(f);
        let exit = fb.make_label();
        fb.goto(exit);
        fb.skip();
        fb.bind_label(exit);
        fb.ret(None);
        fb.finish().unwrap();
        let module = builder.build();

        let doms = Dominators::compute(module.func(f), Direction::Forward).unwrap();
        let [entry, dead, ret, end] = insts();
        assert!(doms.program_point_reachable(entry));
        assert!(!doms.program_point_reachable(dead));
        assert!(doms.dominators(dead).is_empty());
        assert!(!doms.dominates(entry, dead));
        assert!(!doms.dominates(dead, dead));
        assert_eq!(doms.idom_of(end), Some(ret));
        assert_eq!(doms.rpo(), &[entry, ret, end]);

        insta::assert_snapshot!(doms.to_string(), @r"
        dominators (root 0)
          0: {0}
          1: unreachable
          2: {0}
          3: {0, 2}
        ");
    }

    #[test]
    fn infinite_loop_never_reaches_exit() {
        let mut builder = ModuleBuilder::new();
        let f = builder
            .declare_function(Signature::new("spin", Linkage::Public))
            .unwrap();

        // 0: if (nondet) goto 2
        // 1: return
        // 2: skip
        // 3: goto 2
        // 4: end_function
        let mut fb = builder.func_builder(f);
        let spin = fb.make_label();
        fb.goto_if(Expr::Nondet, spin);
        fb.ret(None);
        fb.bind_label(spin);
        fb.skip();
        fb.goto(spin);
        fb.finish().unwrap();
        let module = builder.build();

        let [entry, ret, body, back, end] = insts();
        let doms = Dominators::compute(module.func(f), Direction::Forward).unwrap();
        assert!(doms.program_point_reachable(back));
        assert!(doms.dominates(ret, end));
        assert_eq!(doms.idom_of(body), Some(entry));

        let pdoms = Dominators::compute(module.func(f), Direction::Backward).unwrap();
        assert!(pdoms.program_point_reachable(entry));
        assert!(pdoms.program_point_reachable(ret));
        assert!(!pdoms.program_point_reachable(body));
        assert!(!pdoms.program_point_reachable(back));
        assert_eq!(pdoms.idom_of(entry), Some(ret));
    }

    #[test]
    fn irreducible_loop() {
        let mut builder = ModuleBuilder::new();
        let f = builder
            .declare_function(Signature::new("f", Linkage::Public))
            .unwrap();

        // 0: if (nondet) goto 3
        // 1: skip
        // 2: if (nondet) goto 5
        // 3: skip
        // 4: if (nondet) goto 1
        // 5: return
        // 6: end_function
        let mut fb = builder.func_builder(f);
        let a = fb.make_label();
        let b = fb.make_label();
        let exit = fb.make_label();
        fb.goto_if(Expr::Nondet, b);
        fb.bind_label(a);
        fb.skip();
        fb.goto_if(Expr::Nondet, exit);
        fb.bind_label(b);
        fb.skip();
        fb.goto_if(Expr::Nondet, a);
        fb.bind_label(exit);
        fb.ret(None);
        fb.finish().unwrap();
        let module = builder.build();

        let doms = Dominators::compute(module.func(f), Direction::Forward).unwrap();
        let [entry, a, a_br, b, b_br, ret, _] = insts();
        assert_eq!(doms.idom_of(a), Some(entry));
        assert_eq!(doms.idom_of(b), Some(entry));
        assert_eq!(doms.idom_of(a_br), Some(a));
        assert_eq!(doms.idom_of(b_br), Some(b));
        assert_eq!(doms.idom_of(ret), Some(entry));
    }

    #[test]
    fn missing_body() {
        let mut builder = ModuleBuilder::new();
        let f = builder
            .declare_function(Signature::new("ext", Linkage::External))
            .unwrap();
        let module = builder.build();

        assert!(matches!(
            Dominators::compute(module.func(f), Direction::Forward),
            Err(AnalysisError::EmptyBody(name)) if name == "ext"
        ));
    }
}
