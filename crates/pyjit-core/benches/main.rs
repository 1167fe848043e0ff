// Use codspeed-criterion-compat for CI benchmarks, real criterion for local flamegraphs
#[cfg(codspeed)]
use codspeed_criterion_compat::{criterion_group, criterion_main, Criterion};
#[cfg(not(codspeed))]
use criterion::{criterion_group, criterion_main, Criterion};

use indexmap::IndexMap;
use pyjit_core::{
    budget::CompileBudget,
    bytecode::{CodeFlags, CodeObject, ConstValue, Opcode},
    compile::compile,
    il::{emitter::Emitter, method::JitMethod, BranchKind, EmitError, Label, LocalId, MachineOp, MachineType},
    tracer::NoopTracer,
};

/// Discards every emitted instruction. Benchmarks measure the
/// analyser/instruction-graph/driver pipeline itself, not any particular
/// backend's lowering cost, so there is nothing for this emitter to do
/// besides track label/local ids and satisfy `compile`'s bookkeeping.
#[derive(Default)]
struct DiscardingEmitter {
    next_label: u32,
    next_local: u32,
    marked: Vec<Label>,
    branches: Vec<(BranchKind, Label)>,
}

impl Emitter for DiscardingEmitter {
    fn define_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn mark_label(&mut self, label: Label) {
        self.marked.push(label);
    }

    fn define_local(&mut self, _ty: MachineType) -> LocalId {
        let local = LocalId(self.next_local);
        self.next_local += 1;
        local
    }

    fn ld_i4(&mut self, _value: i32) {}
    fn ld_u4(&mut self, _value: u32) {}
    fn ld_i8(&mut self, _value: i64) {}
    fn ld_r8(&mut self, _value: f64) {}
    fn ld_loc(&mut self, _local: LocalId) {}
    fn st_loc(&mut self, _local: LocalId) {}

    fn branch(&mut self, kind: BranchKind, target: Label) {
        self.branches.push((kind, target));
    }

    fn emit_call(&mut self, _token: pyjit_core::il::token::HelperToken) {}
    fn machine_op(&mut self, _op: MachineOp) {}
    fn ret(&mut self) {}

    fn compile(self) -> Result<JitMethod, EmitError> {
        for (_, target) in &self.branches {
            if !self.marked.contains(target) {
                return Err(EmitError::UnboundLabel(*target));
            }
        }
        Ok(JitMethod::new(0, IndexMap::new(), Vec::new()))
    }
}

fn unit(op: Opcode, arg: u32) -> [u8; 2] {
    [op.as_u8(), u8::try_from(arg).unwrap_or(0)]
}

fn bytes(units: &[(Opcode, u32)]) -> Vec<u8> {
    units.iter().flat_map(|&(op, arg)| unit(op, arg)).collect()
}

/// `x = 1; y = 2; x + y`, the same non-foldable two-locals shape used to
/// benchmark straight-line arithmetic compilation.
fn two_locals_add() -> CodeObject {
    use Opcode::{BinaryAdd, LoadConst, LoadFast, ReturnValue, StoreFast};
    let code = bytes(&[
        (LoadConst, 0),
        (StoreFast, 0),
        (LoadConst, 1),
        (StoreFast, 1),
        (LoadFast, 0),
        (LoadFast, 1),
        (BinaryAdd, 0),
        (ReturnValue, 0),
    ]);
    CodeObject::new(code, vec![ConstValue::Int(1), ConstValue::Int(2)], vec!["x".into(), "y".into()], 0, CodeFlags::default())
}

/// A tight loop accumulating `x + y` a fixed number of times, to exercise
/// the fixed-point analyser's work-queue convergence over a back edge
/// rather than a single straight-line pass.
fn add_loop(iterations: u32) -> CodeObject {
    use Opcode::{BinaryAdd, CompareOp, JumpAbsolute, LoadConst, LoadFast, PopJumpIfTrue, ReturnValue, StoreFast};
    let code = bytes(&[
        (LoadConst, 0),      // pc0: total = 0
        (StoreFast, 0),
        (LoadConst, 1),      // pc4: i = 0
        (StoreFast, 1),
        (LoadFast, 1),       // pc8: loop top: i
        (LoadConst, 2),      // pc10: iterations
        (CompareOp, 5),      // pc12: i >= iterations (dis.cmp_op Ge=5)
        (PopJumpIfTrue, 26), // pc14: exit once done
        (LoadFast, 0),       // pc16: total
        (LoadConst, 3),      // pc18: 1
        (BinaryAdd, 0),      // pc20: total + 1
        (StoreFast, 0),
        (JumpAbsolute, 8),   // pc24: back edge to loop top
        (ReturnValue, 0),    // pc26: exit: return total
    ]);
    CodeObject::new(
        code,
        vec![ConstValue::Int(0), ConstValue::Int(0), ConstValue::Int(i64::from(iterations)), ConstValue::Int(1)],
        vec!["total".into(), "i".into()],
        0,
        CodeFlags::default(),
    )
}

fn criterion_benchmark(c: &mut Criterion) {
    let straight_line = two_locals_add();
    c.bench_function("compile_straight_line_arithmetic", |b| {
        b.iter(|| {
            compile(&straight_line, DiscardingEmitter::default(), &CompileBudget::default(), NoopTracer).unwrap();
        });
    });

    let loop_fn = add_loop(1000);
    c.bench_function("compile_loop_with_back_edge", |b| {
        b.iter(|| {
            compile(&loop_fn, DiscardingEmitter::default(), &CompileBudget::default(), NoopTracer).unwrap();
        });
    });
}

#[cfg(not(codspeed))]
criterion_group!(benches, criterion_benchmark);

#[cfg(codspeed)]
criterion_group!(benches, criterion_benchmark);

criterion_main!(benches);
