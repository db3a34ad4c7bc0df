//! Code-unit compilation benchmarks
//!
//! Measures the cost of turning a parsed module into packed code units and
//! of serializing the result.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use shroud_compiler::{compile_module, marshal};
use shroud_parser::parse;

const SMALL: &str = "x = 1\ny = x + 2\nprint(y)\n";

const MEDIUM: &str = r#"
import os

class Walker:
    def __init__(self, root):
        self.root = root

    def files(self):
        for base, dirs, names in os.walk(self.root):
            for name in names:
                if name.endswith('.py'):
                    yield os.path.join(base, name)

def count(root):
    total = 0
    try:
        for path in Walker(root).files():
            with open(path) as fh:
                total += len(fh.read().splitlines())
    except OSError as exc:
        print(f'failed: {exc!r}')
    return total
"#;

// =============================================================================
// Compilation
// =============================================================================

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_module");
    for (name, source) in [("small", SMALL), ("medium", MEDIUM)] {
        let module = parse(source).expect("benchmark source parses");
        group.bench_with_input(BenchmarkId::from_parameter(name), &module, |b, module| {
            b.iter(|| black_box(compile_module(module, "bench.py")))
        });
    }
    group.finish();
}

// =============================================================================
// Serialization
// =============================================================================

fn bench_marshal(c: &mut Criterion) {
    let module = parse(MEDIUM).expect("benchmark source parses");
    let code = compile_module(&module, "bench.py").expect("benchmark source compiles");
    c.bench_function("marshal_dumps", |b| b.iter(|| black_box(marshal::dumps(&code))));
}

criterion_group!(benches, bench_compile, bench_marshal);
criterion_main!(benches);
