/// Benchmark runner for the tierjs engine.
///
/// Times the same workloads under each tier configuration and checks that
/// every configuration computes the same answer.

extern crate tierjs;

use std::time::{Duration, Instant};

use tierjs::runner::api::Engine;
use tierjs::runner::config::{CompileOptions, EngineOptions};
use tierjs::runner::ds::value::{JsNumberType, JsValue};

/// Runs the script `iterations` times in fresh engines, timing only execution.
fn run_benchmark(name: &str, code: &str, options: &EngineOptions, iterations: u32) -> Duration {
    let mut total = Duration::ZERO;
    for _ in 0..iterations {
        let mut engine = Engine::new(options.clone());
        let script = match engine.compile(code, CompileOptions::with_filename(name)) {
            Ok(script) => script,
            Err(e) => panic!("failed to compile benchmark {}: {}", name, e),
        };
        let start = Instant::now();
        if let Err(e) = engine.run(&script) {
            panic!("benchmark {} failed: {}", name, e);
        }
        total += start.elapsed();
    }
    total
}

fn run_and_get_var(code: &str, var_name: &str, options: &EngineOptions) -> JsValue {
    let mut engine = Engine::new(options.clone());
    match engine.eval(code) {
        Ok(_) => engine.get_global(var_name),
        Err(_) => JsValue::Undefined,
    }
}

// ============================================================================
// Benchmark definitions
// ============================================================================

const BENCH_LOOP_SUM: &str = r#"
var sum = 0;
for (var i = 0; i < 60000; i = i + 1) {
    sum = sum + i;
}
"#;

const BENCH_FIBONACCI: &str = r#"
function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }
var result = fib(22);
"#;

const BENCH_PROPERTY_ACCESS: &str = r#"
function Vec2(x, y) { this.x = x; this.y = y; }
function dot(a, b) { return a.x * b.x + a.y * b.y; }
var acc = 0;
var u = new Vec2(1, 2);
for (var i = 0; i < 20000; i = i + 1) {
    acc = acc + dot(u, new Vec2(i, 1));
}
"#;

const BENCH_POLYMORPHIC: &str = r#"
function getX(o) { return o.x; }
var shapes = [{x: 1}, {y: 0, x: 2}, {z: 0, x: 3}, {w: 0, z: 0, x: 4}];
var total = 0;
for (var i = 0; i < 40000; i = i + 1) {
    total = total + getX(shapes[i & 3]);
}
"#;

const BENCH_TYPED_ARRAYS: &str = r#"
var data = new Float32Array(1024);
for (var k = 0; k < 1024; k = k + 1) { data[k] = k * 0.5; }
function scaleInto(src, dst, f) {
    for (var i = 0; i < src.length; i = i + 1) {
        dst[i] = Math.fround(src[i] * f);
    }
}
var out = new Float32Array(1024);
for (var r = 0; r < 40; r = r + 1) { scaleInto(data, out, 1.5); }
var last = out[1023];
"#;

const BENCH_PRIME_SIEVE: &str = r#"
var count = 0;
for (var n = 2; n < 5000; n = n + 1) {
    var isPrime = true;
    for (var i = 2; i * i <= n; i = i + 1) {
        if (n % i === 0) {
            isPrime = false;
            break;
        }
    }
    if (isPrime) {
        count = count + 1;
    }
}
"#;

const BENCH_ALLOCATION: &str = r#"
function cell(v, next) { return { v: v, next: next }; }
var head = null;
var checksum = 0;
for (var i = 0; i < 20000; i = i + 1) {
    head = cell(i, i % 100 === 0 ? null : head);
    checksum = (checksum + head.v) | 0;
}
"#;

fn configurations() -> Vec<(&'static str, EngineOptions)> {
    vec![
        ("Interp", EngineOptions::interpreter_only()),
        (
            "Baseline",
            EngineOptions {
                enable_ion: false,
                ..EngineOptions::default()
            },
        ),
        ("Default", EngineOptions::default()),
        ("Eager", EngineOptions::eager()),
    ]
}

fn main() {
    println!("=======================================================");
    println!("  tierjs - Performance Benchmarks");
    println!("  Interpreter vs Baseline vs Optimizing tier");
    println!("=======================================================\n");

    let benchmarks: Vec<(&str, &str, u32)> = vec![
        ("Loop Sum (60K)", BENCH_LOOP_SUM, 5),
        ("Fibonacci (n=22)", BENCH_FIBONACCI, 3),
        ("Property Access (20K)", BENCH_PROPERTY_ACCESS, 5),
        ("Polymorphic Reads (40K)", BENCH_POLYMORPHIC, 5),
        ("Float32 Arrays", BENCH_TYPED_ARRAYS, 5),
        ("Prime Sieve (<5000)", BENCH_PRIME_SIEVE, 3),
        ("Allocation (20K)", BENCH_ALLOCATION, 5),
    ];
    let configs = configurations();

    print!("{:<26}", "Benchmark");
    for (label, _) in &configs {
        print!(" {:>12}", label);
    }
    println!(" {:>9}", "Speedup");
    println!("{}", "-".repeat(26 + 13 * configs.len() + 10));

    let mut totals = vec![Duration::ZERO; configs.len()];
    for (name, code, iterations) in &benchmarks {
        print!("{:<26}", name);
        let mut times = Vec::with_capacity(configs.len());
        for (i, (_, options)) in configs.iter().enumerate() {
            let elapsed = run_benchmark(name, code, options, *iterations);
            totals[i] += elapsed;
            times.push(elapsed);
            print!(" {:>10.2?}", elapsed);
        }
        let best = times.iter().skip(1).min().copied().unwrap_or(Duration::ZERO);
        println!(" {:>8.2}x", times[0].as_secs_f64() / best.as_secs_f64().max(f64::EPSILON));
    }

    println!("{}", "-".repeat(26 + 13 * configs.len() + 10));
    print!("{:<26}", "TOTAL");
    for total in &totals {
        print!(" {:>10.2?}", total);
    }
    println!();

    // Verify correctness
    println!("\n=======================================================");
    println!("  Correctness Verification");
    println!("=======================================================\n");

    let verifications: Vec<(&str, &str, &str, i32)> = vec![
        ("Loop Sum", BENCH_LOOP_SUM, "sum", 1799970000),
        ("Fibonacci", BENCH_FIBONACCI, "result", 17711),
        ("Polymorphic", BENCH_POLYMORPHIC, "total", 100000),
        ("Prime Count", BENCH_PRIME_SIEVE, "count", 669),
    ];

    print!("{:<20} {:>12}", "Test", "Expected");
    for (label, _) in &configs {
        print!(" {:>12}", label);
    }
    println!();
    println!("{}", "-".repeat(33 + 13 * configs.len()));

    for (name, code, var, expected) in verifications {
        print!("{:<20} {:>12}", name, expected);
        for (_, options) in &configs {
            let value = match run_and_get_var(code, var, options) {
                JsValue::Number(JsNumberType::Integer(n)) => Some(n),
                JsValue::Number(JsNumberType::Float(f)) if f.fract() == 0.0 => Some(f as i32),
                _ => None,
            };
            let status = if value == Some(expected) { "✓" } else { "✗" };
            print!(" {:>4} {:>7}", status, value.map_or("-".to_string(), |v| v.to_string()));
        }
        println!();
    }
}
