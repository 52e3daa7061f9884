//! Command-line shell for the tierjs engine.
//!
//! Usage:
//!   tierjs <file.js>...          # Run files in order in one realm
//!   tierjs -e "code"             # Evaluate a script
//!   tierjs                       # Start REPL (interactive mode)
//!
//! Exit codes: 0 success, 1 usage or I/O error, 2 compile error, 3 uncaught
//! exception, 6 terminated by `--timeout`.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tierjs::runner::api::Engine;
use tierjs::runner::config::{CompileOptions, DelazificationStrategy, EngineOptions};
use tierjs::runner::ds::error::EngineError;
use tierjs::runner::ds::operations::type_conversion::to_string;
use tierjs::runner::ds::value::JsValue;

const EXIT_USAGE: i32 = 1;
const EXIT_COMPILE_ERROR: i32 = 2;
const EXIT_UNCAUGHT: i32 = 3;
const EXIT_TERMINATED: i32 = 6;

#[derive(Parser, Debug)]
#[command(name = "tierjs", version, about = "Run JavaScript through the tierjs engine")]
struct Cli {
    /// Script files, run in order in the same realm.
    files: Vec<PathBuf>,

    /// Evaluate CODE after the files.
    #[arg(short = 'e', long = "eval", value_name = "CODE")]
    eval: Vec<String>,

    /// Engine options as TOML. Flags override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tier up almost immediately.
    #[arg(long)]
    eager: bool,

    #[arg(long)]
    no_ion: bool,

    #[arg(long)]
    no_baseline: bool,

    #[arg(long)]
    no_blinterp: bool,

    #[arg(long, value_name = "N")]
    ion_warmup_threshold: Option<u32>,

    #[arg(long, value_name = "N")]
    baseline_warmup_threshold: Option<u32>,

    #[arg(long, value_name = "N")]
    blinterp_warmup_threshold: Option<u32>,

    /// Compile optimized code on helper threads.
    #[arg(long)]
    off_thread: bool,

    /// on-demand, eager, concurrent-df or concurrent-large-first.
    #[arg(long, value_name = "STRATEGY", value_parser = parse_delazification)]
    delazification: Option<DelazificationStrategy>,

    /// Terminate the script after SECONDS.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<f64>,

    #[arg(long)]
    strict: bool,
}

fn parse_delazification(name: &str) -> Result<DelazificationStrategy, String> {
    DelazificationStrategy::from_name(name).ok_or_else(|| format!("unknown delazification strategy '{}'", name))
}

impl Cli {
    fn engine_options(&self) -> EngineOptions {
        let mut options = match &self.config {
            Some(path) => match EngineOptions::from_file(path) {
                Ok(options) => options,
                Err(e) => {
                    eprintln!("tierjs: {}", e);
                    process::exit(EXIT_USAGE);
                }
            },
            None if self.eager => EngineOptions::eager(),
            None => EngineOptions::default(),
        };
        if self.no_ion {
            options.enable_ion = false;
        }
        if self.no_baseline {
            options.enable_baseline = false;
        }
        if self.no_blinterp {
            options.enable_blinterp = false;
        }
        if let Some(n) = self.ion_warmup_threshold {
            options.ion_warmup_threshold = n;
        }
        if let Some(n) = self.baseline_warmup_threshold {
            options.baseline_warmup_threshold = n;
        }
        if let Some(n) = self.blinterp_warmup_threshold {
            options.blinterp_warmup_threshold = n;
        }
        if self.off_thread {
            options.off_thread_compilation = true;
        }
        options
    }

    fn compile_options(&self, filename: &str) -> CompileOptions {
        CompileOptions {
            strict: self.strict,
            delazification: self.delazification.unwrap_or_default(),
            ..CompileOptions::with_filename(filename)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut engine = Engine::new(cli.engine_options());
    if let Some(seconds) = cli.timeout {
        start_watchdog(&engine, seconds);
    }

    if cli.files.is_empty() && cli.eval.is_empty() {
        run_repl(&mut engine, &cli);
        return;
    }

    for path in &cli.files {
        let source = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("tierjs: can't read '{}': {}", path.display(), e);
                process::exit(EXIT_USAGE);
            }
        };
        let filename = path.display().to_string();
        if let Err(code) = run_source(&mut engine, &source, cli.compile_options(&filename)) {
            process::exit(code);
        }
    }
    for code in &cli.eval {
        if let Err(code) = run_source(&mut engine, code, cli.compile_options("-e")) {
            process::exit(code);
        }
    }
}

fn start_watchdog(engine: &Engine, seconds: f64) {
    let handle = engine.interrupt_handle();
    let delay = Duration::from_secs_f64(seconds.max(0.0));
    let spawned = std::thread::Builder::new()
        .name("tierjs-watchdog".to_string())
        .spawn(move || {
            std::thread::sleep(delay);
            handle.interrupt();
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "could not start the timeout thread");
    }
}

/// Runs one script and reports failures. The error is the exit code.
fn run_source(engine: &mut Engine, source: &str, options: CompileOptions) -> Result<JsValue, i32> {
    let script = engine.compile(source, options).map_err(|e| {
        eprintln!("{}", e);
        EXIT_COMPILE_ERROR
    })?;
    engine.run(&script).map_err(|e| report(&e))
}

fn report(error: &EngineError) -> i32 {
    match error {
        EngineError::Compile(e) => {
            eprintln!("{}", e);
            EXIT_COMPILE_ERROR
        }
        EngineError::Uncaught(exception) => {
            eprintln!("{}", exception);
            EXIT_UNCAUGHT
        }
        EngineError::Interrupted => {
            eprintln!("tierjs: script terminated");
            EXIT_TERMINATED
        }
    }
}

fn run_repl(engine: &mut Engine, cli: &Cli) {
    println!("tierjs {} (type .exit to quit)", env!("CARGO_PKG_VERSION"));
    let stdin = io::stdin();
    let mut line_number = 1;
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            break;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("tierjs: {}", e);
                break;
            }
        }
        let input = line.trim();
        if input == ".exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }
        let options = CompileOptions {
            line: line_number,
            ..cli.compile_options("<repl>")
        };
        line_number += 1;
        if let Ok(value) = run_source(engine, input, options) {
            if !value.is_undefined() {
                println!("{}", to_string(engine.realm(), &value));
            }
        }
    }
}
