use clap::Parser;
use mjs_vm::compile;
use mjs_vm::disassemble;
use mjs_vm::Vm;
use mjs_vm::VmError;
use mjs_vm::VmOptions;
use std::io::stdin;
use std::io::stdout;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mjs", about = "Run scripts with the mjs-vm engine")]
struct Cli {
  /// Script to run; omit for stdin.
  file: Option<PathBuf>,

  /// Run CODE instead of a file.
  #[arg(short, long, value_name = "CODE", conflicts_with = "file")]
  eval: Option<String>,

  /// Print the bytecode listing instead of running the script.
  #[arg(long)]
  disasm: bool,

  /// JSON file with engine options; missing fields keep their defaults.
  #[arg(long, value_name = "JSON")]
  options: Option<PathBuf>,

  /// Log engine events to stderr. Filter with `RUST_LOG`; the default level is `warn`.
  #[arg(long)]
  trace: bool,
}

fn init_tracing(enabled: bool) {
  if !enabled {
    return;
  }
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_ansi(false)
    .try_init();
}

fn load_options(path: Option<&PathBuf>) -> Result<VmOptions, String> {
  let Some(path) = path else {
    return Ok(VmOptions::default());
  };
  let text = std::fs::read_to_string(path)
    .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
  serde_json::from_str(&text).map_err(|err| format!("invalid options in {}: {err}", path.display()))
}

/// Script name and text, read from the selected input.
fn read_source(cli: &Cli) -> Result<(String, String), String> {
  if let Some(code) = &cli.eval {
    return Ok(("<eval>".to_string(), code.clone()));
  }
  match &cli.file {
    Some(path) => std::fs::read_to_string(path)
      .map(|text| (path.display().to_string(), text))
      .map_err(|err| format!("failed to read file \"{}\": {err}", path.display())),
    None => {
      let mut text = String::new();
      stdin()
        .read_to_string(&mut text)
        .map_err(|err| format!("failed to read input: {err}"))?;
      Ok(("<stdin>".to_string(), text))
    }
  }
}

fn report(vm: Option<&Vm>, err: &VmError) -> ExitCode {
  eprintln!("{}: {err}", err.kind());
  if let Some(vm) = vm {
    let trace = vm.stack_trace();
    if !trace.is_empty() {
      eprintln!("{trace}");
    }
  }
  ExitCode::from(1)
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.trace);

  let options = match load_options(cli.options.as_ref()) {
    Ok(options) => options,
    Err(msg) => {
      eprintln!("{msg}");
      return ExitCode::from(1);
    }
  };
  let (name, source) = match read_source(&cli) {
    Ok(input) => input,
    Err(msg) => {
      eprintln!("{msg}");
      return ExitCode::from(1);
    }
  };

  if cli.disasm {
    return match compile(&name, &source, options.placeholder_width) {
      Ok(unit) => {
        print!("{}", disassemble(&unit));
        ExitCode::SUCCESS
      }
      Err(err) => report(None, &err),
    };
  }

  let mut vm = match Vm::new(options) {
    Ok(vm) => vm,
    Err(err) => return report(None, &err),
  };
  match vm.exec_named(&name, &source) {
    Ok(result) => {
      let mut out = stdout().lock();
      let _ = writeln!(out, "{}", vm.display(result));
      let _ = out.flush();
      ExitCode::SUCCESS
    }
    Err(err) => {
      let _ = stdout().flush();
      report(Some(&vm), &err)
    }
  }
}
