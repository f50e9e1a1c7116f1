use clap::Parser;
use mi2adapter::{AdapterConfig, BreakpointId, DebugEvent, GdbAdapter, Variable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Executable to debug (built with debug info)
    executable: PathBuf,

    /// Source file the executable was built from (default: <executable>.cpp)
    #[clap(long)]
    source: Option<PathBuf>,

    /// Adapter configuration file (JSON)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Debugger executable, overrides the configuration
    #[clap(long)]
    gdb: Option<String>,

    /// Do not watch conventional names and discovered locals on every stop
    #[clap(long)]
    no_auto_watch: bool,

    /// Log level of the front end
    #[clap(long, default_value = "warn")]
    log_level: log::LevelFilter,

    /// Log level of the adapter library
    #[clap(long, default_value = "info")]
    adapter_log_level: log::LevelFilter,
}

#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Break { file: Option<String>, line: u32 },
    Delete(u32),
    Run,
    Continue,
    Next,
    Step,
    Finish,
    Print(String),
    Watch(String),
    Unwatch(String),
    Expand(String),
    Collapse(String),
    Input(String),
    Interrupt,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  break [<file>:]<line>   set a breakpoint
  delete <id>             remove a breakpoint
  run | continue | next | step | finish | interrupt
  print <expr>            evaluate an expression
  watch <name>            add a watch variable
  unwatch <name>          remove a watch variable
  expand <name>           expand a variable
  collapse <name>         collapse a variable
  input <text>            send a line to the program's stdin
  quit";

fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let argument = |usage: &str| {
        if rest.is_empty() {
            Err(format!("usage: {}", usage))
        } else {
            Ok(rest.to_string())
        }
    };

    let command = match word {
        "break" | "b" => {
            let (file, line) = match rest.rsplit_once(':') {
                Some((file, line)) => (Some(file.to_string()), line),
                None => (None, rest),
            };
            let line = line
                .parse()
                .map_err(|_| "usage: break [<file>:]<line>".to_string())?;
            ConsoleCommand::Break { file, line }
        }
        "delete" | "d" => ConsoleCommand::Delete(
            rest.parse()
                .map_err(|_| "usage: delete <id>".to_string())?,
        ),
        "run" | "r" => ConsoleCommand::Run,
        "continue" | "c" => ConsoleCommand::Continue,
        "next" | "n" => ConsoleCommand::Next,
        "step" | "s" => ConsoleCommand::Step,
        "finish" => ConsoleCommand::Finish,
        "interrupt" => ConsoleCommand::Interrupt,
        "print" | "p" => ConsoleCommand::Print(argument("print <expr>")?),
        "watch" => ConsoleCommand::Watch(argument("watch <name>")?),
        "unwatch" => ConsoleCommand::Unwatch(argument("unwatch <name>")?),
        "expand" => ConsoleCommand::Expand(argument("expand <name>")?),
        "collapse" => ConsoleCommand::Collapse(argument("collapse <name>")?),
        "input" => ConsoleCommand::Input(rest.to_string()),
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command: {} (try help)", other)),
    };
    Ok(Some(command))
}

async fn execute(
    adapter: &GdbAdapter,
    command: ConsoleCommand,
    source: &Path,
) -> mi2adapter::Result<()> {
    match command {
        ConsoleCommand::Break { file, line } => {
            let file = file.map(PathBuf::from).unwrap_or_else(|| source.to_path_buf());
            if let Some(breakpoint) = adapter.set_breakpoint(&file, line).await? {
                println!(
                    "Breakpoint {} at {}:{}",
                    breakpoint.number, breakpoint.file, breakpoint.line
                );
            }
        }
        ConsoleCommand::Delete(id) => adapter.remove_breakpoint(BreakpointId(id)).await?,
        ConsoleCommand::Run => adapter.run().await?,
        ConsoleCommand::Continue => adapter.continue_execution().await?,
        ConsoleCommand::Next => adapter.step_over().await?,
        ConsoleCommand::Step => adapter.step_into().await?,
        ConsoleCommand::Finish => adapter.step_out().await?,
        ConsoleCommand::Interrupt => adapter.interrupt().await?,
        ConsoleCommand::Print(expression) => {
            let value = adapter.evaluate_expression(&expression).await?;
            println!("{} = {}", expression, value);
        }
        ConsoleCommand::Watch(name) => {
            if !adapter.add_watch_variable(&name).await? {
                println!("{} is not visible here", name);
            }
        }
        ConsoleCommand::Unwatch(name) => {
            adapter.remove_watch_variable(&name)?;
        }
        ConsoleCommand::Expand(name) => {
            adapter.expand_variable(&name).await?;
        }
        ConsoleCommand::Collapse(name) => {
            adapter.collapse_variable(&name)?;
        }
        ConsoleCommand::Input(text) => adapter.send_input(&text)?,
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn print_variable(variable: &Variable, depth: usize) {
    let marker = match (&variable.children, variable.expanded) {
        (Some(_), true) => "-",
        (Some(_), false) => "+",
        (None, _) => " ",
    };
    println!(
        "{:indent$}{} {} = {} ({})",
        "",
        marker,
        variable.name,
        variable.value,
        variable.var_type,
        indent = depth * 2
    );
    if variable.expanded {
        for child in variable.children.iter().flatten() {
            print_variable(child, depth + 1);
        }
    }
}

fn print_event(event: &DebugEvent) {
    match event {
        DebugEvent::Started { executable, .. } => {
            println!("Debugging {}", executable.display())
        }
        DebugEvent::Exited { code } => match code {
            Some(code) => println!("GDB exited ({})", code),
            None => println!("GDB exited"),
        },
        DebugEvent::Error(message) => println!("error: {}", message),
        DebugEvent::Stopped(info) => println!(
            "Stopped ({}) in {} at {}:{}",
            info.reason.as_deref().unwrap_or("unknown"),
            info.function.as_deref().unwrap_or("??"),
            info.file.as_deref().unwrap_or("??"),
            info.line.unwrap_or(0)
        ),
        DebugEvent::BreakpointHit(info) => {
            if let Some(number) = info.breakpoint {
                println!("Breakpoint {} hit", number);
            }
        }
        DebugEvent::Running => println!("Running..."),
        DebugEvent::BreakpointSet(_) => {}
        DebugEvent::BreakpointRemoved(id) => println!("Breakpoint {} removed", id),
        DebugEvent::VariablesUpdated(variables) => {
            for variable in variables {
                print_variable(variable, 0);
            }
        }
        DebugEvent::VariableExpanded(variable) | DebugEvent::VariableCollapsed(variable) => {
            print_variable(variable, 0)
        }
        DebugEvent::VariableRemoved(name) => println!("No longer watching {}", name),
        DebugEvent::CallstackUpdated(frames) => {
            for frame in frames {
                println!(
                    "#{} {} at {}:{}",
                    frame.level,
                    frame.function.as_deref().unwrap_or("??"),
                    frame.file.as_deref().unwrap_or("??"),
                    frame.line.unwrap_or(0)
                );
            }
        }
        DebugEvent::ConsoleOutput(text) | DebugEvent::TargetOutput(text) => print!("{}", text),
        DebugEvent::LogOutput(text) => log::debug!("gdb: {}", text.trim_end()),
        DebugEvent::ProgramExited { exit_code, .. } => {
            println!("Program exited with code {}", exit_code)
        }
    }
}

async fn run(args: Args) -> mi2adapter::Result<()> {
    let mut config = match &args.config {
        Some(path) => AdapterConfig::from_file(path)?,
        None => AdapterConfig::default(),
    };
    if let Some(gdb) = args.gdb {
        config = config.with_gdb_path(gdb);
    }
    if args.no_auto_watch {
        config.auto_watch = false;
    }

    let adapter = Arc::new(GdbAdapter::new(config));
    let version = adapter.probe().await?;
    println!("Using {}", version);

    let source = args
        .source
        .unwrap_or_else(|| args.executable.with_extension("cpp"));
    adapter.start(&args.executable, &source).await?;

    let receiver = adapter.get_event_receiver();
    let printer = tokio::spawn(async move {
        loop {
            let event = receiver.lock().await.recv().await;
            match event {
                Some(event) => print_event(&event),
                None => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&adapter, command, &source).await {
                    println!("error: {}", e);
                }
            }
            Ok(None) => {}
            Err(message) => println!("{}", message),
        }
    }

    adapter.stop().await?;
    // let the printer drain what stop() emitted
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    printer.abort();
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(args.log_level)
        .with_module_level("mi2adapter", args.adapter_log_level)
        .init()
    {
        eprintln!("Failed to initialize logger: {}", e);
    }

    log::info!("cpdbg starting...");

    let exit_code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            1
        }
    };

    log::info!("cpdbg exited with code: {exit_code}");
    std::process::exit(exit_code);
}
