/// Integration tests for the GDB adapter
///
/// The adapter is attached to a scripted fake GDB over an in-memory duplex
/// stream, so no debugger binary is needed.

use mi2adapter::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

const LOCALS_ALL: &str = r#"variables=[{name="x",value="5"},{name="v",value="{1, 2, 3}"}]"#;
const LOCALS_SIMPLE: &str =
    r#"variables=[{name="x",type="int",value="5"},{name="v",type="std::vector<int>"}]"#;
const STACK: &str = r#"stack=[frame={level="0",addr="0x0000555555555189",func="main",file="main.cpp",fullname="/src/main.cpp",line="5"}]"#;

/// Commands the fake received, without tokens
type CommandLog = Arc<Mutex<Vec<String>>>;

struct FakeGdb {
    commands: CommandLog,
    push: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl FakeGdb {
    /// Write an unsolicited record, as GDB does for async output
    fn push(&self, record: &str) {
        self.push.send(record.to_string()).unwrap();
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

fn split_token(line: &str) -> (&str, &str) {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    line.split_at(digits)
}

/// Start a fake GDB that answers each command with `responder`'s lines
///
/// Result lines (`^...`) get the command's token prepended.
fn spawn_fake_gdb<F>(
    prompt_first: bool,
    responder: F,
) -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>, FakeGdb)
where
    F: Fn(&str) -> Vec<String> + Send + 'static,
{
    let (adapter_side, gdb_side) = tokio::io::duplex(64 * 1024);
    let (adapter_read, adapter_write) = tokio::io::split(adapter_side);
    let (gdb_read, mut gdb_write) = tokio::io::split(gdb_side);
    let (push, mut pushed) = mpsc::unbounded_channel::<String>();
    let commands: CommandLog = Arc::new(Mutex::new(Vec::new()));
    let log = commands.clone();

    let task = tokio::spawn(async move {
        if prompt_first {
            gdb_write.write_all(b"(gdb) \n").await.unwrap();
        }
        let mut lines = BufReader::new(gdb_read).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else {
                        break;
                    };
                    let (token, command) = split_token(&line);
                    log.lock().unwrap().push(command.to_string());
                    if token.is_empty() && !command.starts_with('-') {
                        // inferior input, not an MI command
                        continue;
                    }
                    if command == "-gdb-exit" {
                        let _ = gdb_write.write_all(format!("{}^exit\n", token).as_bytes()).await;
                        break;
                    }
                    let mut output = String::new();
                    for reply in responder(command) {
                        if reply.starts_with('^') {
                            output.push_str(token);
                        }
                        output.push_str(&reply);
                        output.push('\n');
                    }
                    output.push_str("(gdb) \n");
                    if gdb_write.write_all(output.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(record) = pushed.recv() => {
                    let record = format!("{}\n", record);
                    if gdb_write.write_all(record.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    (
        adapter_read,
        adapter_write,
        FakeGdb {
            commands,
            push,
            task,
        },
    )
}

fn quoted_argument(command: &str) -> Option<&str> {
    let start = command.find('"')?;
    let end = command.rfind('"')?;
    (end > start).then(|| &command[start + 1..end])
}

/// A fake GDB with one `main.cpp` program: locals `x` and `v`
fn program_responder() -> impl Fn(&str) -> Vec<String> + Send + 'static {
    let next_breakpoint = AtomicU32::new(1);
    move |command: &str| {
        let reply = |line: &str| vec![line.to_string()];
        if command.starts_with("-gdb-set") || command.starts_with("-environment-directory") {
            reply("^done")
        } else if command.starts_with("-break-insert") {
            let location = quoted_argument(command).unwrap_or_default();
            let Some((file, line)) = location.rsplit_once(':') else {
                return reply(r#"^error,msg="Bad location""#);
            };
            if file.contains('/') {
                return reply(r#"^error,msg="No source file named /src/main.cpp.""#);
            }
            let number = next_breakpoint.fetch_add(1, Ordering::SeqCst);
            reply(&format!(
                r#"^done,bkpt={{number="{}",type="breakpoint",disp="keep",enabled="y",addr="0x1149",func="main",file="{}",fullname="/src/{}",line="{}",thread-groups=["i1"],times="0"}}"#,
                number, file, file, line
            ))
        } else if command.starts_with("-break-delete") {
            reply("^done")
        } else if command.starts_with("-exec-") {
            vec![
                "^running".to_string(),
                r#"*running,thread-id="all""#.to_string(),
            ]
        } else if command == "-stack-list-variables --all-values" {
            reply(&format!("^done,{}", LOCALS_ALL))
        } else if command == "-stack-list-variables --simple-values" {
            reply(&format!("^done,{}", LOCALS_SIMPLE))
        } else if command == "-stack-list-frames" {
            reply(&format!("^done,{}", STACK))
        } else if command.starts_with("-data-evaluate-expression") {
            match quoted_argument(command).unwrap_or_default() {
                "x" => reply(r#"^done,value="5""#),
                "v" => reply(r#"^done,value="{1, 2, 3}""#),
                "slow" => Vec::new(),
                "1 + 1" => reply(r#"^done,value="2""#),
                other => reply(&format!(
                    r#"^error,msg="No symbol \"{}\" in current context.""#,
                    other
                )),
            }
        } else if command.starts_with("-var-create") {
            reply(r#"^done,name="var1",numchild="3",value="{...}",type="std::vector<int>",has_more="0""#)
        } else if command.starts_with("-var-list-children") {
            reply(r#"^done,numchild="3",children=[child={name="var1.[0]",exp="0",numchild="0",value="1",type="int"},child={name="var1.[1]",exp="1",numchild="0",value="2",type="int"},child={name="var1.[2]",exp="2",numchild="0",value="3",type="int"}],has_more="0""#)
        } else {
            reply(&format!(r#"^error,msg="Undefined MI command: {}""#, command))
        }
    }
}

fn test_config() -> AdapterConfig {
    AdapterConfig {
        init_timeout: Duration::from_secs(2),
        command_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_millis(500),
        settle_delay: Duration::from_millis(10),
        auto_watch: false,
        ..AdapterConfig::default()
    }
}

async fn attach_program(config: AdapterConfig) -> (GdbAdapter, FakeGdb) {
    let (reader, writer, gdb) = spawn_fake_gdb(true, program_responder());
    let adapter = GdbAdapter::new(config);
    assert_ok!(
        adapter
            .attach(reader, writer, "/src/main", "/src/main.cpp")
            .await
    );
    (adapter, gdb)
}

async fn wait_for<P>(adapter: &GdbAdapter, predicate: P) -> DebugEvent
where
    P: Fn(&DebugEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let event = adapter.next_event().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

const BREAKPOINT_STOP: &str = r#"*stopped,reason="breakpoint-hit",disp="keep",bkptno="1",frame={addr="0x1149",func="main",args=[],file="main.cpp",fullname="/src/main.cpp",line="5"},thread-id="1",stopped-threads="all""#;

#[tokio::test]
async fn test_attach_initializes_session() {
    let (adapter, gdb) = attach_program(test_config()).await;

    assert_eq!(adapter.state(), SessionState::Ready);
    let started = wait_for(&adapter, |e| matches!(e, DebugEvent::Started { .. })).await;
    assert_eq!(
        started,
        DebugEvent::Started {
            executable: "/src/main".into(),
            source: "/src/main.cpp".into(),
        }
    );
    assert_eq!(
        gdb.commands(),
        vec![
            "-gdb-set confirm off",
            "-gdb-set pagination off",
            "-gdb-set breakpoint pending on",
            r#"-environment-directory "/src""#,
        ]
    );
    assert!(adapter.output_buffer().contains("(gdb)"));
}

#[tokio::test]
async fn test_breakpoint_run_and_stop_refresh() {
    let (adapter, gdb) = attach_program(test_config()).await;

    let breakpoint = assert_ok!(adapter.set_breakpoint("/src/main.cpp", 5).await).unwrap();
    assert_eq!(breakpoint.number, BreakpointId(1));
    assert_eq!(breakpoint.file, "main.cpp");
    assert_eq!(breakpoint.line, 5);
    assert_eq!(adapter.breakpoints(), vec![breakpoint]);
    // base name accepted, full path never tried
    assert!(gdb.commands().contains(&r#"-break-insert "main.cpp:5""#.to_string()));
    assert!(!gdb.commands().iter().any(|c| c.contains("/src/main.cpp:5")));

    assert_ok!(adapter.run().await);
    assert_eq!(adapter.state(), SessionState::Running);

    gdb.push(BREAKPOINT_STOP);
    let hit = wait_for(&adapter, |e| matches!(e, DebugEvent::BreakpointHit(_))).await;
    match hit {
        DebugEvent::BreakpointHit(info) => {
            assert_eq!(info.line, Some(5));
            assert_eq!(info.breakpoint, Some(BreakpointId(1)));
        }
        other => panic!("Expected breakpoint-hit, got {:?}", other),
    }
    assert_eq!(adapter.state(), SessionState::Stopped);

    let updated = wait_for(&adapter, |e| {
        matches!(e, DebugEvent::VariablesUpdated(_) | DebugEvent::CallstackUpdated(_))
    })
    .await;
    let DebugEvent::VariablesUpdated(variables) = updated else {
        panic!("Expected variables before the call stack, got {:?}", updated);
    };
    assert_eq!(variables.len(), 2);
    let x = variables.iter().find(|v| v.name == "x").unwrap();
    assert_eq!(x.value, "5");
    assert_eq!(x.var_type, "int");
    assert!(x.children.is_none());
    let v = variables.iter().find(|v| v.name == "v").unwrap();
    assert!(v.is_container);
    let children = v.children.as_ref().unwrap();
    let pairs: Vec<(&str, &str)> = children
        .iter()
        .map(|c| (c.name.as_str(), c.value.as_str()))
        .collect();
    assert_eq!(pairs, vec![("[0]", "1"), ("[1]", "2"), ("[2]", "3")]);

    let stack = wait_for(&adapter, |e| matches!(e, DebugEvent::CallstackUpdated(_))).await;
    let DebugEvent::CallstackUpdated(frames) = stack else {
        unreachable!()
    };
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].function.as_deref(), Some("main"));
    assert_eq!(adapter.call_stack(), frames);
}

#[tokio::test]
async fn test_error_rejects_only_that_call() {
    let (adapter, _gdb) = attach_program(test_config()).await;

    match adapter.evaluate_expression("foo").await {
        Err(DebuggerError::Command(message)) => {
            assert_eq!(message, "No symbol \"foo\" in current context.")
        }
        other => panic!("Expected command error, got {:?}", other),
    }
    assert_eq!(assert_ok!(adapter.evaluate_expression("1 + 1").await), "2");
    assert!(adapter.is_running());
}

#[tokio::test]
async fn test_non_ascii_program_output_keeps_session_alive() {
    let (adapter, gdb) = attach_program(test_config()).await;

    gdb.push("中文输出");
    gdb.push("é résultat");
    gdb.push(r#"~"après 中文\n""#);
    wait_for(&adapter, |event| {
        matches!(event, DebugEvent::ConsoleOutput(text) if text == "après 中文\n")
    })
    .await;

    assert_eq!(assert_ok!(adapter.evaluate_expression("1 + 1").await), "2");
    assert_eq!(adapter.state(), SessionState::Ready);
    assert!(adapter.try_recv_event().map_or(true, |event| !matches!(
        event,
        DebugEvent::Error(_) | DebugEvent::Exited { .. }
    )));
}

#[tokio::test]
async fn test_concurrent_commands_complete_in_order() {
    let (adapter, gdb) = attach_program(test_config()).await;
    let before = gdb.commands().len();

    let (a, b, c) = tokio::join!(
        adapter.evaluate_expression("x"),
        adapter.evaluate_expression("v"),
        adapter.evaluate_expression("1 + 1"),
    );
    assert_eq!(assert_ok!(a), "5");
    assert_eq!(assert_ok!(b), "{1, 2, 3}");
    assert_eq!(assert_ok!(c), "2");

    assert_eq!(
        gdb.commands()[before..],
        [
            r#"-data-evaluate-expression "x""#,
            r#"-data-evaluate-expression "v""#,
            r#"-data-evaluate-expression "1 + 1""#,
        ]
    );
}

#[tokio::test]
async fn test_timeout_is_soft_success() {
    let config = AdapterConfig {
        command_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let (adapter, _gdb) = attach_program(config).await;

    assert_eq!(assert_ok!(adapter.evaluate_expression("slow").await), "");
    assert_eq!(assert_ok!(adapter.evaluate_expression("x").await), "5");
}

#[tokio::test]
async fn test_breakpoint_fallback_and_failure() {
    let (reader, writer, gdb) = spawn_fake_gdb(true, |command: &str| {
        if command == r#"-break-insert "main.cpp:7""# {
            vec![r#"^error,msg="No source file named main.cpp.""#.to_string()]
        } else if command == r#"-break-insert "/src/main.cpp:7""# {
            vec![r#"^done,bkpt={number="4",type="breakpoint",enabled="y",file="/src/main.cpp",line="7"}"#.to_string()]
        } else if command.starts_with("-break-insert") {
            vec![r#"^error,msg="No line 99 in the current file.""#.to_string()]
        } else {
            vec!["^done".to_string()]
        }
    });
    let adapter = GdbAdapter::new(test_config());
    assert_ok!(
        adapter
            .attach(reader, writer, "/src/main", "/src/main.cpp")
            .await
    );

    let breakpoint = assert_ok!(adapter.set_breakpoint("/src/main.cpp", 7).await).unwrap();
    assert_eq!(breakpoint.number, BreakpointId(4));
    assert_eq!(breakpoint.line, 7);

    match adapter.set_breakpoint("/src/main.cpp", 99).await {
        Err(DebuggerError::BreakpointInsertFailed { location, message }) => {
            assert_eq!(location, "/src/main.cpp:99");
            assert_eq!(message, "No line 99 in the current file.");
        }
        other => panic!("Expected BreakpointInsertFailed, got {:?}", other),
    }
    let attempts: Vec<String> = gdb
        .commands()
        .into_iter()
        .filter(|c| c.contains(":99"))
        .collect();
    assert_eq!(attempts.len(), 2);
    assert_eq!(adapter.breakpoints().len(), 1);
}

#[tokio::test]
async fn test_breakpoint_notifications_drive_registry() {
    let (adapter, gdb) = attach_program(test_config()).await;

    gdb.push(r#"=breakpoint-created,bkpt={number="1",type="breakpoint",enabled="y",file="file",line="10"}"#);
    wait_for(&adapter, |e| matches!(e, DebugEvent::BreakpointSet(_))).await;
    let breakpoints = adapter.breakpoints();
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0].number, BreakpointId(1));
    assert_eq!(breakpoints[0].file, "file");
    assert_eq!(breakpoints[0].line, 10);

    assert_ok!(adapter.remove_breakpoint(BreakpointId(1)).await);
    let removed = wait_for(&adapter, |e| matches!(e, DebugEvent::BreakpointRemoved(_))).await;
    assert_eq!(removed, DebugEvent::BreakpointRemoved(BreakpointId(1)));
    assert!(adapter.breakpoints().is_empty());
}

#[tokio::test]
async fn test_program_exit_and_rerun() {
    let (adapter, gdb) = attach_program(test_config()).await;
    assert_ok!(adapter.run().await);

    gdb.push(r#"=thread-group-exited,id="i1",exit-code="03""#);
    let exited = wait_for(&adapter, |e| matches!(e, DebugEvent::ProgramExited { .. })).await;
    assert_eq!(
        exited,
        DebugEvent::ProgramExited {
            exit_code: 3,
            reason: ExitReason::ProcessExit,
        }
    );
    assert_eq!(adapter.state(), SessionState::Exited { code: 3 });

    assert_ok!(adapter.run().await);
    assert_eq!(adapter.state(), SessionState::Running);
}

#[tokio::test]
async fn test_stop_twice_clears_everything() {
    let (adapter, gdb) = attach_program(test_config()).await;
    assert_ok!(adapter.set_breakpoint("main.cpp", 5).await);
    assert!(!adapter.breakpoints().is_empty());

    assert_ok!(adapter.stop().await);
    assert_ok!(adapter.stop().await);

    assert_eq!(adapter.state(), SessionState::Terminated);
    assert!(adapter.breakpoints().is_empty());
    assert!(adapter.variables().is_empty());
    assert!(adapter.call_stack().is_empty());
    assert!(adapter.watches().is_empty());
    assert!(adapter.output_buffer().is_empty());
    assert_eq!(gdb.commands().last().map(String::as_str), Some("-gdb-exit"));
    assert_ok!(assert_ok!(
        tokio::time::timeout(Duration::from_secs(1), gdb.task).await
    ));

    let mut exits = 0;
    while let Some(event) = adapter.try_recv_event() {
        if matches!(event, DebugEvent::Exited { .. }) {
            exits += 1;
        }
    }
    assert_eq!(exits, 1);
    assert!(matches!(adapter.run().await, Err(DebuggerError::NotRunning)));
}

#[tokio::test]
async fn test_second_attach_is_rejected() {
    let (adapter, _gdb) = attach_program(test_config()).await;
    let (reader, writer, _other) = spawn_fake_gdb(true, program_responder());
    let result = adapter.attach(reader, writer, "/src/main", "/src/main.cpp").await;
    assert!(matches!(result, Err(DebuggerError::AlreadyRunning)));
    assert_eq!(adapter.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_init_timeout_leaves_no_session() {
    let config = AdapterConfig {
        init_timeout: Duration::from_millis(100),
        shutdown_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let (reader, writer, _gdb) = spawn_fake_gdb(false, |_: &str| Vec::new());
    let adapter = GdbAdapter::new(config);

    let result = adapter.attach(reader, writer, "/src/main", "/src/main.cpp").await;
    assert!(matches!(result, Err(DebuggerError::InitTimeout)));
    assert!(!adapter.is_running());
    assert!(matches!(
        adapter.evaluate_expression("x").await,
        Err(DebuggerError::NotRunning)
    ));
}

#[tokio::test]
async fn test_unexpected_gdb_exit() {
    let (adapter, gdb) = attach_program(test_config()).await;
    gdb.task.abort();

    let error = wait_for(&adapter, |e| matches!(e, DebugEvent::Error(_))).await;
    assert_eq!(error, DebugEvent::Error("GDB exited unexpectedly".into()));
    wait_for(&adapter, |e| matches!(e, DebugEvent::Exited { .. })).await;
    assert_eq!(adapter.state(), SessionState::Terminated);

    // a new session can be attached after the old one died
    let (reader, writer, _next) = spawn_fake_gdb(true, program_responder());
    assert_ok!(
        adapter
            .attach(reader, writer, "/src/main", "/src/main.cpp")
            .await
    );
    assert_eq!(adapter.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_watch_variables() {
    let (adapter, gdb) = attach_program(test_config()).await;

    assert!(!assert_ok!(adapter.add_watch_variable("nope").await));
    assert!(adapter.watches().is_empty());

    assert!(assert_ok!(adapter.add_watch_variable("x").await));
    assert_eq!(adapter.watches(), vec!["x".to_string()]);
    let watched = adapter
        .variables()
        .into_iter()
        .find(|v| v.scope == Scope::Watch)
        .unwrap();
    assert_eq!(watched.name, "x");
    assert_eq!(watched.value, "5");

    // a watch survives stops and is re-evaluated
    assert_ok!(adapter.run().await);
    gdb.push(BREAKPOINT_STOP);
    wait_for(&adapter, |e| matches!(e, DebugEvent::CallstackUpdated(_))).await;
    let variables = adapter.variables();
    assert!(variables.iter().any(|v| v.scope == Scope::Watch && v.name == "x"));
    assert!(variables.iter().any(|v| v.scope == Scope::Local && v.name == "x"));

    assert!(assert_ok!(adapter.remove_watch_variable("x")));
    assert!(adapter.watches().is_empty());
    assert!(!adapter.variables().iter().any(|v| v.scope == Scope::Watch));
}

#[tokio::test]
async fn test_auto_watch_discovers_locals() {
    let config = AdapterConfig {
        auto_watch: true,
        auto_watch_names: vec!["i".to_string(), "x".to_string()],
        ..test_config()
    };
    let (adapter, gdb) = attach_program(config).await;
    assert_ok!(adapter.run().await);
    gdb.push(BREAKPOINT_STOP);
    wait_for(&adapter, |e| matches!(e, DebugEvent::CallstackUpdated(_))).await;

    assert_eq!(adapter.watches(), vec!["x".to_string(), "v".to_string()]);
    assert!(gdb
        .commands()
        .contains(&r#"-data-evaluate-expression "i""#.to_string()));
}

#[tokio::test]
async fn test_expand_fetches_children_once() {
    let (adapter, gdb) = attach_program(test_config()).await;
    assert_ok!(adapter.run().await);
    gdb.push(BREAKPOINT_STOP);
    wait_for(&adapter, |e| matches!(e, DebugEvent::CallstackUpdated(_))).await;

    let expanded = assert_ok!(adapter.expand_variable("v").await);
    assert!(expanded.expanded);
    let children = expanded.children.unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(children[2].name, "[2]");
    assert_eq!(children[2].var_type, "int");
    assert!(gdb
        .commands()
        .contains(&r#"-var-create var1 * "v""#.to_string()));

    let collapsed = assert_ok!(adapter.collapse_variable("v"));
    assert!(!collapsed.expanded);
    assert_ok!(adapter.expand_variable("v").await);
    let creations = gdb
        .commands()
        .iter()
        .filter(|c| c.starts_with("-var-create"))
        .count();
    assert_eq!(creations, 1);

    // scalars expand without variable objects
    assert_ok!(adapter.expand_variable("x").await);
    assert_err!(adapter.expand_variable("missing").await);
}

#[tokio::test]
async fn test_send_input_reaches_gdb() {
    let (adapter, gdb) = attach_program(test_config()).await;
    assert_ok!(adapter.send_input("3 4"));
    // the next command flushes behind the raw line
    assert_ok!(adapter.evaluate_expression("x").await);
    let commands = gdb.commands();
    let input = commands.iter().position(|c| c == "3 4").unwrap();
    let evaluate = commands
        .iter()
        .position(|c| c == r#"-data-evaluate-expression "x""#)
        .unwrap();
    assert!(input < evaluate);
}
