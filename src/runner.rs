use crate::host::Registry;
use crate::surface::{LineStyle, LogSurface, PanelFactory, SurfaceError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn style(self) -> LineStyle {
        match self {
            Stream::Stdout => LineStyle::Stdout,
            Stream::Stderr => LineStyle::Stderr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Stream, Vec<u8>),
    Closed(Stream),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShellOption {
    #[default]
    Off,
    Default,
    Program(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("options must be a mapping")]
    NotAMapping,
    #[error("invalid option '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    pub env: Option<BTreeMap<String, String>>,
    pub shell: ShellOption,
    pub ignored: Vec<String>,
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

impl SpawnOptions {
    pub fn from_value(value: &Value) -> Result<Self, OptionsError> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(map) => map,
            _ => return Err(OptionsError::NotAMapping),
        };
        let invalid = |key: &str, reason: &str| OptionsError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let mut options = Self::default();
        for (key, item) in map {
            let Some(key) = key.as_str() else {
                options.ignored.push(format!("{key:?}"));
                continue;
            };
            match key {
                "cwd" => match item {
                    Value::Null => {}
                    Value::String(dir) => options.cwd = Some(PathBuf::from(dir)),
                    _ => return Err(invalid(key, "expected a string")),
                },
                "env" => {
                    let Some(vars) = item.as_mapping() else {
                        return Err(invalid(key, "expected a mapping"));
                    };
                    let mut env = BTreeMap::new();
                    for (name, value) in vars {
                        let (Some(name), Some(value)) = (name.as_str(), scalar_text(value)) else {
                            return Err(invalid(key, "expected string keys and scalar values"));
                        };
                        env.insert(name.to_string(), value);
                    }
                    options.env = Some(env);
                }
                "shell" => {
                    options.shell = match item {
                        Value::Null | Value::Bool(false) => ShellOption::Off,
                        Value::Bool(true) => ShellOption::Default,
                        Value::String(program) => ShellOption::Program(program.clone()),
                        _ => return Err(invalid(key, "expected a boolean or a shell path")),
                    }
                }
                other => options.ignored.push(other.to_string()),
            }
        }
        Ok(options)
    }
}

pub trait WaitExit {
    fn wait_exit(&mut self) -> io::Result<ExitInfo>;
}

impl WaitExit for Child {
    fn wait_exit(&mut self) -> io::Result<ExitInfo> {
        let status = self.wait()?;
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Ok(ExitInfo {
            code: status.code(),
            signal,
        })
    }
}

pub struct SpawnedProcess {
    pub events: Receiver<StreamEvent>,
    pub exit: Box<dyn WaitExit>,
}

pub trait Spawner {
    fn spawn(
        &self,
        command: &str,
        args: Vec<String>,
        options: &SpawnOptions,
    ) -> io::Result<SpawnedProcess>;
}

pub struct ProcessSpawner;

fn join_command_line(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(windows)]
fn shell_command(program: &str, line: String) -> Command {
    let mut cmd = Command::new(program);
    if program.to_ascii_lowercase().ends_with("cmd.exe") || program.eq_ignore_ascii_case("cmd") {
        cmd.args(["/d", "/s", "/c"]);
    } else {
        cmd.arg("-c");
    }
    cmd.arg(line);
    cmd
}

#[cfg(not(windows))]
fn shell_command(program: &str, line: String) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn direct_command(command: &str, args: Vec<String>) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/s", "/c", command]).args(args);
    cmd
}

#[cfg(not(windows))]
fn direct_command(command: &str, args: Vec<String>) -> Command {
    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd
}

fn build_command(command: &str, args: Vec<String>, options: &SpawnOptions) -> Command {
    let default_shell = if cfg!(windows) { "cmd.exe" } else { "/bin/sh" };
    let mut cmd = match &options.shell {
        ShellOption::Off => direct_command(command, args),
        ShellOption::Default => shell_command(default_shell, join_command_line(command, &args)),
        ShellOption::Program(program) => shell_command(program, join_command_line(command, &args)),
    };
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(env) = &options.env {
        cmd.env_clear();
        cmd.envs(env);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

fn forward<R: Read + Send + 'static>(mut reader: R, stream: Stream, tx: Sender<StreamEvent>) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(StreamEvent::Data(stream, buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("{stream:?} read failed: {err}");
                    break;
                }
            }
        }
        let _ = tx.send(StreamEvent::Closed(stream));
    });
}

impl Spawner for ProcessSpawner {
    fn spawn(
        &self,
        command: &str,
        args: Vec<String>,
        options: &SpawnOptions,
    ) -> io::Result<SpawnedProcess> {
        let mut child = build_command(command, args, options).spawn()?;
        log::info!("spawned {command} (pid {})", child.id());
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward(stdout, Stream::Stdout, tx.clone());
        } else {
            let _ = tx.send(StreamEvent::Closed(Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            forward(stderr, Stream::Stderr, tx);
        } else {
            let _ = tx.send(StreamEvent::Closed(Stream::Stderr));
        }
        Ok(SpawnedProcess {
            events: rx,
            exit: Box::new(child),
        })
    }
}

struct NeverSpawned;

impl WaitExit for NeverSpawned {
    fn wait_exit(&mut self) -> io::Result<ExitInfo> {
        Ok(ExitInfo::default())
    }
}

// Both streams closed up front, the way a failed spawn looks to the caller.
fn failed_process() -> SpawnedProcess {
    let (tx, rx) = mpsc::channel();
    let _ = tx.send(StreamEvent::Closed(Stream::Stdout));
    let _ = tx.send(StreamEvent::Closed(Stream::Stderr));
    SpawnedProcess {
        events: rx,
        exit: Box::new(NeverSpawned),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub exit: Option<ExitInfo>,
    pub elapsed_secs: Option<f64>,
    pub spawned: bool,
}

pub struct RunHandle {
    events: Receiver<StreamEvent>,
    exit: Box<dyn WaitExit>,
    started_at: DateTime<Utc>,
    stdout_open: bool,
    stderr_open: bool,
    stdout_pending: Vec<u8>,
    stderr_pending: Vec<u8>,
    elapsed_secs: Option<f64>,
    spawned: bool,
}

// Length of a multibyte sequence cut off at the end of `bytes`, 0 if none.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for index in (start..bytes.len()).rev() {
        let byte = bytes[index];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        let have = bytes.len() - index;
        return if have < needed { have } else { 0 };
    }
    0
}

// Decode `pending`, keeping back a trailing partial character for the next chunk.
fn take_decoded(pending: &mut Vec<u8>) -> Option<String> {
    let complete = pending.len() - incomplete_tail(pending);
    if complete == 0 {
        return None;
    }
    let tail = pending.split_off(complete);
    let text = String::from_utf8_lossy(&pending[..]).into_owned();
    *pending = tail;
    Some(text)
}

pub fn announcement(command: &str, args: &[String], options: &Value) -> String {
    let args = serde_json::to_string(args).unwrap_or_else(|_| format!("{args:?}"));
    let options = serde_json::to_string(options).unwrap_or_else(|_| format!("{options:?}"));
    format!("> {command} {args} {options}")
}

pub fn finished_line(elapsed_secs: f64) -> String {
    format!("[Finished in {elapsed_secs} seconds]")
}

fn elapsed_since(start: DateTime<Utc>) -> f64 {
    (Utc::now() - start).num_milliseconds() as f64 * 0.001
}

pub fn run<F: PanelFactory>(
    surface: &mut LogSurface<F>,
    registry: &mut Registry,
    spawner: &dyn Spawner,
    command: &str,
    args: &[String],
    options: &Value,
) -> Result<RunHandle, SurfaceError> {
    surface.clear();
    surface.show();
    surface.cancel_dismiss(registry);
    surface.append(announcement(command, args, options), LineStyle::Echo)?;

    let started_at = Utc::now();
    let spawned = SpawnOptions::from_value(options)
        .map_err(|err| err.to_string())
        .and_then(|parsed| {
            if !parsed.ignored.is_empty() {
                log::debug!("ignoring options: {}", parsed.ignored.join(", "));
            }
            spawner
                .spawn(command, args.to_vec(), &parsed)
                .map_err(|err| format!("failed to spawn {command}: {err}"))
        });
    let (process, spawned) = match spawned {
        Ok(process) => (process, true),
        Err(message) => {
            log::error!("{message}");
            surface.append(message, LineStyle::Stderr)?;
            (failed_process(), false)
        }
    };

    Ok(RunHandle {
        events: process.events,
        exit: process.exit,
        started_at,
        stdout_open: true,
        stderr_open: true,
        stdout_pending: Vec::new(),
        stderr_pending: Vec::new(),
        elapsed_secs: None,
        spawned,
    })
}

impl RunHandle {
    pub fn is_open(&self) -> bool {
        self.stdout_open || self.stderr_open
    }

    fn is_stream_open(&self, stream: Stream) -> bool {
        match stream {
            Stream::Stdout => self.stdout_open,
            Stream::Stderr => self.stderr_open,
        }
    }

    fn pending_mut(&mut self, stream: Stream) -> &mut Vec<u8> {
        match stream {
            Stream::Stdout => &mut self.stdout_pending,
            Stream::Stderr => &mut self.stderr_pending,
        }
    }

    fn close<F: PanelFactory>(
        &mut self,
        stream: Stream,
        surface: &mut LogSurface<F>,
        registry: &mut Registry,
    ) -> Result<(), SurfaceError> {
        if self.is_stream_open(stream) {
            let leftover = std::mem::take(self.pending_mut(stream));
            if !leftover.is_empty() {
                surface.append(String::from_utf8_lossy(&leftover), stream.style())?;
            }
        }
        match stream {
            Stream::Stdout if self.stdout_open => {
                self.stdout_open = false;
                let elapsed = elapsed_since(self.started_at);
                self.elapsed_secs = Some(elapsed);
                surface.append(finished_line(elapsed), LineStyle::Stdout)?;
            }
            Stream::Stderr if self.stderr_open => {
                self.stderr_open = false;
                surface.arm_dismiss(registry);
            }
            _ => {}
        }
        Ok(())
    }

    // Deliver one queued event. Returns false once nothing more can arrive.
    pub fn step<F: PanelFactory>(
        &mut self,
        surface: &mut LogSurface<F>,
        registry: &mut Registry,
    ) -> Result<bool, SurfaceError> {
        if !self.is_open() {
            return Ok(false);
        }
        match self.events.recv() {
            Ok(StreamEvent::Data(stream, bytes)) => {
                if self.is_stream_open(stream) {
                    let pending = self.pending_mut(stream);
                    pending.extend_from_slice(&bytes);
                    if let Some(text) = take_decoded(pending) {
                        surface.append(text, stream.style())?;
                    }
                }
            }
            Ok(StreamEvent::Closed(stream)) => self.close(stream, surface, registry)?,
            Err(_) => {
                log::warn!("process event channel closed early");
                self.close(Stream::Stdout, surface, registry)?;
                self.close(Stream::Stderr, surface, registry)?;
            }
        }
        Ok(self.is_open())
    }

    pub fn pump<F: PanelFactory>(
        mut self,
        surface: &mut LogSurface<F>,
        registry: &mut Registry,
    ) -> Result<RunOutcome, SurfaceError> {
        while self.step(surface, registry)? {}
        let exit = if self.spawned {
            match self.exit.wait_exit() {
                Ok(info) => {
                    log::info!("process exited: code {:?}, signal {:?}", info.code, info.signal);
                    Some(info)
                }
                Err(err) => {
                    log::warn!("failed to reap process: {err}");
                    None
                }
            }
        } else {
            None
        };
        Ok(RunOutcome {
            exit,
            elapsed_secs: self.elapsed_secs,
            spawned: self.spawned,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::host::CANCEL_COMMAND;
    use crate::surface::{HeadlessFactory, LogLine};
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct SpawnCall {
        pub(crate) command: String,
        pub(crate) args: Vec<String>,
        pub(crate) options: SpawnOptions,
    }

    #[derive(Default)]
    pub(crate) struct ScriptedSpawner {
        pub(crate) script: Vec<StreamEvent>,
        pub(crate) exit: ExitInfo,
        pub(crate) fail: bool,
        pub(crate) calls: RefCell<Vec<SpawnCall>>,
    }

    struct FixedExit(ExitInfo);

    impl WaitExit for FixedExit {
        fn wait_exit(&mut self) -> io::Result<ExitInfo> {
            Ok(self.0)
        }
    }

    impl ScriptedSpawner {
        pub(crate) fn with_script(script: Vec<StreamEvent>) -> Self {
            Self {
                script,
                ..Self::default()
            }
        }
    }

    impl Spawner for ScriptedSpawner {
        fn spawn(
            &self,
            command: &str,
            args: Vec<String>,
            options: &SpawnOptions,
        ) -> io::Result<SpawnedProcess> {
            self.calls.borrow_mut().push(SpawnCall {
                command: command.to_string(),
                args,
                options: options.clone(),
            });
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
            }
            let (tx, rx) = mpsc::channel();
            for event in &self.script {
                let _ = tx.send(event.clone());
            }
            Ok(SpawnedProcess {
                events: rx,
                exit: Box::new(FixedExit(self.exit)),
            })
        }
    }

    fn out(text: &str) -> StreamEvent {
        StreamEvent::Data(Stream::Stdout, text.as_bytes().to_vec())
    }

    fn err(text: &str) -> StreamEvent {
        StreamEvent::Data(Stream::Stderr, text.as_bytes().to_vec())
    }

    fn styles(lines: &[LogLine]) -> Vec<LineStyle> {
        lines.iter().map(|line| line.style).collect()
    }

    fn run_script(
        spawner: &ScriptedSpawner,
        surface: &mut LogSurface<HeadlessFactory>,
        registry: &mut Registry,
    ) -> RunOutcome {
        let options = Value::Mapping(Default::default());
        let handle = run(surface, registry, spawner, "echo", &["hi".to_string()], &options).unwrap();
        handle.pump(surface, registry).unwrap()
    }

    #[test]
    fn streams_output_and_finishes() {
        let spawner = ScriptedSpawner {
            exit: ExitInfo { code: Some(0), signal: None },
            ..ScriptedSpawner::with_script(vec![
                out("hi\n"),
                err("warn\n"),
                StreamEvent::Closed(Stream::Stdout),
                StreamEvent::Closed(Stream::Stderr),
            ])
        };
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        let outcome = run_script(&spawner, &mut surface, &mut registry);

        let lines = surface.lines();
        assert_eq!(
            styles(lines),
            vec![LineStyle::Echo, LineStyle::Stdout, LineStyle::Stderr, LineStyle::Stdout]
        );
        assert_eq!(lines[0].text, r#"> echo ["hi"] {}"#);
        assert_eq!(lines[1].text, "hi\n");
        assert!(lines[3].text.starts_with("[Finished in "));
        assert!(lines[3].text.ends_with(" seconds]"));
        assert_eq!(outcome.exit, Some(ExitInfo { code: Some(0), signal: None }));
        assert!(outcome.elapsed_secs.is_some());
        assert!(surface.dismiss_armed());
        assert_eq!(registry.count_command(CANCEL_COMMAND), 1);
    }

    #[test]
    fn character_split_across_reads_is_joined() {
        let spawner = ScriptedSpawner::with_script(vec![
            StreamEvent::Data(Stream::Stdout, b"caf\xc3".to_vec()),
            StreamEvent::Data(Stream::Stdout, b"\xa9\n".to_vec()),
            StreamEvent::Data(Stream::Stderr, b"\xe2\x82".to_vec()),
            StreamEvent::Data(Stream::Stderr, b"\xac".to_vec()),
            StreamEvent::Closed(Stream::Stdout),
            StreamEvent::Closed(Stream::Stderr),
        ]);
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        run_script(&spawner, &mut surface, &mut registry);

        let lines = surface.lines();
        assert_eq!(lines[1].text, "caf");
        assert_eq!(lines[2].text, "é\n");
        assert_eq!(lines[3].style, LineStyle::Stderr);
        assert_eq!(lines[3].text, "€");
        assert!(lines.iter().all(|line| !line.text.contains('\u{FFFD}')));
    }

    #[test]
    fn dangling_bytes_are_flushed_on_close() {
        let spawner = ScriptedSpawner::with_script(vec![
            StreamEvent::Data(Stream::Stdout, b"ok\xe2\x82".to_vec()),
            StreamEvent::Closed(Stream::Stdout),
            StreamEvent::Closed(Stream::Stderr),
        ]);
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        run_script(&spawner, &mut surface, &mut registry);

        let lines = surface.lines();
        assert_eq!(lines[1].text, "ok");
        assert_eq!(lines[2].text, "\u{FFFD}");
        assert!(lines[3].text.starts_with("[Finished in "));
    }

    #[test]
    fn incomplete_tail_counts_only_cut_sequences() {
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail(b"ab\xc3"), 1);
        assert_eq!(incomplete_tail("é".as_bytes()), 0);
        assert_eq!(incomplete_tail(b"\xf0\x9f\x98"), 3);
        assert_eq!(incomplete_tail("😀".as_bytes()), 0);
        assert_eq!(incomplete_tail(b""), 0);
    }

    #[test]
    fn stderr_closing_first_arms_dismiss_before_finish_line() {
        let spawner = ScriptedSpawner::with_script(vec![
            StreamEvent::Closed(Stream::Stderr),
            out("late\n"),
            StreamEvent::Closed(Stream::Stdout),
        ]);
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        let options = Value::Null;
        let mut handle = run(&mut surface, &mut registry, &spawner, "x", &[], &options).unwrap();
        assert!(handle.step(&mut surface, &mut registry).unwrap());
        assert!(surface.dismiss_armed());
        assert_eq!(surface.lines().len(), 1);
        handle.pump(&mut surface, &mut registry).unwrap();
        assert_eq!(surface.lines().len(), 3);
        assert_eq!(surface.lines()[1].text, "late\n");
    }

    #[test]
    fn new_run_clears_surface_and_cancels_prior_trigger() {
        let spawner = ScriptedSpawner::with_script(vec![
            out("one\n"),
            StreamEvent::Closed(Stream::Stdout),
            StreamEvent::Closed(Stream::Stderr),
        ]);
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        run_script(&spawner, &mut surface, &mut registry);
        assert!(surface.dismiss_armed());

        let options = Value::Null;
        let handle = run(&mut surface, &mut registry, &spawner, "echo", &[], &options).unwrap();
        assert!(!surface.dismiss_armed());
        assert_eq!(registry.count_command(CANCEL_COMMAND), 0);
        assert_eq!(surface.lines().len(), 1);
        handle.pump(&mut surface, &mut registry).unwrap();
        assert_eq!(registry.count_command(CANCEL_COMMAND), 1);
    }

    #[test]
    fn run_shows_a_hidden_surface() {
        let spawner = ScriptedSpawner::with_script(vec![
            StreamEvent::Closed(Stream::Stdout),
            StreamEvent::Closed(Stream::Stderr),
        ]);
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        run_script(&spawner, &mut surface, &mut registry);
        assert!(surface.fire_dismiss(&mut registry));
        assert!(!surface.is_visible());
        run_script(&spawner, &mut surface, &mut registry);
        assert!(surface.is_visible());
    }

    #[test]
    fn spawn_failure_is_rendered_and_still_finishes() {
        let spawner = ScriptedSpawner {
            fail: true,
            ..ScriptedSpawner::default()
        };
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        let outcome = run_script(&spawner, &mut surface, &mut registry);
        let lines = surface.lines();
        assert_eq!(styles(lines), vec![LineStyle::Echo, LineStyle::Stderr, LineStyle::Stdout]);
        assert!(lines[1].text.contains("failed to spawn echo"));
        assert!(!outcome.spawned);
        assert_eq!(outcome.exit, None);
        assert!(surface.dismiss_armed());
    }

    #[test]
    fn invalid_options_never_reach_the_spawner() {
        let spawner = ScriptedSpawner::default();
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        let options: Value = serde_yaml::from_str("cwd: [1, 2]").unwrap();
        let handle = run(&mut surface, &mut registry, &spawner, "ls", &[], &options).unwrap();
        handle.pump(&mut surface, &mut registry).unwrap();
        assert!(spawner.calls.borrow().is_empty());
        assert!(surface.lines()[1].text.contains("invalid option 'cwd'"));
    }

    #[test]
    fn spawner_receives_a_copy_of_the_arguments() {
        let spawner = ScriptedSpawner::with_script(vec![
            StreamEvent::Closed(Stream::Stdout),
            StreamEvent::Closed(Stream::Stderr),
        ]);
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        let args = vec!["-l".to_string(), "/tmp".to_string()];
        let options: Value = serde_yaml::from_str("cwd: /tmp\ndetached: true").unwrap();
        let handle = run(&mut surface, &mut registry, &spawner, "ls", &args, &options).unwrap();
        handle.pump(&mut surface, &mut registry).unwrap();
        let calls = spawner.calls.borrow();
        assert_eq!(calls[0].args, args);
        assert_eq!(calls[0].options.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(calls[0].options.ignored, vec!["detached".to_string()]);
    }

    #[test]
    fn dropped_channel_closes_both_streams() {
        let spawner = ScriptedSpawner::with_script(vec![out("partial")]);
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        let outcome = run_script(&spawner, &mut surface, &mut registry);
        assert_eq!(surface.lines().len(), 3);
        assert!(outcome.elapsed_secs.is_some());
        assert!(surface.dismiss_armed());
    }

    #[test]
    fn options_parse_env_and_shell() {
        let value: Value =
            serde_yaml::from_str("env:\n  PORT: 8080\n  NAME: x\nshell: /bin/bash\n").unwrap();
        let options = SpawnOptions::from_value(&value).unwrap();
        let env = options.env.unwrap();
        assert_eq!(env.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(options.shell, ShellOption::Program("/bin/bash".to_string()));

        let value: Value = serde_yaml::from_str("shell: true").unwrap();
        assert_eq!(SpawnOptions::from_value(&value).unwrap().shell, ShellOption::Default);
        assert_eq!(
            SpawnOptions::from_value(&Value::from("x")),
            Err(OptionsError::NotAMapping)
        );
    }

    #[test]
    fn finished_line_formats_fractional_seconds() {
        assert_eq!(finished_line(0.25), "[Finished in 0.25 seconds]");
        assert_eq!(finished_line(2.0), "[Finished in 2 seconds]");
    }

    #[cfg(unix)]
    #[test]
    fn real_process_streams_both_outputs() {
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        let options: Value = serde_yaml::from_str("shell: true").unwrap();
        let args: Vec<String> = ["out;", "echo", "err", "1>&2;", "exit 3"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        let handle = run(&mut surface, &mut registry, &ProcessSpawner, "echo", &args, &options).unwrap();
        let outcome = handle.pump(&mut surface, &mut registry).unwrap();
        assert_eq!(outcome.exit.and_then(|exit| exit.code), Some(3));
        let text: Vec<(LineStyle, String)> = surface
            .lines()
            .iter()
            .map(|line| (line.style, line.text.clone()))
            .collect();
        assert!(text.contains(&(LineStyle::Stdout, "out\n".to_string())));
        assert!(text.contains(&(LineStyle::Stderr, "err\n".to_string())));
        assert!(text
            .iter()
            .any(|(style, line)| *style == LineStyle::Stdout && line.starts_with("[Finished in ")));
    }

    #[cfg(unix)]
    #[test]
    fn real_process_output_survives_read_boundaries() {
        let mut surface = LogSurface::new(HeadlessFactory);
        let mut registry = Registry::new();
        let options: Value = serde_yaml::from_str("shell: true").unwrap();
        let args = vec![
            "8191 /dev/zero | tr '\\0' a;".to_string(),
            "printf '\\303\\251'".to_string(),
        ];
        let handle = run(&mut surface, &mut registry, &ProcessSpawner, "head -c", &args, &options).unwrap();
        handle.pump(&mut surface, &mut registry).unwrap();
        let stdout: String = surface
            .lines()
            .iter()
            .filter(|line| line.style == LineStyle::Stdout && !line.text.starts_with("[Finished in "))
            .map(|line| line.text.as_str())
            .collect();
        assert_eq!(stdout, format!("{}é", "a".repeat(8191)));
    }
}
