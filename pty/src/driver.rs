//! The drive stage: consume MatchContexts from the top of the stack until
//! the script completes, fails, or exits.

use std::fs::File;
use std::io::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::action::{ActionKind, Compiler, MatchContext, Matcher};
use crate::process::{PtyProcess, ReadOutcome};
use crate::spawn::spawn;

const READ_CHUNK: usize = 4096;

/// A failed or malformed script step, tagged with its source location.
#[derive(Debug, thiserror::Error)]
#[error("{name}:{line}: {msg}")]
pub struct ScriptError {
    pub name: String,
    pub line: usize,
    pub msg: String,
}

/// Outcome of a buffer-consuming wait.
enum Outcome {
    Matched,
    TimedOut,
    Eof,
}

/// Drives one script against one child process.
pub struct Driver<'a> {
    name: String,
    source: &'a str,
    process: Option<PtyProcess>,
    buffer: Vec<u8>,
    stack: Vec<MatchContext>,
    /// Bytes queued before release, flushed right after it.
    enqueued: Vec<u8>,
    /// Installed by `fail`; taken (once) on the first match failure.
    fail_actions: Option<Vec<crate::action::MatchAction>>,
    log: Option<File>,
    hexdump: bool,
    exit_code: Option<i32>,
}

impl<'a> Driver<'a> {
    pub fn new(name: &str, source: &'a str) -> Self {
        Self {
            name: name.to_owned(),
            source,
            process: None,
            buffer: Vec::with_capacity(READ_CHUNK),
            stack: Vec::with_capacity(4),
            enqueued: Vec::with_capacity(0),
            fail_actions: None,
            log: None,
            hexdump: false,
            exit_code: None,
        }
    }

    /// Parse, compile, and drive the script. Returns the script's exit
    /// code; match failures without a rescue handler are errors.
    pub fn run(&mut self) -> Result<i32> {
        let stmts = syntax::parse_script(self.source)
            .with_context(|| format!("while parsing script {}", self.name))?;
        let actions = Compiler::new(self.source).compile(&stmts)?;
        self.stack.push(MatchContext::sequential(actions));

        let result = self.drive();

        // reap the child exactly once, whatever happened above.
        if let Some(mut process) = self.process.take() {
            let closed = process.close();
            if result.is_ok() {
                closed.context("while closing child process")?;
            }
        }
        result?;
        Ok(self.exit_code.unwrap_or(0))
    }

    fn drive(&mut self) -> Result<()> {
        loop {
            if self.exit_code.is_some() {
                return Ok(());
            }
            let alternation = match self.stack.last() {
                None => return Ok(()),
                Some(ctx) => ctx.alternation,
            };
            if alternation {
                self.step_alternation()?;
            } else {
                self.step_sequential()?;
            }
        }
    }

    fn step_sequential(&mut self) -> Result<()> {
        let action = self
            .stack
            .last_mut()
            .expect("drive checked the stack")
            .actions
            .pop();
        match action {
            None => {
                self.stack.pop();
                Ok(())
            }
            Some(action) => self.exec(action),
        }
    }

    fn exec(&mut self, action: crate::action::MatchAction) -> Result<()> {
        let line = action.line;
        let timeout = action.timeout;
        match action.kind {
            ActionKind::Spawn(argv) => {
                if self.process.is_some() {
                    return Err(self.err(line, "process already spawned").into());
                }
                log::debug!("spawning {argv:?}");
                match spawn(&argv) {
                    Ok(process) => self.process = Some(process),
                    Err(e) => return Err(self.err(line, &format!("spawn failed: {e}")).into()),
                }
            }
            ActionKind::Match {
                pattern,
                matcher,
                body,
            } => {
                self.ensure_released(line)?;
                match self.wait_match(&matcher, timeout, line)? {
                    Outcome::Matched => {
                        if !body.is_empty() {
                            self.stack.push(MatchContext::sequential(body));
                        }
                    }
                    Outcome::TimedOut => {
                        self.on_failure(line, &format!("timeout waiting for match '{pattern}'"))?;
                    }
                    Outcome::Eof => {
                        self.on_failure(line, &format!("eof while waiting for match '{pattern}'"))?;
                    }
                }
            }
            ActionKind::One(matches) => {
                self.ensure_released(line)?;
                self.stack.push(MatchContext::alternation(matches));
            }
            ActionKind::Eof => {
                self.ensure_released(line)?;
                match self.wait_eof(timeout, line)? {
                    Outcome::TimedOut => self.on_failure(line, "timeout waiting for eof")?,
                    _ => {}
                }
            }
            ActionKind::Write { text, raw, rate } => {
                self.ensure_released(line)?;
                let bytes = translate_controls(&text, raw);
                match rate {
                    None => self.write_child(&bytes, line)?,
                    Some(rate) => {
                        for chunk in bytes.chunks(rate.bytes) {
                            self.write_child(chunk, line)?;
                            std::thread::sleep(Duration::from_secs_f64(rate.delay));
                        }
                    }
                }
            }
            ActionKind::Enqueue { text, raw } => {
                let bytes = translate_controls(&text, raw);
                let released = self.process.as_ref().is_some_and(|p| p.released);
                if released {
                    self.write_child(&bytes, line)?;
                } else {
                    self.enqueued.extend_from_slice(&bytes);
                }
            }
            ActionKind::Release => {
                let released = match self.process.as_ref() {
                    None => return Err(self.err(line, "no process has been spawned").into()),
                    Some(p) => p.released,
                };
                if released {
                    return Err(self.err(line, "process already released").into());
                }
                self.ensure_released(line)?;
            }
            ActionKind::Stty { flag, on } => {
                let result = match self.process.as_mut() {
                    None => return Err(self.err(line, "no process has been spawned").into()),
                    Some(process) => process
                        .term_snapshot()
                        .and_then(|mut t| {
                            flag.apply(&mut t, on);
                            process.term_set(&t)
                        })
                        .map_err(|e| e.to_string()),
                };
                if let Err(msg) = result {
                    return Err(self.err(line, &msg).into());
                }
            }
            ActionKind::Log(path) => {
                self.log = match path {
                    None => None,
                    Some(path) => Some(
                        File::create(&path)
                            .with_context(|| format!("while opening log file {path}"))?,
                    ),
                };
            }
            ActionKind::Hexdump(on) => self.hexdump = on,
            ActionKind::Sleep(duration) => std::thread::sleep(duration),
            ActionKind::Debug(msg) => eprintln!("DEBUG [{}:{line}]: {msg}", self.name),
            ActionKind::Exit(code) => {
                self.exit_code = Some(code);
                self.stack.clear();
            }
            ActionKind::Fail(actions) => self.fail_actions = Some(actions),
        }
        Ok(())
    }

    /// Alternation: wait until any contained match fires. Deadlines are
    /// derived per action; the earliest one governs failure.
    fn step_alternation(&mut self) -> Result<()> {
        let ctx = self.stack.pop().expect("drive checked the stack");
        let mut actions = ctx.actions;
        let line = actions.first().map_or(0, |a| a.line);
        self.ensure_released(line)?;

        let started = Instant::now();
        let min_deadline = actions
            .iter()
            .map(|a| started + a.timeout)
            .min()
            .expect("one blocks are never empty");

        loop {
            let mut winner = None;
            for (i, action) in actions.iter().enumerate() {
                if action.completed {
                    continue;
                }
                if let ActionKind::Match { matcher, .. } = &action.kind {
                    if let Some((_, end)) = matcher.find(&self.buffer) {
                        winner = Some((i, end));
                        break;
                    }
                }
            }
            if let Some((i, end)) = winner {
                self.buffer.drain(..end);
                let mut action = actions.swap_remove(i);
                action.completed = true;
                if let ActionKind::Match { body, .. } = action.kind {
                    if !body.is_empty() {
                        self.stack.push(MatchContext::sequential(body));
                    }
                }
                return Ok(());
            }

            if self.process.as_ref().is_some_and(|p| p.eof) {
                return self.on_failure(line, "eof during alternation");
            }
            let now = Instant::now();
            if now >= min_deadline {
                return self.on_failure(line, "timeout during alternation");
            }
            match self.poll_child(Some(min_deadline - now), line)? {
                ReadOutcome::TimedOut => {
                    return self.on_failure(line, "timeout during alternation")
                }
                ReadOutcome::Ready => self.fill_buffer(line)?,
            }
        }
    }

    /// Consume buffer output until `matcher` fires or time runs out.
    /// A successful match trims everything up to and including it.
    fn wait_match(&mut self, matcher: &Matcher, timeout: Duration, line: usize) -> Result<Outcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((_, end)) = matcher.find(&self.buffer) {
                self.buffer.drain(..end);
                return Ok(Outcome::Matched);
            }
            if self.process.as_ref().is_some_and(|p| p.eof || p.errored()) {
                return Ok(Outcome::Eof);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.poll_child(Some(remaining), line)? {
                ReadOutcome::TimedOut => return Ok(Outcome::TimedOut),
                ReadOutcome::Ready => self.fill_buffer(line)?,
            }
        }
    }

    fn wait_eof(&mut self, timeout: Duration, line: usize) -> Result<Outcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.process.as_ref().is_some_and(|p| p.eof) {
                return Ok(Outcome::Matched);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.poll_child(Some(remaining), line)? {
                ReadOutcome::TimedOut => return Ok(Outcome::TimedOut),
                ReadOutcome::Ready => self.fill_buffer(line)?,
            }
        }
    }

    /// Release the child if that hasn't happened yet, then flush any
    /// enqueued writes. Implicit on the first buffer interaction.
    fn ensure_released(&mut self, line: usize) -> Result<()> {
        let process = match self.process.as_mut() {
            None => return Err(self.err(line, "no process has been spawned").into()),
            Some(p) => p,
        };
        if !process.released {
            if let Err(e) = process.release() {
                return Err(self.err(line, &format!("release failed: {e}")).into());
            }
            log::debug!("child released");
            if !self.enqueued.is_empty() {
                let data = std::mem::take(&mut self.enqueued);
                self.write_child(&data, line)?;
            }
        }
        Ok(())
    }

    fn poll_child(&mut self, timeout: Option<Duration>, line: usize) -> Result<ReadOutcome> {
        let process = match self.process.as_mut() {
            None => return Err(self.err(line, "no process has been spawned").into()),
            Some(p) => p,
        };
        let outcome = process.read_ready(timeout);
        outcome.map_err(|e| self.err(line, &format!("pty read failed: {e}")).into())
    }

    /// Read one chunk of child output into the match buffer (and the log
    /// file, if one is open).
    fn fill_buffer(&mut self, line: usize) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        let result = match self.process.as_mut() {
            None => return Err(self.err(line, "no process has been spawned").into()),
            Some(process) => process.read_chunk(&mut buf),
        };
        let n = match result {
            Ok(n) => n,
            Err(e) => return Err(self.err(line, &format!("pty read failed: {e}")).into()),
        };
        if n > 0 {
            self.buffer.extend_from_slice(&buf[..n]);
            if let Some(log) = self.log.as_mut() {
                log.write_all(&buf[..n]).context("while writing log file")?;
            }
        }
        Ok(())
    }

    fn write_child(&mut self, bytes: &[u8], line: usize) -> Result<()> {
        let result = match self.process.as_mut() {
            None => return Err(self.err(line, "no process has been spawned").into()),
            Some(process) => process.write_all(bytes),
        };
        result.map_err(|e| anyhow::Error::from(self.err(line, &format!("pty write failed: {e}"))))
    }

    /// The fail path: run the rescue handler if one is installed (once),
    /// otherwise the script dies here.
    fn on_failure(&mut self, line: usize, msg: &str) -> Result<()> {
        log::debug!(
            "match failure with {} bytes buffered: {msg}",
            self.buffer.len()
        );
        if self.hexdump {
            eprint!("{}", hexdump(&self.buffer));
        }
        match self.fail_actions.take() {
            Some(actions) => {
                self.stack.clear();
                self.stack.push(MatchContext::sequential(actions));
                Ok(())
            }
            None => Err(self.err(line, msg).into()),
        }
    }

    fn err(&self, line: usize, msg: &str) -> ScriptError {
        ScriptError {
            name: self.name.clone(),
            line,
            msg: msg.to_owned(),
        }
    }
}

/// Run a script from a file. The exit code is the script's; parse errors
/// and unrescued failures surface as errors.
pub fn run_script_file(path: &Path) -> Result<i32> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("while reading script {path:?}"))?;
    Driver::new(&path.display().to_string(), &text).run()
}

/// Translate `^X` control sequences unless raw mode is on. `\^` always
/// produces a literal caret.
fn translate_controls(text: &str, raw: bool) -> Vec<u8> {
    let bytes = text.as_bytes();
    if raw {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1) == Some(&b'^') => {
                out.push(b'^');
                i += 2;
            }
            b'^' => match bytes.get(i + 1) {
                Some(&c) if (b'@'..=b'_').contains(&c) => {
                    out.push(c - b'@');
                    i += 2;
                }
                _ => {
                    out.push(b'^');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Classic offset/hex/ascii dump, 16 bytes per line.
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for (i, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", i * 16));
        for j in 0..16 {
            match chunk.get(j) {
                Some(b) => out.push_str(&format!("{b:02x} ")),
                None => out.push_str("   "),
            }
            if j == 7 {
                out.push(' ');
            }
        }
        out.push(' ');
        for b in chunk {
            out.push(if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    fn run(text: &str) -> Result<i32> {
        Driver::new("test.script", text).run()
    }

    #[test]
    fn test_translate_controls() {
        assert_eq!(b"a\x03b".to_vec(), translate_controls("a^Cb", false));
        assert_eq!(b"\x00".to_vec(), translate_controls("^@", false));
        assert_eq!(b"^C".to_vec(), translate_controls("^C", true));
        assert_eq!(b"^x".to_vec(), translate_controls("^x", false));
        assert_eq!(b"^C".to_vec(), translate_controls("\\^C", false));
    }

    #[test]
    fn test_hexdump_shape() {
        let dump = hexdump(b"hello world, this is a dump!");
        assert!(dump.starts_with("00000000  68 65 6c 6c"));
        assert!(dump.contains("hello world"));
        assert_eq!(2, dump.lines().count());
    }

    #[test]
    fn test_write_then_match_cat() {
        let code = run("spawn \"cat\"\nwrite \"hello\\n\"\nmatch \"hello\"\n").unwrap();
        assert_eq!(0, code);
    }

    #[test]
    fn test_match_consumes_prefix() {
        // two matches in one burst of output: the second must still fire,
        // proving the buffer was only trimmed through the first match.
        let code = run(concat!(
            "spawn \"sh\" \"-c\" \"echo alpha beta\"\n",
            "match \"alpha\"\n",
            "match \"beta\"\n",
        ))
        .unwrap();
        assert_eq!(0, code);
    }

    #[test]
    fn test_match_timeout_is_bounded() {
        let start = Instant::now();
        let err = run("spawn \"cat\"\ntimeout 1\nmatch \"XXX\"\n").unwrap_err();
        let elapsed = start.elapsed();
        assert!(err.to_string().contains("timeout waiting for match 'XXX'"));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(4), "timed out in {elapsed:?}");
    }

    #[test]
    fn test_match_without_spawn_fails() {
        let err = run("match \"nope\"\n").unwrap_err();
        assert!(err.to_string().contains("no process has been spawned"));
    }

    #[test]
    fn test_alternation_picks_the_one_that_fires() {
        let code = run(concat!(
            "spawn \"sh\" \"-c\" \"echo BBB\"\n",
            "one {\n",
            "    match \"AAA\" { exit 1 }\n",
            "    match \"BBB\" { exit 2 }\n",
            "}\n",
        ))
        .unwrap();
        assert_eq!(2, code);
    }

    #[test]
    fn test_fail_handler_rescues() {
        let code = run(concat!(
            "spawn \"cat\"\n",
            "fail { exit 7 }\n",
            "match \"XXX\" timeout 0.3\n",
        ))
        .unwrap();
        assert_eq!(7, code);
    }

    #[test]
    fn test_eof_after_child_exits() {
        let code = run("spawn \"sh\" \"-c\" \"echo done\"\nmatch \"done\"\neof\n").unwrap();
        assert_eq!(0, code);
    }

    #[test]
    fn test_enqueue_flushes_at_release() {
        let code = run(concat!(
            "spawn \"cat\"\n",
            "enqueue \"early\\n\"\n",
            "match \"early\"\n",
        ))
        .unwrap();
        assert_eq!(0, code);
    }

    #[test]
    fn test_exit_code_passthrough() {
        assert_eq!(5, run("exit 5\n").unwrap());
        assert_eq!(0, run("debug \"nothing to do\"\n").unwrap());
    }

    #[test]
    fn test_stty_echo_off_still_matches_output() {
        let code = run(concat!(
            "spawn \"cat\"\n",
            "stty echo off\n",
            "write \"ping\\n\"\n",
            "match \"ping\"\n",
        ))
        .unwrap();
        assert_eq!(0, code);
    }

    #[test]
    fn test_match_callback_queues_context() {
        let code = run(concat!(
            "spawn \"cat\"\n",
            "write \"first\\n\"\n",
            "match \"first\" {\n",
            "    write \"second\\n\"\n",
            "    match \"second\" { exit 3 }\n",
            "}\n",
        ))
        .unwrap();
        assert_eq!(3, code);
    }
}
